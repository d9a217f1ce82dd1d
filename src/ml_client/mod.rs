//! ML anomaly-detection service client (spec §6 "ML anomaly-detection
//! service"). The core only ever consumes the returned scalar score to set
//! `ml_warning_flag` (spec §4.G point 5) — how the score is produced is out
//! of scope (spec §9 Open Questions).
//!
//! A `reqwest` client wrapped in a thiserror enum, one request method per
//! remote call.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::defaults::service::ML_REQUEST_TIMEOUT;

#[derive(Debug, Error)]
pub enum MlClientError {
    #[error("ML client is disabled in configuration")]
    Disabled,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ML service returned status {0}")]
    ServerError(reqwest::StatusCode),
}

/// `{mean, std, p05, p95}` for one metric, as sent to the ML service (spec
/// §6: "optional baseline_stats: map<metric,{mean,std,p05,p95}>").
#[derive(Debug, Clone, Serialize)]
pub struct BaselineSnapshot {
    pub mean: f64,
    pub std: f64,
    pub p05: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreRequest {
    pub machine_id: String,
    pub sensor_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub readings: HashMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_stats: Option<HashMap<String, BaselineSnapshot>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoreResponse {
    pub score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub feature_contributions: Option<HashMap<String, f64>>,
}

#[async_trait]
pub trait AnomalyScorer: Send + Sync {
    async fn score(&self, request: &ScoreRequest) -> Result<ScoreResponse, MlClientError>;
}

/// HTTP-backed `AnomalyScorer`. Constructed only when `ml.enabled` — the
/// poller falls back to `None` scores (no ML signal, `ml_warning_flag`
/// stays false) rather than constructing one when disabled.
#[derive(Clone)]
pub struct HttpAnomalyScorer {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpAnomalyScorer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(ML_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl AnomalyScorer for HttpAnomalyScorer {
    async fn score(&self, request: &ScoreRequest) -> Result<ScoreResponse, MlClientError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(MlClientError::ServerError(resp.status()));
        }
        Ok(resp.json::<ScoreResponse>().await?)
    }
}

/// Always returns `Disabled`, used when `ml.enabled = false` so the poller
/// has a uniform `AnomalyScorer` to call regardless of configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAnomalyScorer;

#[async_trait]
impl AnomalyScorer for DisabledAnomalyScorer {
    async fn score(&self, _request: &ScoreRequest) -> Result<ScoreResponse, MlClientError> {
        Err(MlClientError::Disabled)
    }
}
