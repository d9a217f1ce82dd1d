//! Historian client contract (spec §4.A).
//!
//! A thin async seam the poller drives, with a concrete line-protocol
//! client for production and a mock for tests. The trait is deliberately
//! stateless between calls — the watermark belongs to the caller (the
//! poller), never to the client.

mod client;
mod mock;

pub use client::TcpHistorianClient;
pub use mock::MockHistorian;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::Reading;

#[derive(Debug, Error)]
pub enum HistorianError {
    #[error("historian connection failed: {0}")]
    ConnectionFailed(String),
    #[error("historian fetch timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("historian protocol error: {0}")]
    Protocol(String),
    #[error("historian is disabled in configuration")]
    Disabled,
}

/// Given a high-watermark timestamp, returns the ordered sequence of rows
/// with timestamps strictly greater than the watermark, up to `cap` rows.
///
/// Implementations must not advance any watermark themselves on failure —
/// the caller (poller) owns watermark bookkeeping and decides how to react
/// to an `Err` (spec §4.A: "On connection failure it must not advance the
/// watermark").
#[async_trait]
pub trait HistorianClient: Send + Sync {
    async fn fetch_since(
        &self,
        machine_id: &str,
        watermark: DateTime<Utc>,
        cap: usize,
    ) -> Result<Vec<Reading>, HistorianError>;

    fn source_name(&self) -> &str;
}
