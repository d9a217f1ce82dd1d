//! Per-machine poller task (spec §5): owns its ring buffer and state
//! detector, pulls from the historian with backoff, derives metrics,
//! classifies state, feeds the baseline learner, consults the ML client,
//! evaluates, and publishes — one task per machine, no shared mutable state
//! across machines (spec §9 "Global mutable detector registry: re-
//! architect as an owned collection held by a supervising component that
//! spawns a task per machine").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::baseline::BaselineLearner;
use crate::buffer::RingBuffer;
use crate::config::{self, defaults::poll as poll_defaults, ThresholdSet};
use crate::evaluator::Evaluator;
use crate::historian::HistorianClient;
use crate::metrics::MetricEngine;
use crate::ml_client::{AnomalyScorer, BaselineSnapshot, ScoreRequest};
use crate::profiles::ProfileRegistry;
use crate::sink::EventSink;
use crate::state_machine::StateDetector;
use crate::types::metric_names::EXPECTED_BASELINE_METRICS;
use crate::types::{
    BaselineStats, MachineState, MaterialChangeEvent, Profile, Reading, StateTransitionEvent,
};

/// Counters surfaced for observability (spec §7); not used for control
/// flow inside the poller itself.
#[derive(Debug, Default)]
pub struct PollerStats {
    pub readings_accepted: AtomicU64,
    pub readings_rejected: AtomicU64,
    pub fetch_failures: AtomicU64,
}

pub struct Poller {
    machine_id: String,
    historian: Arc<dyn HistorianClient>,
    profiles: Arc<ProfileRegistry>,
    baseline: Arc<BaselineLearner>,
    sink: Arc<dyn EventSink>,
    scorer: Arc<dyn AnomalyScorer>,
    buffer: RingBuffer,
    detector: StateDetector,
    watermark: DateTime<Utc>,
    current_material: Option<String>,
    stats: Arc<PollerStats>,
}

impl Poller {
    pub fn new(
        machine_id: impl Into<String>,
        historian: Arc<dyn HistorianClient>,
        profiles: Arc<ProfileRegistry>,
        baseline: Arc<BaselineLearner>,
        sink: Arc<dyn EventSink>,
        scorer: Arc<dyn AnomalyScorer>,
        watermark: DateTime<Utc>,
    ) -> Self {
        let machine_id = machine_id.into();
        Self {
            detector: StateDetector::new(machine_id.clone(), watermark),
            buffer: RingBuffer::new(poll_defaults::RING_BUFFER_CAPACITY),
            machine_id,
            historian,
            profiles,
            baseline,
            sink,
            scorer,
            watermark,
            current_material: None,
            stats: Arc::new(PollerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PollerStats> {
        self.stats.clone()
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn current_state(&self) -> MachineState {
        self.detector.current_state()
    }

    /// Runs until `cancel` fires. Each cycle: fetch, process, sleep up to
    /// `poll_interval` (re-read from the live config snapshot every cycle,
    /// spec §5 "each poller re-reads config at most once per cycle"), or
    /// wake early on cancellation.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut backoff = poll_defaults::BACKOFF_BASE;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let snapshot = config::get();
            let thresholds = snapshot.resolve_thresholds(&self.machine_id);
            let cap = snapshot.poll.max_rows_per_poll;

            match self
                .historian
                .fetch_since(&self.machine_id, self.watermark, cap)
                .await
            {
                Ok(readings) => {
                    backoff = poll_defaults::BACKOFF_BASE;
                    self.process_batch(readings, &thresholds, snapshot.poll.window_minutes)
                        .await;
                    self.publish_staleness_if_any(Utc::now()).await;
                }
                Err(err) => {
                    self.stats.fetch_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        machine_id = %self.machine_id,
                        error = %err,
                        backoff_secs = backoff.as_secs(),
                        "historian fetch failed, watermark not advanced"
                    );
                    if sleep_or_cancel(jittered(backoff), &cancel).await {
                        break;
                    }
                    backoff = (backoff * 2).min(poll_defaults::BACKOFF_CAP);
                    continue;
                }
            }

            let interval = Duration::from_secs(snapshot.poll.interval_seconds);
            if sleep_or_cancel(interval, &cancel).await {
                break;
            }
        }
        info!(machine_id = %self.machine_id, "poller task stopped");
    }

    /// Drives a batch of readings through the same per-reading pipeline
    /// `run()` uses internally. Public so the replay tool can feed a CSV
    /// through the full pipeline without a live historian connection.
    /// `window_minutes` sizes the metric engine's lookback window (spec §6
    /// `poll.window_minutes`); `run()` passes the live config snapshot's
    /// value so the field is not inert.
    pub async fn process_batch(
        &mut self,
        readings: Vec<Reading>,
        thresholds: &ThresholdSet,
        window_minutes: u64,
    ) {
        for reading in readings {
            self.watermark = self.watermark.max(reading.timestamp);
            self.handle_material_change(&reading).await;

            if !self.buffer.append(reading.clone()) {
                self.stats.readings_rejected.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            self.stats.readings_accepted.fetch_add(1, Ordering::Relaxed);

            let now = reading.timestamp;
            let window = self
                .buffer
                .tail_since(ChronoDuration::minutes(window_minutes as i64));
            let derived = MetricEngine::derive(&window, &reading);

            let previous_state = self.detector.current_state();
            let state_info = self.detector.process(&reading, derived, thresholds, now);
            if state_info.state != previous_state {
                self.sink
                    .publish_state_transition(StateTransitionEvent {
                        machine_id: self.machine_id.clone(),
                        from_state: previous_state,
                        to_state: state_info.state,
                        at: state_info.state_since,
                        confidence: state_info.confidence,
                    })
                    .await;
            }

            let resolved_profile = self.resolve_profile(reading.material_id.as_deref());

            if state_info.state.is_production() {
                if let Some(profile) = &resolved_profile {
                    self.ingest_baseline_samples(profile, &reading, &derived, state_info.state, now);
                }
            }

            let (profile_material, stats_map) = match &resolved_profile {
                Some(profile) if profile.baseline_ready => match self.profiles.baseline_stats(&profile.profile_id) {
                    Ok(stats) => (Some(profile.material_id.clone()), stats),
                    Err(err) => {
                        warn!(machine_id = %self.machine_id, error = %err, "failed to load baseline stats");
                        (None, HashMap::new())
                    }
                },
                _ => (None, HashMap::new()),
            };

            let ml_score = if state_info.state.is_production() {
                self.request_ml_score(&reading, &derived, resolved_profile.as_ref(), &stats_map)
                    .await
            } else {
                None
            };

            let evaluation = Evaluator::evaluate(
                &reading,
                &state_info,
                &derived,
                profile_material.as_deref(),
                &stats_map,
                ml_score,
            );
            self.sink.publish_evaluation(evaluation).await;
        }
    }

    /// Stale-data override (spec §4.D): when the buffer is empty or its
    /// newest reading has gone stale, the detector reports UNKNOWN without
    /// touching the hysteresis machine, and that state is surfaced to
    /// subscribers as an unknown evaluation rather than silently
    /// continuing to imply the last committed state still holds.
    async fn publish_staleness_if_any(&self, now: DateTime<Utc>) {
        let is_stale = match self.buffer.age_of_newest(now) {
            None => true,
            Some(age) => age > ChronoDuration::seconds(poll_defaults::STALE_READING_SECS),
        };
        if !is_stale {
            return;
        }
        let info = self.detector.report_stale(self.buffer.is_empty());
        let reason = match info.stale_reason {
            Some(crate::types::StaleReason::BufferEmpty) => "no readings received yet",
            Some(crate::types::StaleReason::LastReadingStale) => "historian data is stale",
            None => "unknown",
        };
        let evaluation = crate::types::ProcessEvaluation {
            machine_id: self.machine_id.clone(),
            process_status: crate::types::Severity::Unknown,
            process_status_text: format!("Process evaluation disabled — {reason}"),
            spread_status: crate::types::Stability::Unknown,
            ml_warning_flag: false,
            metrics: Vec::new(),
        };
        self.sink.publish_evaluation(evaluation).await;
    }

    async fn handle_material_change(&mut self, reading: &Reading) {
        let Some(material) = reading.material_id.as_deref() else {
            return;
        };
        if self.current_material.as_deref() == Some(material) {
            return;
        }
        let event = MaterialChangeEvent {
            machine_id: self.machine_id.clone(),
            previous_material: self.current_material.clone(),
            new_material: material.to_string(),
            at: reading.timestamp,
        };
        self.current_material = Some(material.to_string());
        self.sink.publish_material_change(event).await;
    }

    fn resolve_profile(&self, material_id: Option<&str>) -> Option<Profile> {
        let material_id = material_id?;
        match self.profiles.resolve(&self.machine_id, material_id) {
            Ok(profile) => profile,
            Err(err) => {
                warn!(machine_id = %self.machine_id, error = %err, "profile resolution failed");
                None
            }
        }
    }

    fn ingest_baseline_samples(
        &self,
        profile: &Profile,
        reading: &Reading,
        derived: &crate::types::DerivedMetrics,
        state: crate::types::MachineState,
        at: DateTime<Utc>,
    ) {
        for metric_name in EXPECTED_BASELINE_METRICS {
            let value = crate::evaluator::metric_value(reading, derived, metric_name);
            if let Err(err) = self
                .baseline
                .ingest(&profile.profile_id, metric_name, value, state, at)
            {
                warn!(
                    machine_id = %self.machine_id,
                    profile_id = %profile.profile_id,
                    metric = %metric_name,
                    error = %err,
                    "baseline ingest rejected"
                );
            }
        }
    }

    async fn request_ml_score(
        &self,
        reading: &Reading,
        derived: &crate::types::DerivedMetrics,
        profile: Option<&Profile>,
        stats: &HashMap<String, BaselineStats>,
    ) -> Option<f64> {
        let mut readings = HashMap::new();
        for metric_name in EXPECTED_BASELINE_METRICS {
            if let Some(value) = crate::evaluator::metric_value(reading, derived, metric_name) {
                readings.insert(metric_name.to_string(), value);
            }
        }
        let baseline_stats = (!stats.is_empty()).then(|| {
            stats
                .iter()
                .map(|(name, s)| {
                    (
                        name.clone(),
                        BaselineSnapshot {
                            mean: s.mean,
                            std: s.std,
                            p05: s.p05,
                            p95: s.p95,
                        },
                    )
                })
                .collect()
        });

        let request = ScoreRequest {
            machine_id: self.machine_id.clone(),
            sensor_id: self.machine_id.clone(),
            timestamp: reading.timestamp,
            readings,
            profile_id: profile.map(|p| p.profile_id.clone()),
            material_id: reading.material_id.clone(),
            baseline_stats,
        };

        match self.scorer.score(&request).await {
            Ok(response) => Some(response.score),
            Err(err) => {
                tracing::debug!(machine_id = %self.machine_id, error = %err, "ML scoring unavailable");
                None
            }
        }
    }
}

/// `true` * `0.5..1.5` jitter around `base`, matching spec §7's "base 2 s,
/// cap 60 s, jittered" backoff.
fn jittered(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}

/// Sleeps for `duration` unless `cancel` fires first. Returns `true` if
/// cancellation won the race.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = sleep(duration) => false,
        _ = cancel.cancelled() => true,
    }
}
