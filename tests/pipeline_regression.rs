//! End-to-end pipeline regression tests: drives `Poller::process_batch`
//! through historian ingestion, state classification, baseline learning,
//! and evaluation exactly as the live poller would, asserting on the
//! events the sink receives rather than on any one module in isolation.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use extruder_monitor::baseline::BaselineLearner;
use extruder_monitor::config::{self, MonitorConfig, ThresholdSet};
use extruder_monitor::historian::MockHistorian;
use extruder_monitor::ml_client::DisabledAnomalyScorer;
use extruder_monitor::poller::Poller;
use extruder_monitor::profiles::ProfileRegistry;
use extruder_monitor::sink::{ChannelEventSink, SinkEvent};
use extruder_monitor::storage::Store;
use extruder_monitor::types::{MachineState, Reading, Severity};

fn ensure_config() {
    if !config::is_initialized() {
        config::init(MonitorConfig::default());
    }
}

fn reading(rpm: Option<f64>, pressure: Option<f64>, temp: f64, material: Option<&str>) -> Reading {
    Reading {
        machine_id: "M1".to_string(),
        material_id: material.map(|s| s.to_string()),
        timestamp: Utc::now(),
        screw_rpm: rpm,
        pressure,
        temp_zone_1: Some(temp),
        temp_zone_2: Some(temp),
        temp_zone_3: Some(temp),
        temp_zone_4: Some(temp),
        motor_load: None,
        throughput: None,
    }
}

struct Harness {
    poller: Poller,
    receiver: tokio::sync::mpsc::Receiver<SinkEvent>,
    profiles: Arc<ProfileRegistry>,
    baseline: Arc<BaselineLearner>,
    thresholds: ThresholdSet,
    window_minutes: u64,
}

fn harness(min_samples: usize) -> Harness {
    let store = Arc::new(Store::open_temporary().unwrap());
    let profiles = Arc::new(ProfileRegistry::new(store.clone()));
    let baseline = Arc::new(BaselineLearner::new(store, profiles.clone(), min_samples));
    let historian = Arc::new(MockHistorian::new(Vec::new()));
    let scorer = Arc::new(DisabledAnomalyScorer);
    let (sink, receiver) = ChannelEventSink::new(4096);
    let sink = Arc::new(sink);
    let poller = Poller::new(
        "M1",
        historian,
        profiles.clone(),
        baseline.clone(),
        sink,
        scorer,
        Utc::now() - ChronoDuration::days(1),
    );
    Harness {
        poller,
        receiver,
        profiles,
        baseline,
        thresholds: ThresholdSet::default(),
        window_minutes: config::MonitorConfig::default().poll.window_minutes,
    }
}

fn drain(receiver: &mut tokio::sync::mpsc::Receiver<SinkEvent>) -> Vec<SinkEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// S2 + S3: 90 1 Hz production-like readings commit the state to
/// PRODUCTION and, once a learning profile exists, feed the baseline
/// learner; finalizing then unlocks green evaluations for S4.
#[tokio::test]
async fn production_entry_feeds_baseline_and_unlocks_evaluation() {
    ensure_config();
    let mut h = harness(100);

    let profile = h.profiles.create(Some("M1".to_string()), "PP-H").unwrap();
    assert!(profile.baseline_learning);

    // Drive the state machine into PRODUCTION (commits after the 90 s
    // entry dwell) and keep going long enough past that to accumulate
    // 100+ baseline samples per metric. Timestamps step by one second to
    // mirror a 1 Hz historian.
    let start = Utc::now();
    for i in 0..260i64 {
        let mut r = reading(Some(20.0), Some(370.0), 200.0, Some("PP-H"));
        r.timestamp = start + ChronoDuration::seconds(i);
        h.poller
            .process_batch(vec![r], &h.thresholds, h.window_minutes)
            .await;
    }
    assert_eq!(h.poller.current_state(), MachineState::Production);

    h.baseline.finalize(&profile.profile_id).unwrap();
    let updated = h.profiles.get(&profile.profile_id).unwrap();
    assert!(updated.baseline_ready);

    // Drain whatever accumulated, then feed one more reading to get a
    // green evaluation against the freshly finalized baseline.
    drain(&mut h.receiver);
    let mut r = reading(Some(20.0), Some(370.0), 200.0, Some("PP-H"));
    r.timestamp = start + ChronoDuration::seconds(260);
    h.poller.process_batch(vec![r], &h.thresholds, h.window_minutes).await;

    let events = drain(&mut h.receiver);
    let evaluation = events
        .into_iter()
        .find_map(|e| match e {
            SinkEvent::Evaluation(eval) => Some(eval),
            _ => None,
        })
        .expect("expected an evaluation event");
    assert_eq!(evaluation.process_status, Severity::Green);
}

/// S1: an empty buffer and a cold reading classify as OFF and every
/// per-metric severity reports unknown, since no profile resolves at all.
#[tokio::test]
async fn off_from_cold_reports_unknown_everywhere() {
    ensure_config();
    let mut h = harness(100);
    let r = reading(Some(0.0), Some(0.0), 25.0, None);
    h.poller.process_batch(vec![r], &h.thresholds, h.window_minutes).await;

    let events = drain(&mut h.receiver);
    let evaluation = events
        .into_iter()
        .find_map(|e| match e {
            SinkEvent::Evaluation(eval) => Some(eval),
            _ => None,
        })
        .expect("expected an evaluation event");
    assert_eq!(evaluation.process_status, Severity::Unknown);
    assert!(evaluation.metrics.iter().all(|m| m.severity == Severity::Unknown));
}

/// Material changes publish exactly once per distinct material, even
/// across many readings of the same material in a row.
#[tokio::test]
async fn material_change_publishes_once_per_switch() {
    ensure_config();
    let mut h = harness(100);
    let start = Utc::now();

    let mut rows = Vec::new();
    for i in 0..5i64 {
        let mut r = reading(Some(0.0), Some(0.0), 25.0, Some("PP-H"));
        r.timestamp = start + ChronoDuration::seconds(i);
        rows.push(r);
    }
    let mut switched = reading(Some(0.0), Some(0.0), 25.0, Some("ABS"));
    switched.timestamp = start + ChronoDuration::seconds(5);
    rows.push(switched);

    h.poller.process_batch(rows, &h.thresholds, h.window_minutes).await;

    let events = drain(&mut h.receiver);
    let material_changes = events
        .iter()
        .filter(|e| matches!(e, SinkEvent::MaterialChange(_)))
        .count();
    assert_eq!(material_changes, 2, "one for PP-H, one for the switch to ABS");
}

/// Baseline ingest is gated on PRODUCTION even when a learning profile is
/// active the whole time: idle readings must never leave samples behind.
#[tokio::test]
async fn idle_readings_never_seed_the_baseline() {
    ensure_config();
    let h = harness(100);
    let profile = h.profiles.create(Some("M1".to_string()), "PP-H").unwrap();

    let mut poller = h.poller;
    let start = Utc::now();
    for i in 0..10i64 {
        let mut r = reading(Some(0.0), Some(0.0), 200.0, Some("PP-H"));
        r.timestamp = start + ChronoDuration::seconds(i);
        poller.process_batch(vec![r], &h.thresholds, h.window_minutes).await;
    }
    assert_ne!(poller.current_state(), MachineState::Production);

    let err = h.baseline.finalize(&profile.profile_id).unwrap_err();
    assert!(matches!(
        err,
        extruder_monitor::BaselineError::InsufficientSamples { .. }
    ));
}
