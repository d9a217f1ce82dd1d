//! State detector: classifies the latest reading into one of six operating
//! states with hysteresis (spec §4.D).

use chrono::{DateTime, Duration, Utc};

use crate::config::ThresholdSet;
use crate::types::{DerivedMetrics, MachineState, MachineStateInfo, Reading, StaleReason};

const STALE_AFTER: Duration = Duration::minutes(5);
const FUTURE_TOLERANCE: Duration = Duration::minutes(1);

/// Owned per machine by its poller task — no other task writes it (spec §5).
pub struct StateDetector {
    machine_id: String,
    state: MachineState,
    confidence: f64,
    state_since: DateTime<Utc>,
    candidate_state: Option<MachineState>,
    candidate_since: Option<DateTime<Utc>>,
}

impl StateDetector {
    pub fn new(machine_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            machine_id: machine_id.into(),
            state: MachineState::Unknown,
            confidence: 0.1,
            state_since: now,
            candidate_state: None,
            candidate_since: None,
        }
    }

    pub fn current_state(&self) -> MachineState {
        self.state
    }

    pub fn state_since(&self) -> DateTime<Utc> {
        self.state_since
    }

    /// Stale-data override (spec §4.D): reports UNKNOWN without touching
    /// the hysteresis machine when the buffer is empty or its newest
    /// reading has gone stale. Call this instead of `process` when there
    /// is no fresh reading to classify.
    pub fn report_stale(&self, buffer_empty: bool) -> MachineStateInfo {
        let (confidence, reason) = if buffer_empty {
            (0.1, StaleReason::BufferEmpty)
        } else {
            (0.2, StaleReason::LastReadingStale)
        };
        MachineStateInfo {
            machine_id: self.machine_id.clone(),
            state: MachineState::Unknown,
            confidence,
            state_since: self.state_since,
            current_metrics: DerivedMetrics::default(),
            stale_reason: Some(reason),
        }
    }

    /// Classifies `reading` given its derived metrics and the resolved
    /// thresholds, updating and returning the machine's state snapshot.
    ///
    /// Callers (the poller) are responsible for the stale-data override:
    /// check `RingBuffer::age_of_newest` first and call `report_stale`
    /// instead when the buffer is empty or too old.
    pub fn process(
        &mut self,
        reading: &Reading,
        metrics: DerivedMetrics,
        thresholds: &ThresholdSet,
        now: DateTime<Utc>,
    ) -> MachineStateInfo {
        let (state, confidence) = if sensor_fault(reading, now, thresholds) {
            (MachineState::SensorFault, 0.3)
        } else {
            classify_instantaneous(reading, metrics, thresholds)
        };

        let (committed_state, committed_confidence) =
            self.apply_hysteresis(state, confidence, reading.timestamp, thresholds);

        MachineStateInfo {
            machine_id: self.machine_id.clone(),
            state: committed_state,
            confidence: committed_confidence,
            state_since: self.state_since,
            current_metrics: metrics,
            stale_reason: None,
        }
    }

    fn apply_hysteresis(
        &mut self,
        choice: MachineState,
        confidence: f64,
        at: DateTime<Utc>,
        thresholds: &ThresholdSet,
    ) -> (MachineState, f64) {
        if choice == self.state {
            self.candidate_state = None;
            self.candidate_since = None;
            self.confidence = confidence;
            return (self.state, self.confidence);
        }

        // Bootstrap: nothing has been observed yet, so there is no prior
        // state for a dwell to protect. Commits immediately unless the
        // first classification is PRODUCTION, which always pays the full
        // entry dwell (spec §8 S1 vs S2).
        if self.state == MachineState::Unknown && choice != MachineState::Production {
            self.state = choice;
            self.state_since = at;
            self.confidence = confidence;
            self.candidate_state = None;
            self.candidate_since = None;
            return (self.state, self.confidence);
        }

        if Some(choice) == self.candidate_state {
            let since = self.candidate_since.unwrap_or(at);
            let dwell = at - since;
            let required = required_dwell(self.state, choice, thresholds);
            if dwell >= required {
                self.state = choice;
                self.state_since = at;
                self.confidence = confidence;
                self.candidate_state = None;
                self.candidate_since = None;
            }
            return (self.state, self.confidence);
        }

        self.candidate_state = Some(choice);
        self.candidate_since = Some(at);
        (self.state, self.confidence)
    }
}

fn required_dwell(current: MachineState, candidate: MachineState, thresholds: &ThresholdSet) -> Duration {
    if candidate.is_production() {
        Duration::seconds(thresholds.production_enter_secs as i64)
    } else if current.is_production() {
        Duration::seconds(thresholds.production_exit_secs as i64)
    } else {
        Duration::seconds(thresholds.other_debounce_secs as i64)
    }
}

/// Sensor-fault precondition, checked before instantaneous classification
/// (spec §4.D).
fn sensor_fault(reading: &Reading, now: DateTime<Utc>, thresholds: &ThresholdSet) -> bool {
    if reading.screw_rpm.is_none() {
        return true;
    }
    let zones: Vec<f64> = reading.temp_zones().into_iter().flatten().collect();
    if zones.iter().any(|&z| z <= 0.0 || z < -20.0 || z > 400.0) {
        return true;
    }
    if reading.pressure == Some(0.0) && ge(reading.screw_rpm, thresholds.rpm_prod) {
        return true;
    }
    if reading.present_temp_zone_count() < 2 {
        return true;
    }
    if reading.timestamp > now + FUTURE_TOLERANCE {
        return true;
    }
    false
}

fn lt(value: Option<f64>, threshold: f64) -> bool {
    value.is_some_and(|v| v < threshold)
}

fn ge(value: Option<f64>, threshold: f64) -> bool {
    value.is_some_and(|v| v >= threshold)
}

/// Instantaneous classifier: first matching rule wins (spec §4.D).
fn classify_instantaneous(
    reading: &Reading,
    metrics: DerivedMetrics,
    t: &ThresholdSet,
) -> (MachineState, f64) {
    let rpm = reading.screw_rpm;
    let pressure = reading.pressure;
    let temp_avg = metrics.temp_avg;
    let d_temp_avg = metrics.d_temp_avg;

    // 1. OFF
    if lt(rpm, t.rpm_on) && lt(pressure, t.p_on) && lt(temp_avg, t.t_min_active) {
        return (MachineState::Off, 0.9);
    }
    if temp_avg.is_none() && lt(rpm, t.rpm_on) && lt(pressure, t.p_on) {
        return (MachineState::Off, 0.7);
    }

    // 2. COOLING
    if lt(rpm, t.rpm_on) && ge(temp_avg, t.t_min_active) && d_temp_avg.is_some_and(|d| d <= t.cooling_rate) {
        return (MachineState::Cooling, 0.8);
    }

    // 3. HEATING
    if lt(rpm, t.rpm_prod) && ge(temp_avg, t.t_min_active) && d_temp_avg.is_some_and(|d| d >= t.heating_rate) {
        return (MachineState::Heating, 0.8);
    }

    // 4. PRODUCTION primary
    if ge(rpm, t.rpm_prod) && ge(pressure, t.p_prod) {
        return (MachineState::Production, 0.9);
    }

    // 5. PRODUCTION fallback
    if ge(rpm, t.rpm_prod) {
        let pressure_ok = ge(pressure, t.p_on);
        let motor_ok = ge(
            reading.motor_load,
            crate::config::defaults::thresholds::MOTOR_LOAD_MIN_PERCENT,
        );
        let throughput_ok = ge(
            reading.throughput,
            crate::config::defaults::thresholds::THROUGHPUT_MIN_KG_H,
        );
        if pressure_ok || motor_ok || throughput_ok {
            return (MachineState::Production, if pressure_ok { 0.7 } else { 0.6 });
        }
    }

    // 6. IDLE — never when d_temp_avg is null (invariant 2)
    if let Some(d) = d_temp_avg {
        if lt(rpm, t.rpm_on) && lt(pressure, t.p_on) && ge(temp_avg, t.t_min_active) && d.abs() < t.temp_flat_rate {
            return (MachineState::Idle, 0.8);
        }
    }

    // 7. insufficient signal
    (MachineState::SensorFault, 0.3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricEngine;

    fn thresholds() -> ThresholdSet {
        ThresholdSet::default()
    }

    fn reading_at(secs: i64, rpm: Option<f64>, pressure: Option<f64>, temp: f64) -> Reading {
        Reading {
            machine_id: "M1".to_string(),
            material_id: None,
            timestamp: Utc::now() + Duration::seconds(secs),
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

    #[test]
    fn s1_off_from_cold() {
        let now = Utc::now();
        let mut detector = StateDetector::new("M1", now);
        let reading = Reading {
            timestamp: now,
            ..reading_at(0, Some(0.0), Some(0.0), 25.0)
        };
        let window = vec![reading.clone()];
        let metrics = MetricEngine::derive(&window, &reading);
        let info = detector.process(&reading, metrics, &thresholds(), now);
        assert_eq!(info.state, MachineState::Off);
        assert!((info.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn s2_production_entry_requires_full_dwell() {
        let t = thresholds();
        let start = Utc::now();
        let mut detector = StateDetector::new("M1", start);
        // seed IDLE as the starting state via direct dwell-free transition
        detector.state = MachineState::Idle;

        let mut window: Vec<Reading> = Vec::new();
        let mut last_info = None;
        // Dwell is measured from the first disqualifying reading's own
        // timestamp (spec §4.D: "Dwell is measured as (now - candidate_since)"),
        // so committing requires `PRODUCTION_ENTER` seconds to elapse *after*
        // that first reading — the 91st reading in a 1 Hz stream.
        for i in 0..91 {
            let reading = reading_at(i, Some(20.0), Some(8.0), 200.0);
            window.push(reading.clone());
            let metrics = MetricEngine::derive(&window, &reading);
            let info = detector.process(&reading, metrics, &t, reading.timestamp);
            if i < 90 {
                assert_eq!(info.state, MachineState::Idle, "reading {i} should still be IDLE");
            }
            last_info = Some(info);
        }
        assert_eq!(last_info.unwrap().state, MachineState::Production);
    }

    #[test]
    fn s8_sensor_fault_on_implausible_temperature() {
        let now = Utc::now();
        let mut detector = StateDetector::new("M1", now);
        let reading = reading_at(0, Some(20.0), Some(8.0), -50.0);
        let window = vec![reading.clone()];
        let metrics = MetricEngine::derive(&window, &reading);
        let info = detector.process(&reading, metrics, &thresholds(), now);
        assert_eq!(info.state, MachineState::SensorFault);
    }

    #[test]
    fn idle_never_returned_when_d_temp_avg_is_null() {
        let now = Utc::now();
        let mut detector = StateDetector::new("M1", now);
        let reading = reading_at(0, Some(0.0), Some(0.0), 200.0);
        let window = vec![reading.clone()]; // single sample: d_temp_avg is None
        let metrics = MetricEngine::derive(&window, &reading);
        assert!(metrics.d_temp_avg.is_none());
        let info = detector.process(&reading, metrics, &thresholds(), now);
        assert_ne!(info.state, MachineState::Idle);
    }

    #[test]
    fn adversarial_alternating_stream_never_commits_to_production() {
        let t = thresholds();
        let start = Utc::now();
        let mut detector = StateDetector::new("M1", start);
        let mut window: Vec<Reading> = Vec::new();
        for i in 0..200 {
            let production_like = i % 2 == 0;
            let reading = if production_like {
                reading_at(i, Some(20.0), Some(8.0), 200.0)
            } else {
                reading_at(i, Some(0.0), Some(0.0), 25.0)
            };
            window.push(reading.clone());
            let metrics = MetricEngine::derive(&window, &reading);
            let info = detector.process(&reading, metrics, &t, reading.timestamp);
            assert_ne!(info.state, MachineState::Production);
        }
    }

    #[test]
    fn state_since_is_monotonic_across_transitions() {
        let t = thresholds();
        let start = Utc::now();
        let mut detector = StateDetector::new("M1", start);
        let mut window: Vec<Reading> = Vec::new();
        let mut last_since = detector.state_since();
        for i in 0..200 {
            let reading = reading_at(i, Some(20.0), Some(8.0), 200.0);
            window.push(reading.clone());
            let metrics = MetricEngine::derive(&window, &reading);
            let info = detector.process(&reading, metrics, &t, reading.timestamp);
            assert!(info.state_since >= last_since);
            last_since = info.state_since;
        }
    }
}
