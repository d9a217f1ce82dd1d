//! Evaluator: pure function from a reading, its derived metrics, the
//! current machine state, an optional resolved profile's baseline stats,
//! and an optional ML anomaly score, to a `ProcessEvaluation` (spec §4.G).
//!
//! No side effects and no fallible calls — every input is either present
//! or treated as absent, never an error. This is deliberate (spec §7:
//! "Evaluator errors are pure... return an unknown severity rather than
//! raising").

use std::collections::HashMap;

use crate::config::defaults::evaluator as defaults;
use crate::types::metric_names::{
    PRESSURE, SCREW_RPM, TEMP_AVG, TEMP_SPREAD, TEMP_ZONE_1, TEMP_ZONE_2, TEMP_ZONE_3, TEMP_ZONE_4,
};
use crate::types::{
    BaselineStats, DerivedMetrics, GreenBand, MachineState, MachineStateInfo, MetricEvaluation,
    ProcessEvaluation, Reading, Severity, Stability,
};

/// Metrics evaluated against a baseline, in the order they appear in
/// `ProcessEvaluation::metrics`. `TEMP_SPREAD` is handled separately since
/// it never consults a baseline (spec §4.G "Temperature spread special
/// case").
const BASELINE_METRICS: &[&str] = &[
    SCREW_RPM,
    PRESSURE,
    TEMP_ZONE_1,
    TEMP_ZONE_2,
    TEMP_ZONE_3,
    TEMP_ZONE_4,
    TEMP_AVG,
];

pub struct Evaluator;

impl Evaluator {
    /// `profile_ready` is `Some(material_id)` when a profile resolved for
    /// this reading and its baseline is finalized; `stats` holds that
    /// profile's per-metric `BaselineStats`, looked up by the caller. When
    /// `profile_ready` is `None` (no profile, or not yet finalized), every
    /// baseline-dependent metric reports `severity = unknown`.
    pub fn evaluate(
        reading: &Reading,
        state_info: &MachineStateInfo,
        derived: &DerivedMetrics,
        profile_ready: Option<&str>,
        stats: &HashMap<String, BaselineStats>,
        ml_score: Option<f64>,
    ) -> ProcessEvaluation {
        let state_gate = state_info.state != MachineState::Production;

        let mut metrics = Vec::with_capacity(BASELINE_METRICS.len() + 1);
        for &metric_name in BASELINE_METRICS {
            metrics.push(evaluate_baseline_metric(
                metric_name,
                metric_value(reading, derived, metric_name),
                state_gate,
                profile_ready,
                stats.get(metric_name),
                derived,
            ));
        }
        let spread_eval = evaluate_temp_spread(derived.temp_spread, state_gate);
        metrics.push(spread_eval.clone());

        let process_status = if state_gate {
            Severity::Unknown
        } else {
            metrics
                .iter()
                .fold(Severity::Unknown, |acc, m| acc.max(m.severity))
        };

        let spread_status = severity_to_stability(spread_eval.severity);

        let ml_warning_flag = if state_gate {
            false
        } else {
            ml_score
                .map(|score| score >= defaults::ML_WARNING_SCORE_THRESHOLD)
                .unwrap_or(false)
        };

        let process_status_text = if state_gate {
            format!("Process evaluation disabled — machine is in {}", state_info.state)
        } else {
            match process_status {
                Severity::Green => "Process stable".to_string(),
                Severity::Orange => "Process drifting from baseline".to_string(),
                Severity::Red => "High risk of instability or scrap".to_string(),
                Severity::Unknown => "Process evaluation disabled — baseline not ready".to_string(),
            }
        };

        ProcessEvaluation {
            machine_id: state_info.machine_id.clone(),
            process_status,
            process_status_text,
            spread_status,
            ml_warning_flag,
            metrics,
        }
    }
}

/// Exposed for the poller, which needs the same reading/derived-metric
/// lookup to feed the baseline learner (spec §4.F ingest) with the value
/// the evaluator would itself score.
pub(crate) fn metric_value(reading: &Reading, derived: &DerivedMetrics, metric_name: &str) -> Option<f64> {
    match metric_name {
        SCREW_RPM => reading.screw_rpm,
        PRESSURE => reading.pressure,
        TEMP_ZONE_1 => reading.temp_zone_1,
        TEMP_ZONE_2 => reading.temp_zone_2,
        TEMP_ZONE_3 => reading.temp_zone_3,
        TEMP_ZONE_4 => reading.temp_zone_4,
        TEMP_AVG => derived.temp_avg,
        TEMP_SPREAD => derived.temp_spread,
        _ => None,
    }
}

fn current_std_for(metric_name: &str, derived: &DerivedMetrics) -> Option<f64> {
    match metric_name {
        SCREW_RPM => derived.rpm_stability,
        PRESSURE => derived.pressure_stability,
        _ => None,
    }
}

#[allow(clippy::too_many_arguments)]
fn evaluate_baseline_metric(
    metric_name: &str,
    value: Option<f64>,
    state_gate: bool,
    profile_ready: Option<&str>,
    stats: Option<&BaselineStats>,
    derived: &DerivedMetrics,
) -> MetricEvaluation {
    let unknown = MetricEvaluation {
        metric_name: metric_name.to_string(),
        value,
        baseline_mean: None,
        green_band: None,
        deviation: None,
        deviation_percent: None,
        severity: Severity::Unknown,
        stability: Stability::Unknown,
        baseline_material: None,
        baseline_confidence: None,
    };

    if state_gate {
        return unknown;
    }
    let (Some(material), Some(stats)) = (profile_ready, stats) else {
        return unknown;
    };
    let Some(v) = value else {
        return MetricEvaluation {
            baseline_mean: Some(stats.mean),
            baseline_material: Some(material.to_string()),
            baseline_confidence: Some(baseline_confidence(stats.sample_count)),
            ..unknown
        };
    };

    let band = green_band_for(stats);
    let (rule_severity, deviation, deviation_percent) = apply_severity_rule(v, band, stats.mean);
    let stability = stability_for(current_std_for(metric_name, derived), stats.std);
    let severity = elevate_for_stability(rule_severity, stability);

    MetricEvaluation {
        metric_name: metric_name.to_string(),
        value,
        baseline_mean: Some(stats.mean),
        green_band: Some(band),
        deviation: Some(deviation),
        deviation_percent,
        severity,
        stability,
        baseline_material: Some(material.to_string()),
        baseline_confidence: Some(baseline_confidence(stats.sample_count)),
    }
}

fn evaluate_temp_spread(value: Option<f64>, state_gate: bool) -> MetricEvaluation {
    let severity = if state_gate {
        Severity::Unknown
    } else {
        match value {
            None => Severity::Unknown,
            Some(spread) if spread <= defaults::TEMP_SPREAD_GREEN_MAX => Severity::Green,
            Some(spread) if spread <= defaults::TEMP_SPREAD_ORANGE_MAX => Severity::Orange,
            Some(_) => Severity::Red,
        }
    };
    MetricEvaluation {
        metric_name: TEMP_SPREAD.to_string(),
        value,
        baseline_mean: None,
        green_band: None,
        deviation: None,
        deviation_percent: None,
        severity,
        stability: Stability::Unknown,
        baseline_material: None,
        baseline_confidence: None,
    }
}

fn green_band_for(stats: &BaselineStats) -> GreenBand {
    if stats.p95 > stats.p05 {
        return GreenBand {
            min: stats.p05,
            max: stats.p95,
        };
    }
    if stats.std > 0.0 {
        return GreenBand {
            min: stats.mean - stats.std,
            max: stats.mean + stats.std,
        };
    }
    let a = 0.95 * stats.mean;
    let b = 1.05 * stats.mean;
    GreenBand {
        min: a.min(b),
        max: a.max(b),
    }
}

/// The 3-5% band rule (spec §4.G "Severity rule").
fn apply_severity_rule(value: f64, band: GreenBand, mean: f64) -> (Severity, f64, Option<f64>) {
    let deviation = value - mean;
    let percent = if mean != 0.0 {
        Some(deviation / mean * 100.0)
    } else {
        None
    };
    if band.contains(value) {
        return (Severity::Green, deviation, percent);
    }
    let d = if mean != 0.0 {
        (deviation / mean).abs()
    } else {
        f64::INFINITY
    };
    let severity = if d > defaults::SEVERITY_RED_DEVIATION {
        Severity::Red
    } else {
        Severity::Orange
    };
    (severity, deviation, percent)
}

fn stability_for(current_std: Option<f64>, baseline_std: f64) -> Stability {
    let (Some(current), true) = (current_std, baseline_std > 0.0) else {
        return Stability::Unknown;
    };
    let ratio = current / baseline_std;
    if ratio <= defaults::STABILITY_ORANGE_RATIO {
        Stability::Green
    } else if ratio <= defaults::STABILITY_RED_RATIO {
        Stability::Orange
    } else {
        Stability::Red
    }
}

/// Elevates severity to match an orange/green stability override; never
/// downgrades (spec §4.G point 4).
fn elevate_for_stability(rule_severity: Severity, stability: Stability) -> Severity {
    match stability {
        Stability::Orange => rule_severity.max(Severity::Orange),
        Stability::Red => rule_severity.max(Severity::Red),
        _ => rule_severity,
    }
}

fn severity_to_stability(severity: Severity) -> Stability {
    match severity {
        Severity::Green => Stability::Green,
        Severity::Orange => Stability::Orange,
        Severity::Red => Stability::Red,
        Severity::Unknown => Stability::Unknown,
    }
}

fn baseline_confidence(sample_count: usize) -> f64 {
    if sample_count >= 100 {
        1.0
    } else if sample_count >= 50 {
        0.9
    } else if sample_count >= 30 {
        0.8
    } else if sample_count >= 10 {
        0.7
    } else {
        0.6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(pressure: Option<f64>, zones: [Option<f64>; 4]) -> Reading {
        Reading {
            machine_id: "M1".to_string(),
            material_id: Some("PP-H".to_string()),
            timestamp: Utc::now(),
            screw_rpm: Some(20.0),
            pressure,
            temp_zone_1: zones[0],
            temp_zone_2: zones[1],
            temp_zone_3: zones[2],
            temp_zone_4: zones[3],
            motor_load: None,
            throughput: None,
        }
    }

    fn production_state() -> MachineStateInfo {
        MachineStateInfo {
            machine_id: "M1".to_string(),
            state: MachineState::Production,
            confidence: 0.9,
            state_since: Utc::now(),
            current_metrics: DerivedMetrics::default(),
            stale_reason: None,
        }
    }

    fn pressure_stats(mean: f64, std: f64, p05: f64, p95: f64) -> HashMap<String, BaselineStats> {
        let mut stats = HashMap::new();
        stats.insert(
            PRESSURE.to_string(),
            BaselineStats {
                mean,
                std,
                p05,
                p95,
                sample_count: 120,
            },
        );
        stats
    }

    #[test]
    fn state_gate_forces_unknown_for_every_metric() {
        let r = reading(Some(370.5), [Some(200.0); 4]);
        let mut state = production_state();
        state.state = MachineState::Heating;
        let derived = DerivedMetrics {
            temp_avg: Some(200.0),
            temp_spread: Some(0.0),
            ..Default::default()
        };
        let eval = Evaluator::evaluate(&r, &state, &derived, Some("PP-H"), &pressure_stats(370.0, 1.2, 352.0, 389.0), None);
        assert_eq!(eval.process_status, Severity::Unknown);
        assert!(eval.metrics.iter().all(|m| m.severity == Severity::Unknown));
        assert!(eval.process_status_text.contains("HEATING"));
    }

    #[test]
    fn baseline_gate_still_evaluates_temp_spread() {
        let r = reading(Some(370.5), [Some(180.0), Some(181.0), Some(182.0), Some(200.0)]);
        let state = production_state();
        let derived = DerivedMetrics {
            temp_avg: Some(185.75),
            temp_spread: Some(20.0),
            ..Default::default()
        };
        let eval = Evaluator::evaluate(&r, &state, &derived, None, &HashMap::new(), None);
        let spread = eval.metrics.iter().find(|m| m.metric_name == TEMP_SPREAD).unwrap();
        assert_eq!(spread.severity, Severity::Red);
        assert_eq!(eval.process_status, Severity::Red);
    }

    #[test]
    fn green_evaluation_inside_band() {
        let r = reading(Some(370.5), [Some(200.0); 4]);
        let state = production_state();
        let derived = DerivedMetrics {
            temp_avg: Some(200.0),
            temp_spread: Some(0.0),
            pressure_stability: Some(1.1),
            ..Default::default()
        };
        let stats = pressure_stats(370.0, 1.2, 352.0, 389.0);
        let eval = Evaluator::evaluate(&r, &state, &derived, Some("PP-H"), &stats, None);
        let pressure = eval.metrics.iter().find(|m| m.metric_name == PRESSURE).unwrap();
        assert_eq!(pressure.severity, Severity::Green);
        assert_eq!(pressure.stability, Stability::Green);
    }

    #[test]
    fn stability_override_elevates_without_downgrading() {
        let r = reading(Some(371.0), [Some(200.0); 4]);
        let state = production_state();
        let derived = DerivedMetrics {
            temp_avg: Some(200.0),
            temp_spread: Some(0.0),
            pressure_stability: Some(1.92),
            ..Default::default()
        };
        let stats = pressure_stats(370.0, 1.2, 352.0, 389.0);
        let eval = Evaluator::evaluate(&r, &state, &derived, Some("PP-H"), &stats, None);
        let pressure = eval.metrics.iter().find(|m| m.metric_name == PRESSURE).unwrap();
        assert_eq!(pressure.stability, Stability::Orange);
        assert_eq!(pressure.severity, Severity::Orange);
        assert_eq!(eval.process_status, Severity::Orange);
    }

    #[test]
    fn red_by_rule_deviation() {
        let r = reading(Some(395.0), [Some(200.0); 4]);
        let state = production_state();
        let derived = DerivedMetrics {
            temp_avg: Some(200.0),
            temp_spread: Some(0.0),
            ..Default::default()
        };
        let stats = pressure_stats(370.0, 1.2, 352.0, 389.0);
        let eval = Evaluator::evaluate(&r, &state, &derived, Some("PP-H"), &stats, None);
        let pressure = eval.metrics.iter().find(|m| m.metric_name == PRESSURE).unwrap();
        assert_eq!(pressure.severity, Severity::Red);
        assert_eq!(eval.process_status, Severity::Red);
        assert_eq!(eval.process_status_text, "High risk of instability or scrap");
    }

    #[test]
    fn ml_score_never_changes_severity_only_the_flag() {
        let r = reading(Some(370.5), [Some(200.0); 4]);
        let state = production_state();
        let derived = DerivedMetrics {
            temp_avg: Some(200.0),
            temp_spread: Some(0.0),
            pressure_stability: Some(1.1),
            ..Default::default()
        };
        let stats = pressure_stats(370.0, 1.2, 352.0, 389.0);
        let without_ml = Evaluator::evaluate(&r, &state, &derived, Some("PP-H"), &stats, Some(0.0));
        let with_ml = Evaluator::evaluate(&r, &state, &derived, Some("PP-H"), &stats, Some(1.0));
        assert_eq!(without_ml.process_status, with_ml.process_status);
        for (a, b) in without_ml.metrics.iter().zip(with_ml.metrics.iter()) {
            assert_eq!(a.severity, b.severity);
        }
        assert!(!without_ml.ml_warning_flag);
        assert!(with_ml.ml_warning_flag);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn reading(pressure: Option<f64>, zones: [Option<f64>; 4]) -> Reading {
        Reading {
            machine_id: "M1".to_string(),
            material_id: Some("PP-H".to_string()),
            timestamp: Utc::now(),
            screw_rpm: Some(20.0),
            pressure,
            temp_zone_1: zones[0],
            temp_zone_2: zones[1],
            temp_zone_3: zones[2],
            temp_zone_4: zones[3],
            motor_load: None,
            throughput: None,
        }
    }

    fn state_info(state: MachineState) -> MachineStateInfo {
        MachineStateInfo {
            machine_id: "M1".to_string(),
            state,
            confidence: 0.9,
            state_since: Utc::now(),
            current_metrics: DerivedMetrics::default(),
            stale_reason: None,
        }
    }

    fn pressure_stats(mean: f64, std: f64, p05: f64, p95: f64) -> HashMap<String, BaselineStats> {
        let mut stats = HashMap::new();
        stats.insert(
            PRESSURE.to_string(),
            BaselineStats { mean, std, p05, p95, sample_count: 120 },
        );
        stats
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// `process_status` is always one of the four declared severities,
        /// and never panics, across arbitrary readings and baseline stats.
        #[test]
        fn severity_is_always_in_range(
            pressure in 0.0..1000.0f64,
            temp in 0.0..400.0f64,
            mean in 1.0..1000.0f64,
            std in 0.0..50.0f64,
        ) {
            let r = reading(Some(pressure), [Some(temp); 4]);
            let state = state_info(MachineState::Production);
            let derived = DerivedMetrics {
                temp_avg: Some(temp),
                temp_spread: Some(0.0),
                ..Default::default()
            };
            let stats = pressure_stats(mean, std, mean - std, mean + std);
            let eval = Evaluator::evaluate(&r, &state, &derived, Some("PP-H"), &stats, None);
            prop_assert!(matches!(
                eval.process_status,
                Severity::Green | Severity::Orange | Severity::Red | Severity::Unknown
            ));
        }

        /// Any non-PRODUCTION state forces every metric to Unknown,
        /// regardless of how favorable the reading and baseline are
        /// (invariant: state gate dominates, spec §4.G point 1).
        #[test]
        fn non_production_state_always_forces_unknown(
            pressure in 0.0..1000.0f64,
            temp in 0.0..400.0f64,
            state_idx in 0..5usize,
        ) {
            let states = [
                MachineState::Off,
                MachineState::Idle,
                MachineState::Heating,
                MachineState::Cooling,
                MachineState::SensorFault,
            ];
            let r = reading(Some(pressure), [Some(temp); 4]);
            let state = state_info(states[state_idx]);
            let derived = DerivedMetrics {
                temp_avg: Some(temp),
                temp_spread: Some(0.0),
                ..Default::default()
            };
            let stats = pressure_stats(370.0, 1.2, 352.0, 389.0);
            let eval = Evaluator::evaluate(&r, &state, &derived, Some("PP-H"), &stats, None);
            prop_assert_eq!(eval.process_status, Severity::Unknown);
            prop_assert!(eval.metrics.iter().all(|m| m.severity == Severity::Unknown));
        }

        /// The ML score never changes a metric's rule-derived severity,
        /// only `ml_warning_flag` (invariant 8, spec §8).
        #[test]
        fn ml_score_is_orthogonal_to_severity(
            pressure in 0.0..1000.0f64,
            ml_a in 0.0..1.0f64,
            ml_b in 0.0..1.0f64,
        ) {
            let r = reading(Some(pressure), [Some(200.0); 4]);
            let state = state_info(MachineState::Production);
            let derived = DerivedMetrics {
                temp_avg: Some(200.0),
                temp_spread: Some(0.0),
                ..Default::default()
            };
            let stats = pressure_stats(370.0, 1.2, 352.0, 389.0);
            let a = Evaluator::evaluate(&r, &state, &derived, Some("PP-H"), &stats, Some(ml_a));
            let b = Evaluator::evaluate(&r, &state, &derived, Some("PP-H"), &stats, Some(ml_b));
            prop_assert_eq!(a.process_status, b.process_status);
            for (ma, mb) in a.metrics.iter().zip(b.metrics.iter()) {
                prop_assert_eq!(ma.severity, mb.severity);
            }
        }

        /// TEMP_SPREAD is evaluated independently of whether a baseline
        /// profile resolved at all (spec §4.G "Temperature spread special
        /// case"): it reports a real severity even with no profile_ready.
        #[test]
        fn temp_spread_ignores_profile_readiness(spread in 0.0..20.0f64) {
            let r = reading(Some(370.0), [Some(180.0), Some(181.0), Some(182.0), Some(183.0)]);
            let state = state_info(MachineState::Production);
            let derived = DerivedMetrics {
                temp_avg: Some(181.5),
                temp_spread: Some(spread),
                ..Default::default()
            };
            let eval = Evaluator::evaluate(&r, &state, &derived, None, &HashMap::new(), None);
            let spread_eval = eval.metrics.iter().find(|m| m.metric_name == TEMP_SPREAD).unwrap();
            prop_assert_ne!(spread_eval.severity, Severity::Unknown);
        }
    }
}
