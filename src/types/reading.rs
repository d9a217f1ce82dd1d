//! The `Reading` row and the set of metric names the rest of the crate
//! agrees on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One historian row for one machine.
///
/// Every sensor field is `Option<f64>` because the historian may omit a
/// column entirely for a given poll. Absence must never be coerced to
/// `0.0` — derived metrics and the state detector both depend on being able
/// to tell "sensor silent" from "sensor reads zero".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub machine_id: String,
    pub material_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub screw_rpm: Option<f64>,
    pub pressure: Option<f64>,
    pub temp_zone_1: Option<f64>,
    pub temp_zone_2: Option<f64>,
    pub temp_zone_3: Option<f64>,
    pub temp_zone_4: Option<f64>,
    pub motor_load: Option<f64>,
    pub throughput: Option<f64>,
}

impl Reading {
    /// The four temperature zones as a fixed-size array, for iteration.
    pub fn temp_zones(&self) -> [Option<f64>; 4] {
        [
            self.temp_zone_1,
            self.temp_zone_2,
            self.temp_zone_3,
            self.temp_zone_4,
        ]
    }

    /// Number of temperature zones with a present (non-null) value.
    pub fn present_temp_zone_count(&self) -> usize {
        self.temp_zones().iter().filter(|z| z.is_some()).count()
    }
}

/// Canonical metric names used across the metric engine, baseline learner,
/// and evaluator. Kept as `&'static str` rather than an enum because the
/// baseline store keys samples and stats by name and the set needs to stay
/// open for per-deployment metrics without a crate release.
pub mod metric_names {
    pub const SCREW_RPM: &str = "screw_rpm";
    pub const PRESSURE: &str = "pressure";
    pub const TEMP_ZONE_1: &str = "temp_zone_1";
    pub const TEMP_ZONE_2: &str = "temp_zone_2";
    pub const TEMP_ZONE_3: &str = "temp_zone_3";
    pub const TEMP_ZONE_4: &str = "temp_zone_4";
    pub const TEMP_AVG: &str = "temp_avg";
    pub const TEMP_SPREAD: &str = "temp_spread";

    /// Metrics that must reach `MIN_SAMPLES_PER_METRIC` before a baseline
    /// can be finalized (spec §4.F).
    pub const EXPECTED_BASELINE_METRICS: &[&str] = &[
        SCREW_RPM,
        PRESSURE,
        TEMP_ZONE_1,
        TEMP_ZONE_2,
        TEMP_ZONE_3,
        TEMP_ZONE_4,
        TEMP_AVG,
        TEMP_SPREAD,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading_with_zones(zones: [Option<f64>; 4]) -> Reading {
        Reading {
            machine_id: "M1".into(),
            material_id: None,
            timestamp: Utc::now(),
            screw_rpm: None,
            pressure: None,
            temp_zone_1: zones[0],
            temp_zone_2: zones[1],
            temp_zone_3: zones[2],
            temp_zone_4: zones[3],
            motor_load: None,
            throughput: None,
        }
    }

    #[test]
    fn present_temp_zone_count_counts_only_some() {
        let r = reading_with_zones([Some(1.0), None, Some(3.0), None]);
        assert_eq!(r.present_temp_zone_count(), 2);
    }

    #[test]
    fn present_temp_zone_count_zero_when_all_absent() {
        let r = reading_with_zones([None, None, None, None]);
        assert_eq!(r.present_temp_zone_count(), 0);
    }
}
