//! Derived quantities computed by the metric engine from a window of
//! readings (spec §3, §4.C).

use serde::{Deserialize, Serialize};

/// Secondary quantities derived from a ring-buffer snapshot plus the current
/// reading. Every field is null-safe: an absent input never becomes a zero,
/// it propagates as `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub temp_avg: Option<f64>,
    pub temp_spread: Option<f64>,
    pub d_temp_avg: Option<f64>,
    pub rpm_stability: Option<f64>,
    pub pressure_stability: Option<f64>,
}
