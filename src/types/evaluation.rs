//! Evaluator output types (spec §4.G).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-sensor severity. `Unknown` is distinct from `Green` — it means the
/// state or baseline gate fired, not that the value was judged normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Green,
    Orange,
    Red,
    Unknown,
}

impl Severity {
    /// Numeric rank used to take the maximum across metrics and to compare
    /// against a stability override without ever downgrading (spec §4.G
    /// point 4). `Unknown` ranks below `Green` so it never wins a max().
    fn rank(self) -> u8 {
        match self {
            Severity::Unknown => 0,
            Severity::Green => 1,
            Severity::Orange => 2,
            Severity::Red => 3,
        }
    }

    pub fn max(self, other: Severity) -> Severity {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Green => "green",
            Severity::Orange => "orange",
            Severity::Red => "red",
            Severity::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Stability classification derived from the ratio of current to baseline
/// standard deviation (spec §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stability {
    Green,
    Orange,
    Red,
    Unknown,
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stability::Green => "green",
            Stability::Orange => "orange",
            Stability::Red => "red",
            Stability::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// `[min, max]` considered normal for a metric (spec §4.G green-band
/// derivation).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GreenBand {
    pub min: f64,
    pub max: f64,
}

impl GreenBand {
    pub fn contains(self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }
}

/// Full per-metric evaluation result (spec §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvaluation {
    pub metric_name: String,
    pub value: Option<f64>,
    pub baseline_mean: Option<f64>,
    pub green_band: Option<GreenBand>,
    pub deviation: Option<f64>,
    pub deviation_percent: Option<f64>,
    pub severity: Severity,
    pub stability: Stability,
    pub baseline_material: Option<String>,
    pub baseline_confidence: Option<f64>,
}

/// Aggregate evaluation snapshot for a machine at an instant (spec §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEvaluation {
    pub machine_id: String,
    pub process_status: Severity,
    pub process_status_text: String,
    pub spread_status: Stability,
    pub ml_warning_flag: bool,
    pub metrics: Vec<MetricEvaluation>,
}
