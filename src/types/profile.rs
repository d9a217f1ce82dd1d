//! Profile and baseline data model (spec §3, §4.E, §4.F).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A (machine, material) scope under which baseline stats are learned.
/// `machine_id = None` denotes the material-default profile used as a
/// fallback when no machine-specific profile exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub profile_id: String,
    pub machine_id: Option<String>,
    pub material_id: String,
    pub baseline_learning: bool,
    pub baseline_ready: bool,
}

impl Profile {
    /// A fresh profile: learning begins immediately so samples accumulate as
    /// soon as production is observed (spec §4.E).
    pub fn new(profile_id: impl Into<String>, machine_id: Option<String>, material_id: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            machine_id,
            material_id: material_id.into(),
            baseline_learning: true,
            baseline_ready: false,
        }
    }

    /// Invariant 1: learning and ready are mutually exclusive.
    pub fn flags_consistent(&self) -> bool {
        !(self.baseline_learning && self.baseline_ready)
    }
}

/// One observation collected while a profile is learning (spec §4.F).
/// Mutable only during learning; deleted on finalize or reset-with-archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSample {
    pub profile_id: String,
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Immutable per-metric statistics produced by `finalize` (spec §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub mean: f64,
    pub std: f64,
    pub p05: f64,
    pub p95: f64,
    pub sample_count: usize,
}

/// A snapshot of `BaselineStats` retained under `reset(archive: true)`, with
/// the moment it was archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedBaseline {
    pub profile_id: String,
    pub metric_name: String,
    pub stats: BaselineStats,
    pub archived_at: DateTime<Utc>,
}
