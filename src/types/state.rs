//! Machine operating states and the per-machine state snapshot (spec §3, §4.D).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::metrics::DerivedMetrics;

/// The six states the hysteresis filter can commit to, plus the
/// reporting-only `Unknown` indicator used when data is missing or stale.
/// `Unknown` never enters the hysteresis machine (spec §4.D, stale-data
/// override).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineState {
    Off,
    Heating,
    Idle,
    Production,
    Cooling,
    SensorFault,
    Unknown,
}

impl MachineState {
    pub fn is_production(self) -> bool {
        matches!(self, MachineState::Production)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MachineState::Off => "OFF",
            MachineState::Heating => "HEATING",
            MachineState::Idle => "IDLE",
            MachineState::Production => "PRODUCTION",
            MachineState::Cooling => "COOLING",
            MachineState::SensorFault => "SENSOR_FAULT",
            MachineState::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Why the stale-data override fired, when it did. Kept distinct from the
/// state itself so callers can tell "never saw a reading" from "readings
/// stopped arriving".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaleReason {
    BufferEmpty,
    LastReadingStale,
}

/// Per-machine state snapshot, updated on every reading (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineStateInfo {
    pub machine_id: String,
    pub state: MachineState,
    pub confidence: f64,
    pub state_since: DateTime<Utc>,
    pub current_metrics: DerivedMetrics,
    pub stale_reason: Option<StaleReason>,
}

impl MachineStateInfo {
    pub fn fresh(machine_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            machine_id: machine_id.into(),
            state: MachineState::Unknown,
            confidence: 0.1,
            state_since: now,
            current_metrics: DerivedMetrics::default(),
            stale_reason: Some(StaleReason::BufferEmpty),
        }
    }
}
