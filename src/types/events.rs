//! Events published to the event sink (spec §4.H).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::MachineState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransitionEvent {
    pub machine_id: String,
    pub from_state: MachineState,
    pub to_state: MachineState,
    pub at: DateTime<Utc>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialChangeEvent {
    pub machine_id: String,
    pub previous_material: Option<String>,
    pub new_material: String,
    pub at: DateTime<Utc>,
}
