//! Built-in default constants, grouped by subsystem (spec §4.D table, §6
//! Configuration surface).

use std::time::Duration;

/// State detector thresholds (spec §4.D).
pub mod thresholds {
    pub const RPM_ON: f64 = 5.0;
    pub const RPM_PROD: f64 = 10.0;
    pub const P_ON: f64 = 2.0;
    pub const P_PROD: f64 = 5.0;
    pub const T_MIN_ACTIVE: f64 = 60.0;
    pub const HEATING_RATE: f64 = 0.2;
    pub const COOLING_RATE: f64 = -0.2;
    pub const TEMP_FLAT_RATE: f64 = 0.2;
    pub const PRODUCTION_ENTER_SECS: u64 = 90;
    pub const PRODUCTION_EXIT_SECS: u64 = 120;
    pub const OTHER_DEBOUNCE_SECS: u64 = 60;

    /// Production fallback gate (spec §4.D rule 5): minimum motor load percent.
    pub const MOTOR_LOAD_MIN_PERCENT: f64 = 15.0;
    /// Production fallback gate: minimum throughput in kg/h.
    pub const THROUGHPUT_MIN_KG_H: f64 = 0.1;
}

/// Polling cadence and window sizing (spec §5, §6).
pub mod poll {
    use super::Duration;

    pub const INTERVAL_SECONDS: u64 = 60;
    pub const WINDOW_MINUTES: u64 = 10;
    pub const MAX_ROWS_PER_POLL: usize = 5000;
    /// Ring buffer capacity for 10 minutes of data at the historian's
    /// minimum emission rate of 1 Hz (spec §4.B).
    pub const RING_BUFFER_CAPACITY: usize = 600;
    pub const HISTORIAN_FETCH_DEADLINE: Duration = Duration::from_secs(30);
    pub const SINK_PUBLISH_DEADLINE: Duration = Duration::from_secs(2);
    pub const BACKOFF_BASE: Duration = Duration::from_secs(2);
    pub const BACKOFF_CAP: Duration = Duration::from_secs(60);
    /// How stale the newest buffered reading may be before the state
    /// detector reports UNKNOWN instead of a committed state (spec §4.D).
    pub const STALE_READING_SECS: i64 = 300;
}

/// Baseline learner defaults (spec §4.F).
pub mod baseline {
    pub const MIN_SAMPLES_PER_METRIC: usize = 100;
}

/// Evaluator defaults (spec §4.G).
pub mod evaluator {
    pub const SEVERITY_ORANGE_DEVIATION: f64 = 0.03;
    pub const SEVERITY_RED_DEVIATION: f64 = 0.05;
    pub const STABILITY_ORANGE_RATIO: f64 = 1.2;
    pub const STABILITY_RED_RATIO: f64 = 1.6;
    pub const TEMP_SPREAD_GREEN_MAX: f64 = 5.0;
    pub const TEMP_SPREAD_ORANGE_MAX: f64 = 8.0;
    /// Score at or above which the ML client's anomaly score sets
    /// `ml_warning_flag` (spec §4.H: "the core uses the returned score only
    /// to set the ml_warning flag").
    pub const ML_WARNING_SCORE_THRESHOLD: f64 = 0.5;
}

/// Graceful-shutdown and ML client defaults (SPEC_FULL §6).
pub mod service {
    use super::Duration;

    pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);
    pub const ML_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
}
