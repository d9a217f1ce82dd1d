//! Monitor Configuration Module
//!
//! Loads the pipeline's configuration from TOML, replacing every hardcoded
//! threshold with an operator-tunable value.
//!
//! ## Loading Order
//!
//! 1. `EXTRUDER_CONFIG` environment variable (path to TOML file)
//! 2. `monitor_config.toml` in the current working directory
//! 3. Built-in defaults (matching the spec's hardcoded values)
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! config::init(MonitorConfig::load());
//! let thresholds = config::get().resolve_thresholds("extruder-1");
//! ```
//!
//! Configuration is shared read-mostly (spec §5): `get()` returns a cheap
//! `Arc` snapshot, and `reload()` atomically swaps in a freshly loaded one
//! without invalidating snapshots readers already hold.

mod monitor_config;
pub mod defaults;
pub mod validation;
pub mod watcher;

pub use monitor_config::*;

use arc_swap::ArcSwap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

static MONITOR_CONFIG: OnceLock<ArcSwap<MonitorConfig>> = OnceLock::new();
static CONFIG_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Initialize the global monitor configuration.
///
/// Must be called exactly once before any calls to `get()`. Panics if
/// called more than once — a missing or re-initialized config is a startup
/// bug, not a recoverable condition.
pub fn init(config: MonitorConfig) {
    if MONITOR_CONFIG.set(ArcSwap::from_pointee(config)).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Initialize the global config and remember the file path it was loaded
/// from, so the watcher knows what to re-read on reload.
pub fn init_from_path(config: MonitorConfig, path: Option<PathBuf>) {
    init(config);
    let _ = CONFIG_PATH.set(path);
}

/// Get a snapshot of the global monitor configuration.
///
/// Panics if `init()` has not been called.
pub fn get() -> Arc<MonitorConfig> {
    MONITOR_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
        .load_full()
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    MONITOR_CONFIG.get().is_some()
}

/// A single field that changed value across a reload, for logging.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub field: String,
    pub old: String,
    pub new: String,
}

/// Re-read the config file this process was started with and atomically
/// swap it into the global slot. Readers mid-poll keep their already-loaded
/// `Arc` snapshot (spec §5: "each poller re-reads config at most once per
/// cycle").
pub fn reload() -> Result<Vec<ConfigChange>, ConfigError> {
    let slot = MONITOR_CONFIG
        .get()
        .expect("config::reload() called before config::init()");
    let path = CONFIG_PATH
        .get()
        .cloned()
        .flatten()
        .unwrap_or_else(|| PathBuf::from("monitor_config.toml"));

    let new_config = MonitorConfig::load_from_file(&path)?;
    let old_config = slot.load_full();
    let changes = diff(&old_config, &new_config);
    slot.store(Arc::new(new_config));
    Ok(changes)
}

/// Coarse top-level diff, enough to log what moved without walking every
/// per-machine override.
fn diff(old: &MonitorConfig, new: &MonitorConfig) -> Vec<ConfigChange> {
    let mut changes = Vec::new();
    macro_rules! field {
        ($label:expr, $old:expr, $new:expr) => {
            if $old != $new {
                changes.push(ConfigChange {
                    field: $label.to_string(),
                    old: format!("{:?}", $old),
                    new: format!("{:?}", $new),
                });
            }
        };
    }
    field!("historian.enabled", old.historian.enabled, new.historian.enabled);
    field!(
        "poll.interval_seconds",
        old.poll.interval_seconds,
        new.poll.interval_seconds
    );
    field!(
        "baseline.min_samples_for_finalize",
        old.baseline.min_samples_for_finalize,
        new.baseline.min_samples_for_finalize
    );
    field!("thresholds.rpm_on", old.thresholds.rpm_on, new.thresholds.rpm_on);
    field!(
        "thresholds.rpm_prod",
        old.thresholds.rpm_prod,
        new.thresholds.rpm_prod
    );
    field!(
        "machine_overrides.count",
        old.machine_overrides.len(),
        new.machine_overrides.len()
    );
    changes
}
