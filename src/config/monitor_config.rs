//! Monitor configuration — every threshold and connection parameter the
//! pipeline needs is an operator-tunable TOML value here, matching the
//! original hardcoded defaults exactly when no config file is present.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults::{poll as poll_defaults, thresholds as threshold_defaults};

// ============================================================================
// Config Provenance — tracks which keys the user explicitly set
// ============================================================================

/// Tracks which configuration keys were explicitly present in the user's
/// TOML file, so callers can distinguish an explicit choice from a default
/// that merely happens to match.
#[derive(Debug, Clone, Default)]
pub struct ConfigProvenance {
    pub explicit_keys: HashSet<String>,
}

impl ConfigProvenance {
    pub fn is_user_set(&self, dotted_key: &str) -> bool {
        self.explicit_keys.contains(dotted_key)
    }
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a monitor deployment.
///
/// Load with `MonitorConfig::load()`, which searches:
/// 1. `$EXTRUDER_CONFIG` env var
/// 2. `./monitor_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub historian: HistorianConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub baseline: BaselineConfig,
    #[serde(default)]
    pub thresholds: ThresholdSet,
    /// Per-machine overrides of any subset of `thresholds` (spec §6).
    #[serde(default)]
    pub machine_overrides: HashMap<String, ThresholdOverrides>,
    /// ML anomaly-detection service connection (spec §6 "ML anomaly-
    /// detection service"); disabled by default since training/serving
    /// that model is out of scope (spec §9 Open Questions).
    #[serde(default)]
    pub ml: MlConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            historian: HistorianConfig::default(),
            poll: PollConfig::default(),
            baseline: BaselineConfig::default(),
            thresholds: ThresholdSet::default(),
            machine_overrides: HashMap::new(),
            ml: MlConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration using the standard search order:
    /// 1. `$EXTRUDER_CONFIG` environment variable
    /// 2. `./monitor_config.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        Self::load_with_provenance().0
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let (config, _provenance) = Self::load_from_file_with_provenance(path)?;
        Ok(config)
    }

    pub fn load_from_file_with_provenance(
        path: &Path,
    ) -> Result<(Self, ConfigProvenance), ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        let typo_warnings = super::validation::validate_unknown_keys(&contents);
        for w in &typo_warnings {
            warn!("{}", w);
        }

        let provenance = ConfigProvenance {
            explicit_keys: super::validation::walk_toml_keys(
                &contents
                    .parse::<toml::Value>()
                    .unwrap_or(toml::Value::Table(Default::default())),
                "",
            )
            .into_iter()
            .collect(),
        };

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok((config, provenance))
    }

    pub fn load_with_provenance() -> (Self, ConfigProvenance) {
        if let Ok(path) = std::env::var("EXTRUDER_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file_with_provenance(&p) {
                    Ok((config, provenance)) => {
                        info!(path = %p.display(), "Loaded monitor config from EXTRUDER_CONFIG");
                        return (config, provenance);
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from EXTRUDER_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "EXTRUDER_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("monitor_config.toml");
        if local.exists() {
            match Self::load_from_file_with_provenance(&local) {
                Ok((config, provenance)) => {
                    info!("Loaded monitor config from ./monitor_config.toml");
                    return (config, provenance);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./monitor_config.toml, using defaults");
                }
            }
        }

        info!("No monitor_config.toml found — using built-in defaults");
        (Self::default(), ConfigProvenance::default())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Monitor config saved");
        Ok(())
    }

    /// Resolve the effective threshold set for a machine: global defaults
    /// with that machine's `[machine_overrides.<id>]` merged on top (spec
    /// §6 "Per-machine threshold overrides: any subset of the §4.D table").
    pub fn resolve_thresholds(&self, machine_id: &str) -> ThresholdSet {
        match self.machine_overrides.get(machine_id) {
            Some(overrides) => overrides.apply_to(&self.thresholds),
            None => self.thresholds,
        }
    }

    /// Validate ranges and escalation consistency: thresholds must
    /// escalate in the physically sane direction, dwell times must be
    /// positive, NaN/Inf rejected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();
        self.thresholds.validate_into(&mut errors);

        if self.baseline.min_samples_for_finalize == 0 {
            errors.push("baseline.min_samples_for_finalize must be > 0".to_string());
        }
        if self.poll.interval_seconds == 0 {
            errors.push("poll.interval_seconds must be > 0".to_string());
        }
        if self.poll.window_minutes == 0 {
            errors.push("poll.window_minutes must be > 0".to_string());
        }
        if self.poll.max_rows_per_poll == 0 {
            errors.push("poll.max_rows_per_poll must be > 0".to_string());
        }
        if self.historian.enabled
            && (self.historian.host.trim().is_empty() || self.historian.table.trim().is_empty())
        {
            errors.push(
                "historian.enabled = true requires a non-empty host and table".to_string(),
            );
        }
        if self.ml.enabled && self.ml.endpoint.trim().is_empty() {
            errors.push("ml.enabled = true requires a non-empty endpoint".to_string());
        }

        for (machine_id, overrides) in &self.machine_overrides {
            let resolved = overrides.apply_to(&self.thresholds);
            let mut sub_errors = Vec::new();
            resolved.validate_into(&mut sub_errors);
            errors.extend(
                sub_errors
                    .into_iter()
                    .map(|e| format!("machine_overrides.{machine_id}: {e}")),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// [historian]
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorianConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub db: String,
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5432
}

impl Default for HistorianConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            db: String::new(),
            schema: String::new(),
            table: String::new(),
            user: String::new(),
            password: String::new(),
        }
    }
}

// ============================================================================
// [poll]
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,
    #[serde(default = "default_max_rows_per_poll")]
    pub max_rows_per_poll: usize,
}

fn default_interval_seconds() -> u64 {
    poll_defaults::INTERVAL_SECONDS
}
fn default_window_minutes() -> u64 {
    poll_defaults::WINDOW_MINUTES
}
fn default_max_rows_per_poll() -> usize {
    poll_defaults::MAX_ROWS_PER_POLL
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            window_minutes: default_window_minutes(),
            max_rows_per_poll: default_max_rows_per_poll(),
        }
    }
}

// ============================================================================
// [baseline]
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BaselineConfig {
    #[serde(default = "default_min_samples")]
    pub min_samples_for_finalize: usize,
}

fn default_min_samples() -> usize {
    super::defaults::baseline::MIN_SAMPLES_PER_METRIC
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            min_samples_for_finalize: default_min_samples(),
        }
    }
}

// ============================================================================
// [ml]
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
        }
    }
}

// ============================================================================
// [thresholds] — spec §4.D table
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdSet {
    #[serde(default = "d_rpm_on")]
    pub rpm_on: f64,
    #[serde(default = "d_rpm_prod")]
    pub rpm_prod: f64,
    #[serde(default = "d_p_on")]
    pub p_on: f64,
    #[serde(default = "d_p_prod")]
    pub p_prod: f64,
    #[serde(default = "d_t_min_active")]
    pub t_min_active: f64,
    #[serde(default = "d_heating_rate")]
    pub heating_rate: f64,
    #[serde(default = "d_cooling_rate")]
    pub cooling_rate: f64,
    #[serde(default = "d_temp_flat_rate")]
    pub temp_flat_rate: f64,
    #[serde(default = "d_production_enter_secs")]
    pub production_enter_secs: u64,
    #[serde(default = "d_production_exit_secs")]
    pub production_exit_secs: u64,
    #[serde(default = "d_other_debounce_secs")]
    pub other_debounce_secs: u64,
}

fn d_rpm_on() -> f64 {
    threshold_defaults::RPM_ON
}
fn d_rpm_prod() -> f64 {
    threshold_defaults::RPM_PROD
}
fn d_p_on() -> f64 {
    threshold_defaults::P_ON
}
fn d_p_prod() -> f64 {
    threshold_defaults::P_PROD
}
fn d_t_min_active() -> f64 {
    threshold_defaults::T_MIN_ACTIVE
}
fn d_heating_rate() -> f64 {
    threshold_defaults::HEATING_RATE
}
fn d_cooling_rate() -> f64 {
    threshold_defaults::COOLING_RATE
}
fn d_temp_flat_rate() -> f64 {
    threshold_defaults::TEMP_FLAT_RATE
}
fn d_production_enter_secs() -> u64 {
    threshold_defaults::PRODUCTION_ENTER_SECS
}
fn d_production_exit_secs() -> u64 {
    threshold_defaults::PRODUCTION_EXIT_SECS
}
fn d_other_debounce_secs() -> u64 {
    threshold_defaults::OTHER_DEBOUNCE_SECS
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            rpm_on: d_rpm_on(),
            rpm_prod: d_rpm_prod(),
            p_on: d_p_on(),
            p_prod: d_p_prod(),
            t_min_active: d_t_min_active(),
            heating_rate: d_heating_rate(),
            cooling_rate: d_cooling_rate(),
            temp_flat_rate: d_temp_flat_rate(),
            production_enter_secs: d_production_enter_secs(),
            production_exit_secs: d_production_exit_secs(),
            other_debounce_secs: d_other_debounce_secs(),
        }
    }
}

impl ThresholdSet {
    fn validate_into(&self, errors: &mut Vec<String>) {
        for (name, value) in [
            ("rpm_on", self.rpm_on),
            ("rpm_prod", self.rpm_prod),
            ("p_on", self.p_on),
            ("p_prod", self.p_prod),
            ("t_min_active", self.t_min_active),
            ("heating_rate", self.heating_rate),
            ("cooling_rate", self.cooling_rate),
            ("temp_flat_rate", self.temp_flat_rate),
        ] {
            if !value.is_finite() {
                errors.push(format!("thresholds.{name} = {value} must be finite"));
            }
        }
        if self.rpm_prod < self.rpm_on {
            errors.push(format!(
                "thresholds.rpm_prod ({}) must be >= rpm_on ({})",
                self.rpm_prod, self.rpm_on
            ));
        }
        if self.p_prod < self.p_on {
            errors.push(format!(
                "thresholds.p_prod ({}) must be >= p_on ({})",
                self.p_prod, self.p_on
            ));
        }
        if self.heating_rate <= 0.0 {
            errors.push("thresholds.heating_rate must be positive".to_string());
        }
        if self.cooling_rate >= 0.0 {
            errors.push("thresholds.cooling_rate must be negative".to_string());
        }
        if self.temp_flat_rate <= 0.0 {
            errors.push("thresholds.temp_flat_rate must be positive".to_string());
        }
        for (name, value) in [
            ("production_enter_secs", self.production_enter_secs),
            ("production_exit_secs", self.production_exit_secs),
            ("other_debounce_secs", self.other_debounce_secs),
        ] {
            if value == 0 {
                errors.push(format!("thresholds.{name} must be > 0"));
            }
        }
    }
}

/// Partial override of `ThresholdSet` for a single machine — any subset of
/// fields may be set; unset fields fall back to the global defaults (spec
/// §6 "Per-machine threshold overrides: any subset of the §4.D table").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ThresholdOverrides {
    pub rpm_on: Option<f64>,
    pub rpm_prod: Option<f64>,
    pub p_on: Option<f64>,
    pub p_prod: Option<f64>,
    pub t_min_active: Option<f64>,
    pub heating_rate: Option<f64>,
    pub cooling_rate: Option<f64>,
    pub temp_flat_rate: Option<f64>,
    pub production_enter_secs: Option<u64>,
    pub production_exit_secs: Option<u64>,
    pub other_debounce_secs: Option<u64>,
}

impl ThresholdOverrides {
    fn apply_to(&self, base: &ThresholdSet) -> ThresholdSet {
        ThresholdSet {
            rpm_on: self.rpm_on.unwrap_or(base.rpm_on),
            rpm_prod: self.rpm_prod.unwrap_or(base.rpm_prod),
            p_on: self.p_on.unwrap_or(base.p_on),
            p_prod: self.p_prod.unwrap_or(base.p_prod),
            t_min_active: self.t_min_active.unwrap_or(base.t_min_active),
            heating_rate: self.heating_rate.unwrap_or(base.heating_rate),
            cooling_rate: self.cooling_rate.unwrap_or(base.cooling_rate),
            temp_flat_rate: self.temp_flat_rate.unwrap_or(base.temp_flat_rate),
            production_enter_secs: self
                .production_enter_secs
                .unwrap_or(base.production_enter_secs),
            production_exit_secs: self
                .production_exit_secs
                .unwrap_or(base.production_exit_secs),
            other_debounce_secs: self
                .other_debounce_secs
                .unwrap_or(base.other_debounce_secs),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {e}"),
            ConfigError::Validation(errors) => {
                write!(f, "Config validation failed: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}
