//! Config validation: unknown-key detection with Levenshtein suggestions
//! and physical range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " — did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `MonitorConfig`.
///
/// Maintained manually to match the struct hierarchy in `monitor_config.rs`.
/// `machine_overrides.<id>.*` keys are matched structurally below since the
/// machine id is not a fixed name.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [historian]
        "historian",
        "historian.enabled",
        "historian.host",
        "historian.port",
        "historian.db",
        "historian.schema",
        "historian.table",
        "historian.user",
        "historian.password",
        // [poll]
        "poll",
        "poll.interval_seconds",
        "poll.window_minutes",
        "poll.max_rows_per_poll",
        // [baseline]
        "baseline",
        "baseline.min_samples_for_finalize",
        // [ml]
        "ml",
        "ml.enabled",
        "ml.endpoint",
        // [thresholds]
        "thresholds",
        "thresholds.rpm_on",
        "thresholds.rpm_prod",
        "thresholds.p_on",
        "thresholds.p_prod",
        "thresholds.t_min_active",
        "thresholds.heating_rate",
        "thresholds.cooling_rate",
        "thresholds.temp_flat_rate",
        "thresholds.production_enter_secs",
        "thresholds.production_exit_secs",
        "thresholds.other_debounce_secs",
        // [machine_overrides.<id>]
        "machine_overrides",
    ];
    keys.iter().copied().collect()
}

/// Threshold leaf names, reused to validate any `machine_overrides.<id>.*`
/// key regardless of the machine id in the middle.
fn threshold_leaf_names() -> HashSet<&'static str> {
    [
        "rpm_on",
        "rpm_prod",
        "p_on",
        "p_prod",
        "t_min_active",
        "heating_rate",
        "cooling_rate",
        "temp_flat_rate",
        "production_enter_secs",
        "production_exit_secs",
        "other_debounce_secs",
    ]
    .into_iter()
    .collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_len = a.len();
    let b_len = b.len();
    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for &k in known {
        let dist = levenshtein(unknown, k);
        if dist <= 3 {
            if let Some((_, best_dist)) = best {
                if dist < best_dist {
                    best = Some((k, dist));
                }
            } else {
                best = Some((k, dist));
            }
        }
    }
    best.map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys — it only warns. Existing configs
/// always continue to work.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    let thresholds = threshold_leaf_names();
    let found = walk_toml_keys(&value, "");
    let mut warnings = Vec::new();

    for key in &found {
        if is_known(key, &known, &thresholds) {
            continue;
        }
        let suggestion = suggest_correction(key, &known);
        let message = format!("Unknown config key '{key}'");
        warnings.push(ValidationWarning {
            field: key.clone(),
            message,
            suggestion,
        });
    }

    warnings
}

/// A key is known if it's in the fixed set, or it's a
/// `machine_overrides.<any-id>` path (optionally with a known threshold leaf).
fn is_known(key: &str, known: &HashSet<&str>, thresholds: &HashSet<&str>) -> bool {
    if known.contains(key) {
        return true;
    }
    let mut parts = key.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("machine_overrides"), Some(_machine_id), None) => true,
        (Some("machine_overrides"), Some(_machine_id), Some(leaf)) => thresholds.contains(leaf),
        _ => false,
    }
}

// ============================================================================
// Physical Range Validation
// ============================================================================

/// Validate physical ranges on a parsed `MonitorConfig`.
///
/// Returns (errors, warnings) — errors are impossible values that must
/// prevent startup; warnings are suspicious but not fatal.
pub fn validate_physical_ranges(
    config: &super::MonitorConfig,
) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let t = &config.thresholds;

    // Screw RPM: no real extruder exceeds a few hundred rpm.
    if t.rpm_on < 0.0 || t.rpm_on > 50.0 {
        warnings.push(ValidationWarning {
            field: "thresholds.rpm_on".to_string(),
            message: format!("rpm_on = {:.1} is outside typical range (0-50 rpm)", t.rpm_on),
            suggestion: None,
        });
    }
    if t.rpm_prod < 0.0 || t.rpm_prod > 500.0 {
        errors.push(format!(
            "thresholds.rpm_prod = {:.1} is outside physical range (0-500 rpm)",
            t.rpm_prod
        ));
    }

    // Barrel pressure: extrusion processes run roughly 0-1000 bar.
    if t.p_prod < 0.0 || t.p_prod > 1000.0 {
        errors.push(format!(
            "thresholds.p_prod = {:.1} is outside physical range (0-1000 bar)",
            t.p_prod
        ));
    }

    // Barrel/zone temperature: plastics processing is roughly 0-400 C.
    if t.t_min_active < 0.0 || t.t_min_active > 400.0 {
        errors.push(format!(
            "thresholds.t_min_active = {:.1} is outside physical range (0-400 C)",
            t.t_min_active
        ));
    }

    if config.baseline.min_samples_for_finalize < 10 {
        warnings.push(ValidationWarning {
            field: "baseline.min_samples_for_finalize".to_string(),
            message: format!(
                "min_samples_for_finalize = {} is unusually low",
                config.baseline.min_samples_for_finalize
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("rpm_prd", "rpm_prod"), 1);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [thresholds]
            rpm_on = 5.0
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"thresholds".to_string()));
        assert!(keys.contains(&"thresholds.rpm_on".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let toml_str = r#"
[thresholds]
rpm_prd = 10.0
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].field.contains("rpm_prd"));
        assert_eq!(warnings[0].suggestion.as_deref(), Some("thresholds.rpm_prod"));
    }

    #[test]
    fn test_all_valid_keys_produce_zero_warnings() {
        let toml_str = r#"
[historian]
enabled = true
host = "10.0.0.5"

[thresholds]
rpm_on = 5.0

[machine_overrides.M1]
rpm_on = 8.0

[ml]
enabled = true
endpoint = "http://localhost:9000/score"
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {warnings:?}");
    }

    #[test]
    fn test_unknown_section_produces_warning() {
        let toml_str = r#"
[thresholds]
rpm_onn = 5.0
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(!warnings.is_empty());
        assert!(warnings.iter().any(|w| w.field.contains("rpm_onn")));
    }

    #[test]
    fn test_machine_override_unknown_leaf_warns() {
        let toml_str = r#"
[machine_overrides.M1]
rpm_onn = 5.0
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(!warnings.is_empty());
    }

    #[test]
    fn test_physical_range_defaults_clean() {
        let config = crate::config::MonitorConfig::default();
        let (errors, warnings) = validate_physical_ranges(&config);
        assert!(errors.is_empty(), "Defaults should produce no errors: {errors:?}");
        assert!(warnings.is_empty(), "Defaults should produce no warnings: {warnings:?}");
    }

    #[test]
    fn test_physical_range_rpm_prod_too_high() {
        let mut config = crate::config::MonitorConfig::default();
        config.thresholds.rpm_prod = 9999.0;
        let (errors, _) = validate_physical_ranges(&config);
        assert!(errors.iter().any(|e| e.contains("rpm_prod")));
    }
}
