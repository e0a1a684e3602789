//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

use super::PipelineConfig;

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
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for PipelineConfig.
///
/// Maintained by hand to match the struct hierarchy in pipeline_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [smoothing]
        "smoothing",
        "smoothing.window_half_width",
        "smoothing.shop_visit_gap_days",
        "smoothing.rounding_decimals",
        // [lags]
        "lags",
        "lags.depths",
        // [attribution]
        "attribution",
        "attribution.max_relative_error",
        "attribution.magnitude_multiplier",
        "attribution.worker_threads",
        "attribution.first_stage_signature",
        "attribution.second_stage_signature",
        // [exceedance]
        "exceedance",
        "exceedance.thresholds",
        "exceedance.evidence_limit",
        // [correlation]
        "correlation",
        "correlation.climb_window_minutes",
        "correlation.cruise_window_minutes",
        "correlation.combined_threshold",
        // [history]
        "history",
        "history.retain_points",
    ];
    keys.iter().copied().collect()
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

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
///
/// Ties resolve to the lexicographically smallest key so the hint is stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (levenshtein(unknown, k), k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// Never fails: parse errors surface later from serde.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let known = known_config_keys();
    let mut warnings = Vec::new();

    for key in walk_toml_keys(&value, "") {
        if !known.contains(key.as_str()) {
            let suggestion = suggest_correction(&key, &known);
            warnings.push(ValidationWarning {
                message: format!("Unknown config key '{key}'"),
                field: key,
                suggestion,
            });
        }
    }

    warnings
}

// ============================================================================
// Range Validation
// ============================================================================

/// Validate value ranges on a parsed PipelineConfig.
///
/// Returns (errors, warnings). Errors are values the pipeline cannot run
/// with; warnings are legal but almost certainly not what the operator meant.
pub fn validate_ranges(config: &PipelineConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // A relative error is a ratio of norms; anything >= 1 accepts the zero fit
    let mre = config.attribution.max_relative_error;
    if mre.is_finite() && mre >= 1.0 {
        warnings.push(ValidationWarning {
            field: "attribution.max_relative_error".to_string(),
            message: format!(
                "attribution.max_relative_error = {mre:.3} accepts fits no better than predicting zero"
            ),
            suggestion: None,
        });
    }

    let mm = config.attribution.magnitude_multiplier;
    if mm.is_finite() && mm > 0.0 && mm < 1.0 {
        warnings.push(ValidationWarning {
            field: "attribution.magnitude_multiplier".to_string(),
            message: format!(
                "attribution.magnitude_multiplier = {mm:.3} rejects even exact single-signature fits"
            ),
            suggestion: None,
        });
    }

    if config.attribution.worker_threads > 1024 {
        errors.push(format!(
            "attribution.worker_threads = {} is outside the supported range (0-1024)",
            config.attribution.worker_threads
        ));
    }

    if config.exceedance.thresholds.iter().any(|t| *t <= 0.0) {
        warnings.push(ValidationWarning {
            field: "exceedance.thresholds".to_string(),
            message: "exceedance.thresholds contains a non-positive value; every defined damage shift may exceed it"
                .to_string(),
            suggestion: None,
        });
    }

    if config.correlation.combined_threshold == 0 {
        warnings.push(ValidationWarning {
            field: "correlation.combined_threshold".to_string(),
            message: "correlation.combined_threshold = 0 fires on every complete take-off/climb/cruise triple"
                .to_string(),
            suggestion: None,
        });
    }

    // The checkpoint must hold enough rows for the deepest lag of a fresh trend
    let deepest = config.lags.depths.iter().copied().max().unwrap_or(0);
    let needed = 2 * config.smoothing.window_half_width + deepest + 1;
    if config.history.retain_points < needed {
        warnings.push(ValidationWarning {
            field: "history.retain_points".to_string(),
            message: format!(
                "history.retain_points = {} is below 2W + max lag + 1 = {}; the deepest lag will never be defined across runs",
                config.history.retain_points, needed
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
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein("depths", "depths"), 0);
        assert_eq!(levenshtein("depth", "depths"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [attribution]
            max_relative_error = 0.3
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"attribution".to_string()));
        assert!(keys.contains(&"attribution.max_relative_error".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let warnings = validate_unknown_keys(
            r#"
[smoothing]
window_half_widht = 8
"#,
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("smoothing.window_half_width")
        );
        assert!(warnings[0].to_string().contains("did you mean"));
    }

    #[test]
    fn test_all_valid_keys_produce_zero_warnings() {
        let warnings = validate_unknown_keys(
            r#"
[lags]
depths = [10, 20]

[exceedance]
evidence_limit = 0.1

[history]
retain_points = 900
"#,
        );
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {:?}", warnings);
    }

    #[test]
    fn test_garbage_key_has_no_suggestion() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_default_ranges_clean() {
        let (errors, warnings) = validate_ranges(&PipelineConfig::default());
        assert!(errors.is_empty(), "Defaults should produce no errors: {:?}", errors);
        assert!(warnings.is_empty(), "Defaults should produce no warnings: {:?}", warnings);
    }

    #[test]
    fn test_short_retention_warns() {
        let mut config = PipelineConfig::default();
        config.history.retain_points = 100;
        let (_, warnings) = validate_ranges(&config);
        assert!(warnings.iter().any(|w| w.field == "history.retain_points"));
    }

    #[test]
    fn test_loose_error_bound_warns() {
        let mut config = PipelineConfig::default();
        config.attribution.max_relative_error = 1.5;
        let (errors, warnings) = validate_ranges(&config);
        assert!(errors.is_empty());
        assert!(warnings.iter().any(|w| w.field == "attribution.max_relative_error"));
    }
}
