//! Config Validation Tests
//!
//! Typo detection on raw TOML and range validation on parsed configs,
//! exercised independently from the rest of the pipeline.

use perfshift::config::validation::{
    known_config_keys, suggest_correction, validate_ranges, validate_unknown_keys,
};
use perfshift::config::{ConfigError, PipelineConfig};

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_lag_section_warns_with_suggestion() {
    let toml_str = r#"
[lags]
depth = [50, 100]
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("depth"));
    assert_eq!(warnings[0].suggestion.as_deref(), Some("lags.depths"));
}

#[test]
fn typo_in_attribution_section_warns() {
    let toml_str = r#"
[attribution]
max_relative_eror = 0.25
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("attribution.max_relative_error")
    );
    assert!(warnings[0].to_string().contains("did you mean"));
}

#[test]
fn unrelated_key_has_no_suggestion() {
    let warnings = validate_unknown_keys("[dashboard]\ntheme = \"dark\"\n");
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().all(|w| w.suggestion.is_none()));
}

#[test]
fn valid_config_produces_zero_warnings() {
    let toml_str = r#"
[smoothing]
window_half_width = 5
shop_visit_gap_days = 30.0

[lags]
depths = [25, 50]

[attribution]
worker_threads = 4
first_stage_signature = "IPC ETA"
second_stage_signature = "HPC ETA"

[correlation]
combined_threshold = 4
"#;
    assert!(validate_unknown_keys(toml_str).is_empty());
}

#[test]
fn suggestion_requires_small_edit_distance() {
    let known = known_config_keys();
    assert_eq!(
        suggest_correction("history.retain_point", &known).as_deref(),
        Some("history.retain_points")
    );
    assert!(suggest_correction("completely.different", &known).is_none());
}

#[test]
fn every_default_key_is_known() {
    let raw = PipelineConfig::default().to_toml().unwrap();
    assert!(validate_unknown_keys(&raw).is_empty(), "default config round-trips without warnings");
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn defaults_pass_validation() {
    let config = PipelineConfig::default();
    assert!(config.validate().is_ok());
    let (errors, warnings) = validate_ranges(&config);
    assert!(errors.is_empty());
    assert!(warnings.is_empty());
}

#[test]
fn partial_file_fills_defaults() {
    let config = PipelineConfig::from_toml_str("[correlation]\ncombined_threshold = 5\n").unwrap();
    assert_eq!(config.correlation.combined_threshold, 5);
    assert_eq!(config.lags.depths, vec![50, 100, 200, 400]);
    assert_eq!(config.smoothing.window_half_width, 10);
}

#[test]
fn all_errors_are_collected() {
    let toml_str = r#"
[smoothing]
window_half_width = 0

[lags]
depths = [100, 50]

[exceedance]
evidence_limit = 1.5
"#;
    match PipelineConfig::from_toml_str(toml_str) {
        Err(ConfigError::Validation(errors)) => {
            assert!(errors.len() >= 3, "got {errors:?}");
            assert!(errors.iter().any(|e| e.contains("window_half_width")));
            assert!(errors.iter().any(|e| e.contains("strictly increasing")));
            assert!(errors.iter().any(|e| e.contains("evidence_limit")));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn reserved_signatures_must_differ() {
    let toml_str = r#"
[attribution]
first_stage_signature = "HPC ETA"
"#;
    assert!(matches!(
        PipelineConfig::from_toml_str(toml_str),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn short_retention_is_a_warning_not_an_error() {
    let mut config = PipelineConfig::default();
    config.history.retain_points = 100;
    assert!(config.validate().is_ok());
    let (_, warnings) = validate_ranges(&config);
    assert!(warnings.iter().any(|w| w.field == "history.retain_points"));
}

#[test]
fn absurd_worker_count_is_rejected() {
    let mut config = PipelineConfig::default();
    config.attribution.worker_threads = 100_000;
    assert!(config.validate().is_err());
}
