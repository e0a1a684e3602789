//! Pipeline Configuration - every attribution tunable as a TOML value
//!
//! Each struct implements `Default` with the values in `defaults.rs`, so a
//! missing file or a missing key yields the standard fleet behaviour.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "PERFSHIFT_CONFIG";

/// Config file looked up in the working directory when the env var is unset.
pub const LOCAL_CONFIG_FILE: &str = "perfshift.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one pipeline run.
///
/// Load with `PipelineConfig::load()` which searches:
/// 1. `$PERFSHIFT_CONFIG` env var
/// 2. `./perfshift.toml`
/// 3. Built-in defaults
///
/// The loaded value is validated once and then passed to the pipeline
/// explicitly; no stage reads configuration from anywhere else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Discontinuity flagging and trend smoothing
    #[serde(default)]
    pub smoothing: SmoothingConfig,

    /// Lag depths for shift extraction
    #[serde(default)]
    pub lags: LagConfig,

    /// Signature fitting
    #[serde(default)]
    pub attribution: AttributionConfig,

    /// Rolling exceedance statistics and evidence counting
    #[serde(default)]
    pub exceedance: ExceedanceConfig,

    /// Cross-phase composite event detection
    #[serde(default)]
    pub correlation: CorrelationConfig,

    /// Checkpoint retention
    #[serde(default)]
    pub history: HistoryConfig,
}

impl PipelineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$PERFSHIFT_CONFIG` environment variable
    /// 2. `./perfshift.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded pipeline config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        // 2. Check ./perfshift.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded pipeline config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        // 3. Defaults
        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate TOML text. Unknown keys are logged, not rejected.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty TOML (used by `check-config` to echo the effective values).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate cross-field constraints. Every problem is collected before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let s = &self.smoothing;
        if s.window_half_width == 0 {
            errors.push("smoothing.window_half_width must be > 0".to_string());
        }
        if !s.shop_visit_gap_days.is_finite() || s.shop_visit_gap_days <= 0.0 {
            errors.push(format!(
                "smoothing.shop_visit_gap_days must be a positive finite number (got {})",
                s.shop_visit_gap_days
            ));
        }
        if s.rounding_decimals > 12 {
            errors.push(format!(
                "smoothing.rounding_decimals must be <= 12 (got {})",
                s.rounding_decimals
            ));
        }

        if self.lags.depths.is_empty() {
            errors.push("lags.depths must list at least one lag".to_string());
        }
        if self.lags.depths.contains(&0) {
            errors.push("lags.depths must all be > 0".to_string());
        }
        Self::check_strictly_increasing_usize(&self.lags.depths, "lags.depths", &mut errors);

        let a = &self.attribution;
        if !a.max_relative_error.is_finite() || a.max_relative_error <= 0.0 {
            errors.push(format!(
                "attribution.max_relative_error must be a positive finite number (got {})",
                a.max_relative_error
            ));
        }
        if !a.magnitude_multiplier.is_finite() || a.magnitude_multiplier <= 0.0 {
            errors.push(format!(
                "attribution.magnitude_multiplier must be a positive finite number (got {})",
                a.magnitude_multiplier
            ));
        }
        if a.first_stage_signature.trim().is_empty() {
            errors.push("attribution.first_stage_signature must not be blank".to_string());
        }
        if a.second_stage_signature.trim().is_empty() {
            errors.push("attribution.second_stage_signature must not be blank".to_string());
        }
        if a.first_stage_signature == a.second_stage_signature {
            errors.push(format!(
                "attribution.first_stage_signature and second_stage_signature must differ (both '{}')",
                a.first_stage_signature
            ));
        }

        let x = &self.exceedance;
        if x.thresholds.is_empty() {
            errors.push("exceedance.thresholds must list at least one threshold".to_string());
        }
        if x.thresholds.iter().any(|t| !t.is_finite()) {
            errors.push("exceedance.thresholds must all be finite".to_string());
        } else {
            Self::check_strictly_increasing_f64(&x.thresholds, "exceedance.thresholds", &mut errors);
        }
        if !x.evidence_limit.is_finite() || !(0.0..=1.0).contains(&x.evidence_limit) {
            errors.push(format!(
                "exceedance.evidence_limit must be within [0, 1] (got {})",
                x.evidence_limit
            ));
        }

        let c = &self.correlation;
        if c.climb_window_minutes <= 0 {
            errors.push("correlation.climb_window_minutes must be > 0".to_string());
        }
        if c.cruise_window_minutes <= 0 {
            errors.push("correlation.cruise_window_minutes must be > 0".to_string());
        }

        if self.history.retain_points == 0 {
            errors.push("history.retain_points must be > 0".to_string());
        }

        let (range_errors, range_warnings) = super::validation::validate_ranges(self);
        errors.extend(range_errors);
        for w in &range_warnings {
            warn!("{}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_strictly_increasing_usize(values: &[usize], name: &str, errors: &mut Vec<String>) {
        if values.windows(2).any(|w| w[1] <= w[0]) {
            errors.push(format!("{name} must be strictly increasing (got {values:?})"));
        }
    }

    fn check_strictly_increasing_f64(values: &[f64], name: &str, errors: &mut Vec<String>) {
        if values.windows(2).any(|w| w[1] <= w[0]) {
            errors.push(format!("{name} must be strictly increasing (got {values:?})"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({path}): {1}", path = .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({path}): {1}", path = .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[source] toml::ser::Error),

    #[error("Config validation failed:\n{}", list_errors(.0))]
    Validation(Vec<String>),
}

fn list_errors(errors: &[String]) -> String {
    errors.iter().map(|e| format!("  - {e}\n")).collect()
}

// ============================================================================
// Smoothing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Half-width W; a trend needs 2W + 1 continuous complete observations
    #[serde(default = "default_window_half_width")]
    pub window_half_width: usize,

    /// Days without a report after which a shop visit is assumed
    #[serde(default = "default_shop_visit_gap_days")]
    pub shop_visit_gap_days: f64,

    /// Decimal places kept on trends and shifts
    #[serde(default = "default_rounding_decimals")]
    pub rounding_decimals: u32,
}

fn default_window_half_width() -> usize { defaults::WINDOW_HALF_WIDTH }
fn default_shop_visit_gap_days() -> f64 { defaults::SHOP_VISIT_GAP_DAYS }
fn default_rounding_decimals() -> u32 { defaults::ROUNDING_DECIMALS }

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window_half_width: default_window_half_width(),
            shop_visit_gap_days: default_shop_visit_gap_days(),
            rounding_decimals: default_rounding_decimals(),
        }
    }
}

// ============================================================================
// Lags
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LagConfig {
    /// Positional lag depths in observations, strictly increasing
    #[serde(default = "default_lag_depths")]
    pub depths: Vec<usize>,
}

fn default_lag_depths() -> Vec<usize> { defaults::LAG_DEPTHS.to_vec() }

impl Default for LagConfig {
    fn default() -> Self {
        Self { depths: default_lag_depths() }
    }
}

// ============================================================================
// Attribution
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionConfig {
    /// A fit is accepted only when its relative error is strictly below this
    #[serde(default = "default_max_relative_error")]
    pub max_relative_error: f64,

    /// Sum of contribution magnitudes must stay below multiplier × ‖observed‖
    #[serde(default = "default_magnitude_multiplier")]
    pub magnitude_multiplier: f64,

    /// Solver threads; 0 = one per available core
    #[serde(default)]
    pub worker_threads: usize,

    /// Library identifier whose coefficient feeds the first-stage damage column
    #[serde(default = "default_first_stage_signature")]
    pub first_stage_signature: String,

    /// Library identifier whose coefficient feeds the second-stage damage column
    #[serde(default = "default_second_stage_signature")]
    pub second_stage_signature: String,
}

fn default_max_relative_error() -> f64 { defaults::MAX_RELATIVE_ERROR }
fn default_magnitude_multiplier() -> f64 { defaults::MAGNITUDE_MULTIPLIER }
fn default_first_stage_signature() -> String { defaults::FIRST_STAGE_SIGNATURE.to_string() }
fn default_second_stage_signature() -> String { defaults::SECOND_STAGE_SIGNATURE.to_string() }

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            max_relative_error: default_max_relative_error(),
            magnitude_multiplier: default_magnitude_multiplier(),
            worker_threads: 0,
            first_stage_signature: default_first_stage_signature(),
            second_stage_signature: default_second_stage_signature(),
        }
    }
}

// ============================================================================
// Exceedance
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceedanceConfig {
    /// Damage thresholds, strictly increasing
    #[serde(default = "default_exceedance_thresholds")]
    pub thresholds: Vec<f64>,

    /// Fraction at or above which a (lag, mode, threshold) cell counts as evidence
    #[serde(default = "default_evidence_limit")]
    pub evidence_limit: f64,
}

fn default_exceedance_thresholds() -> Vec<f64> { defaults::EXCEEDANCE_THRESHOLDS.to_vec() }
fn default_evidence_limit() -> f64 { defaults::EVIDENCE_LIMIT }

impl Default for ExceedanceConfig {
    fn default() -> Self {
        Self {
            thresholds: default_exceedance_thresholds(),
            evidence_limit: default_evidence_limit(),
        }
    }
}

// ============================================================================
// Correlation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationConfig {
    #[serde(default = "default_climb_window_minutes")]
    pub climb_window_minutes: i64,

    #[serde(default = "default_cruise_window_minutes")]
    pub cruise_window_minutes: i64,

    /// Merged evidence total at which a composite event fires
    #[serde(default = "default_combined_threshold")]
    pub combined_threshold: u32,
}

fn default_climb_window_minutes() -> i64 { defaults::CLIMB_WINDOW_MINUTES }
fn default_cruise_window_minutes() -> i64 { defaults::CRUISE_WINDOW_MINUTES }
fn default_combined_threshold() -> u32 { defaults::COMBINED_THRESHOLD }

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            climb_window_minutes: default_climb_window_minutes(),
            cruise_window_minutes: default_cruise_window_minutes(),
            combined_threshold: default_combined_threshold(),
        }
    }
}

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Most recent observations kept per installation in the checkpoint
    #[serde(default = "default_retain_points")]
    pub retain_points: usize,
}

fn default_retain_points() -> usize { defaults::RETAIN_POINTS }

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { retain_points: default_retain_points() }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.smoothing.window_half_width, 10);
        assert_eq!(config.lags.depths, vec![50, 100, 200, 400]);
        assert_eq!(config.attribution.first_stage_signature, "IPC ETA");
        assert_eq!(config.correlation.combined_threshold, 3);
        assert_eq!(config.history.retain_points, 650);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [lags]
            depths = [5, 10]

            [correlation]
            combined_threshold = 4
            "#,
        )
        .expect("partial config should load");
        assert_eq!(config.lags.depths, vec![5, 10]);
        assert_eq!(config.correlation.combined_threshold, 4);
        assert_eq!(config.smoothing.window_half_width, 10);
        assert!((config.exceedance.evidence_limit - 0.07).abs() < 1e-12);
    }

    #[test]
    fn test_empty_toml_equals_default() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = PipelineConfig::default();
        config.smoothing.window_half_width = 0;
        config.lags.depths = vec![100, 50];
        config.attribution.second_stage_signature = "IPC ETA".to_string();
        config.history.retain_points = 0;

        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.len() >= 4, "expected at least 4 errors, got {:?}", errors);
                assert!(errors.iter().any(|e| e.contains("window_half_width")));
                assert!(errors.iter().any(|e| e.contains("strictly increasing")));
                assert!(errors.iter().any(|e| e.contains("must differ")));
                assert!(errors.iter().any(|e| e.contains("retain_points")));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_nan_threshold() {
        let mut config = PipelineConfig::default();
        config.exceedance.thresholds = vec![0.2, f64::NAN];
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_window_lengths_are_independent() {
        let mut config = PipelineConfig::default();
        config.correlation.cruise_window_minutes = 30;
        assert!(config.validate().is_ok());
        config.correlation.cruise_window_minutes = config.correlation.climb_window_minutes;
        assert!(config.validate().is_ok());
        config.correlation.cruise_window_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = PipelineConfig::default();
        let text = config.to_toml().unwrap();
        let back = PipelineConfig::from_toml_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_parse_error_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[lags\ndepths = 1").unwrap();
        let err = PipelineConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref p, _) if p == &path));
        assert!(err.to_string().starts_with(&format!("Config parse error ({})", path.display())));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_messages() {
        let missing = PathBuf::from("/nonexistent/perfshift.toml");
        let err = PipelineConfig::load_from_file(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::Io(ref p, _) if p == &missing));
        assert!(std::error::Error::source(&err).is_some());

        let err = ConfigError::Validation(vec!["a must be > 0".to_string(), "b too big".to_string()]);
        assert_eq!(err.to_string(), "Config validation failed:\n  - a must be > 0\n  - b too big\n");
        assert!(std::error::Error::source(&err).is_none());
    }
}
