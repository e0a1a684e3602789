//! Pipeline default constants.
//!
//! Every tunable here is mirrored by a field in `PipelineConfig`; these values
//! apply when the field is absent from the TOML file.

// ============================================================================
// Smoothing
// ============================================================================

/// Half-width W of the trend window (full window is 2W + 1 observations).
pub const WINDOW_HALF_WIDTH: usize = 10;

/// Gap since the previous report above which a shop visit is inferred (days).
pub const SHOP_VISIT_GAP_DAYS: f64 = 40.0;

/// Decimal places kept on trend and shift vectors.
pub const ROUNDING_DECIMALS: u32 = 5;

// ============================================================================
// Lags
// ============================================================================

/// Positional lag depths (observation counts, not calendar time).
pub const LAG_DEPTHS: [usize; 4] = [50, 100, 200, 400];

// ============================================================================
// Attribution
// ============================================================================

/// Relative residual error a combination must stay strictly below.
pub const MAX_RELATIVE_ERROR: f64 = 0.30;

/// Sum of contribution magnitudes must stay below this multiple of ‖observed‖.
pub const MAGNITUDE_MULTIPLIER: f64 = 5.0;

/// Reserved identifier of the first-compressor efficiency signature.
pub const FIRST_STAGE_SIGNATURE: &str = "IPC ETA";

/// Reserved identifier of the second-compressor efficiency signature.
pub const SECOND_STAGE_SIGNATURE: &str = "HPC ETA";

// ============================================================================
// Exceedance
// ============================================================================

/// Damage-shift thresholds for the exceedance fractions.
pub const EXCEEDANCE_THRESHOLDS: [f64; 5] = [0.2, 0.4, 0.6, 0.8, 1.0];

/// A fraction at or above this limit counts as one unit of evidence.
pub const EVIDENCE_LIMIT: f64 = 0.07;

// ============================================================================
// Cross-phase correlation
// ============================================================================

/// Maximum delay from take-off to the matched climb report (minutes, exclusive).
pub const CLIMB_WINDOW_MINUTES: i64 = 30;

/// Maximum delay from take-off to the matched cruise report (minutes, exclusive).
pub const CRUISE_WINDOW_MINUTES: i64 = 55;

/// Combined evidence total at which a composite event fires.
pub const COMBINED_THRESHOLD: u32 = 3;

// ============================================================================
// History
// ============================================================================

/// Most recent observations retained per installation after a merge.
pub const RETAIN_POINTS: usize = 650;
