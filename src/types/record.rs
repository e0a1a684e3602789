//! Per-observation record and its derived columns

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Installation, ParamArray, N_PARAMS};

/// Whether a row arrived in the current run or was sealed by a previous one.
///
/// Only `New` rows are ever (re)computed. `Historical` rows may be read to fill
/// a window but their columns are never written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    New,
    Historical,
}

/// Raw percentage deviations from the nominal baseline. `None` = missing.
pub type DeviationVector = [Option<f64>; N_PARAMS];

/// Discontinuity markers that reset trend continuity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscontinuityFlags {
    /// Days since the previous observation of the same installation (0 for the first)
    pub days_since_prev: f64,
    /// First observation of the installation, or gap above the shop-visit limit
    pub shop_visit: bool,
    /// Sister engine differs from the previous observation's
    pub sister_change: bool,
}

impl DiscontinuityFlags {
    pub fn breaks_continuity(&self) -> bool {
        self.shop_visit || self.sister_change
    }
}

/// The two degradation modes the pipeline tracks evidence for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationMode {
    /// First-compressor efficiency loss
    FirstStage,
    /// Second-compressor efficiency loss
    SecondStage,
}

impl DegradationMode {
    pub const ALL: [DegradationMode; 2] = [DegradationMode::FirstStage, DegradationMode::SecondStage];

    /// Column prefix used in reports.
    pub fn column_prefix(&self) -> &'static str {
        match self {
            DegradationMode::FirstStage => "FIRST_STAGE",
            DegradationMode::SecondStage => "SECOND_STAGE",
        }
    }
}

impl std::fmt::Display for DegradationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegradationMode::FirstStage => write!(f, "first-stage"),
            DegradationMode::SecondStage => write!(f, "second-stage"),
        }
    }
}

/// One (identifier, coefficient, contribution magnitude) slot of a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionSlot {
    pub identifier: String,
    pub coefficient: f64,
    /// |coefficient × signature norm|
    pub magnitude: f64,
}

/// Winning signature combination for one (observation, lag).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    /// 1..=3 slots, in enumeration order of the winning combination
    pub slots: Vec<AttributionSlot>,
    /// ‖observed − fitted‖ / ‖observed‖
    pub relative_error: f64,
    /// ‖observed − fitted‖
    pub residual_magnitude: f64,
}

impl Attribution {
    /// Whether any slot carries the given signature identifier.
    pub fn contains(&self, identifier: &str) -> bool {
        self.slots.iter().any(|s| s.identifier == identifier)
    }
}

/// Rolling statistics of one damage-shift subsequence at one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceedanceStats {
    pub rolling_max: f64,
    pub rolling_mean: f64,
    /// Fraction of the window strictly above each configured threshold, in threshold order
    pub fractions: Vec<f64>,
}

/// All columns owned by one lag depth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LagColumns {
    /// Trend(t) − Trend(t − lag)
    #[serde(default)]
    pub shift: Option<ParamArray>,
    /// Euclidean norm of `shift`; `Some(0.0)` for a zero shift, `None` if the shift is undefined
    #[serde(default)]
    pub observed_magnitude: Option<f64>,
    #[serde(default)]
    pub attribution: Option<Attribution>,
    #[serde(default)]
    pub first_stage_damage: Option<f64>,
    #[serde(default)]
    pub second_stage_damage: Option<f64>,
    #[serde(default)]
    pub first_stage_stats: Option<ExceedanceStats>,
    #[serde(default)]
    pub second_stage_stats: Option<ExceedanceStats>,
}

impl LagColumns {
    pub fn damage(&self, mode: DegradationMode) -> Option<f64> {
        match mode {
            DegradationMode::FirstStage => self.first_stage_damage,
            DegradationMode::SecondStage => self.second_stage_damage,
        }
    }

    pub fn set_damage(&mut self, mode: DegradationMode, value: Option<f64>) {
        match mode {
            DegradationMode::FirstStage => self.first_stage_damage = value,
            DegradationMode::SecondStage => self.second_stage_damage = value,
        }
    }

    pub fn stats(&self, mode: DegradationMode) -> Option<&ExceedanceStats> {
        match mode {
            DegradationMode::FirstStage => self.first_stage_stats.as_ref(),
            DegradationMode::SecondStage => self.second_stage_stats.as_ref(),
        }
    }

    pub fn set_stats(&mut self, mode: DegradationMode, stats: Option<ExceedanceStats>) {
        match mode {
            DegradationMode::FirstStage => self.first_stage_stats = stats,
            DegradationMode::SecondStage => self.second_stage_stats = stats,
        }
    }
}

/// One timestamped report of one installation within one flight phase.
///
/// Raw fields are supplied by ingestion; every `Option` column below them is
/// owned by exactly one pipeline stage and stays `None` until that stage runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub installation: Installation,
    pub timestamp: NaiveDateTime,
    /// Engine fitted at the paired position, if reported
    #[serde(default)]
    pub sister_id: Option<String>,
    pub provenance: Provenance,
    pub deviation: DeviationVector,

    /// Discontinuity flagger
    #[serde(default)]
    pub flags: Option<DiscontinuityFlags>,
    /// Rolling smoother
    #[serde(default)]
    pub trend: Option<ParamArray>,
    /// Lag extractor, solver, polarity mapper, exceedance summarizer (keyed by lag depth)
    #[serde(default)]
    pub lags: BTreeMap<usize, LagColumns>,
    /// Exceedance summarizer
    #[serde(default)]
    pub evidence_count: Option<u32>,
}

impl PhaseRecord {
    /// Create a newly ingested record with no derived columns.
    pub fn new(
        installation: Installation,
        timestamp: NaiveDateTime,
        sister_id: Option<String>,
        deviation: DeviationVector,
    ) -> Self {
        Self {
            installation,
            timestamp,
            sister_id,
            provenance: Provenance::New,
            deviation,
            flags: None,
            trend: None,
            lags: BTreeMap::new(),
            evidence_count: None,
        }
    }

    pub fn is_new(&self) -> bool {
        self.provenance == Provenance::New
    }

    /// Whether this row resets trend continuity. Rows without computed flags do not.
    pub fn breaks_continuity(&self) -> bool {
        self.flags.is_some_and(|f| f.breaks_continuity())
    }

    /// The deviation vector if every component is present.
    pub fn complete_deviation(&self) -> Option<ParamArray> {
        let mut out = [0.0; N_PARAMS];
        for (slot, value) in out.iter_mut().zip(self.deviation.iter()) {
            *slot = value.filter(|v| v.is_finite())?;
        }
        Some(out)
    }

    pub fn lag(&self, depth: usize) -> Option<&LagColumns> {
        self.lags.get(&depth)
    }

    pub fn lag_mut(&mut self, depth: usize) -> &mut LagColumns {
        self.lags.entry(depth).or_default()
    }
}
