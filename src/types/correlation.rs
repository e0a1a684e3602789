//! Cross-phase correlation outputs

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::Installation;

/// One matched phase observation inside a merged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseMatch {
    pub timestamp: NaiveDateTime,
    pub evidence_count: Option<u32>,
}

/// A take-off observation with its nearest following climb and cruise matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedEvent {
    pub installation: Installation,
    pub takeoff: PhaseMatch,
    pub climb: Option<PhaseMatch>,
    pub cruise: Option<PhaseMatch>,
    /// Sum of the three evidence counts, defined only for a complete triple
    pub merge_sum: Option<u32>,
    /// Composite event ("DN_FIRE")
    pub fired: bool,
}

/// Per-installation reduction of all merged events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationSummary {
    pub installation: Installation,
    pub fired: bool,
    pub fire_count: usize,
    pub first_fire: Option<NaiveDateTime>,
    pub last_fire: Option<NaiveDateTime>,
}

/// Complete correlator output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationReport {
    /// Sorted by installation, then take-off time
    pub events: Vec<MergedEvent>,
    /// One row per installation with at least one take-off observation
    pub summaries: Vec<InstallationSummary>,
}

impl CorrelationReport {
    pub fn fired_installations(&self) -> impl Iterator<Item = &InstallationSummary> {
        self.summaries.iter().filter(|s| s.fired)
    }
}
