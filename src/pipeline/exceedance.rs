//! Rolling exceedance summarizer and evidence count
//!
//! For each installation, lag and degradation mode the series is first
//! filtered to the rows whose attribution names that mode's signature. A
//! rolling window of `lag` rows over that filtered subsequence yields the
//! max, the mean and, per threshold, the fraction of damage values strictly
//! above it. A row's evidence count is the number of fractions at or above
//! `exceedance.evidence_limit` across every (lag, mode, threshold).

use std::collections::BTreeMap;

use statrs::statistics::Statistics;

use crate::types::{DegradationMode, ExceedanceStats, FlightPhase, PhaseTable};

use super::stage::{RowPatch, SkipReason, Stage, StageContext};

/// Statistics of one window of defined damage values, `None` if it has none.
pub fn window_stats(values: &[f64], thresholds: &[f64]) -> Option<ExceedanceStats> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    Some(ExceedanceStats {
        rolling_max: Statistics::max(values),
        rolling_mean: Statistics::mean(values),
        fractions: thresholds
            .iter()
            .map(|&t| values.iter().filter(|&&v| v > t).count() as f64 / n)
            .collect(),
    })
}

/// Number of exceedance fractions at or above `limit`.
pub fn evidence_count<'a>(stats: impl IntoIterator<Item = &'a ExceedanceStats>, limit: f64) -> u32 {
    stats
        .into_iter()
        .flat_map(|s| s.fractions.iter())
        .filter(|&&f| f >= limit)
        .count() as u32
}

/// Columns written for one new row.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceedancePatch {
    pub stats: BTreeMap<(usize, DegradationMode), Option<ExceedanceStats>>,
    pub evidence_count: u32,
}

pub struct ExceedanceSummarizer;

impl Stage for ExceedanceSummarizer {
    const NAME: &'static str = "exceedance";
    type Patch = ExceedancePatch;

    fn compute(
        &self,
        table: &PhaseTable,
        _phase: FlightPhase,
        ctx: &StageContext<'_>,
    ) -> Result<RowPatch<ExceedancePatch>, SkipReason> {
        let config = ctx.config;
        let thresholds = &config.exceedance.thresholds;
        let rows = table.rows();
        let mode_id = |mode: DegradationMode| match mode {
            DegradationMode::FirstStage => config.attribution.first_stage_signature.as_str(),
            DegradationMode::SecondStage => config.attribution.second_stage_signature.as_str(),
        };

        let mut patches: BTreeMap<usize, ExceedancePatch> = BTreeMap::new();
        for positions in table.series_with_new_rows().values() {
            for &idx in positions.iter().filter(|&&i| rows[i].is_new()) {
                let mut stats = BTreeMap::new();
                for &lag in &config.lags.depths {
                    for mode in DegradationMode::ALL {
                        stats.insert((lag, mode), None);
                    }
                }
                patches.insert(idx, ExceedancePatch { stats, evidence_count: 0 });
            }

            for &lag in &config.lags.depths {
                let width = lag.max(1);
                for mode in DegradationMode::ALL {
                    let id = mode_id(mode);
                    let subsequence: Vec<usize> = positions
                        .iter()
                        .copied()
                        .filter(|&i| {
                            rows[i]
                                .lag(lag)
                                .and_then(|c| c.attribution.as_ref())
                                .is_some_and(|a| a.contains(id))
                        })
                        .collect();

                    for (j, &idx) in subsequence.iter().enumerate() {
                        let Some(patch) = patches.get_mut(&idx) else {
                            continue;
                        };
                        let start = (j + 1).saturating_sub(width);
                        let values: Vec<f64> = subsequence[start..=j]
                            .iter()
                            .filter_map(|&i| rows[i].lag(lag).and_then(|c| c.damage(mode)))
                            .filter(|v| v.is_finite())
                            .collect();
                        patch.stats.insert((lag, mode), window_stats(&values, thresholds));
                    }
                }
            }
        }

        let limit = config.exceedance.evidence_limit;
        for patch in patches.values_mut() {
            patch.evidence_count = evidence_count(patch.stats.values().flatten(), limit);
        }
        Ok(patches.into_iter().collect())
    }

    fn apply(&self, table: &mut PhaseTable, row: usize, patch: ExceedancePatch) {
        let record = &mut table.rows_mut()[row];
        for ((lag, mode), stats) in patch.stats {
            record.lag_mut(lag).set_stats(mode, stats);
        }
        record.evidence_count = Some(patch.evidence_count);
    }
}
