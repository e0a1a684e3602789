//! Discontinuity-aware rolling smoother
//!
//! Trend(i) is the mean of the 2W + 1 deviation vectors ending at position i
//! of an installation's series. It is defined only when that whole window is
//! complete (every component present) and contains no shop-visit or
//! sister-change flag. Otherwise the trend stays undefined, never zero.

use statrs::statistics::Statistics;

use crate::types::{round_to, FlightPhase, ParamArray, PhaseRecord, PhaseTable, N_PARAMS};

use super::stage::{RowPatch, SkipReason, Stage, StageContext};

pub struct RollingSmoother;

impl RollingSmoother {
    /// Trend at the last row of `window`, or `None` if the window is not continuous and complete.
    pub fn trend(window: &[&PhaseRecord], decimals: u32) -> Option<ParamArray> {
        if window.iter().any(|r| r.breaks_continuity()) {
            return None;
        }
        let vectors: Vec<ParamArray> = window
            .iter()
            .map(|r| r.complete_deviation())
            .collect::<Option<_>>()?;

        let mut trend = [0.0; N_PARAMS];
        for (c, slot) in trend.iter_mut().enumerate() {
            let mean = Statistics::mean(vectors.iter().map(|v| v[c]));
            *slot = round_to(mean, decimals);
        }
        Some(trend)
    }
}

impl Stage for RollingSmoother {
    const NAME: &'static str = "smoother";
    type Patch = Option<ParamArray>;

    fn compute(
        &self,
        table: &PhaseTable,
        _phase: FlightPhase,
        ctx: &StageContext<'_>,
    ) -> Result<RowPatch<Option<ParamArray>>, SkipReason> {
        let span = 2 * ctx.config.smoothing.window_half_width;
        let decimals = ctx.config.smoothing.rounding_decimals;
        let rows = table.rows();
        let mut patch = Vec::new();

        for positions in table.series_with_new_rows().values() {
            for (pos, &idx) in positions.iter().enumerate() {
                if !rows[idx].is_new() {
                    continue;
                }
                let trend = pos.checked_sub(span).and_then(|start| {
                    let window: Vec<&PhaseRecord> =
                        positions[start..=pos].iter().map(|&i| &rows[i]).collect();
                    Self::trend(&window, decimals)
                });
                patch.push((idx, trend));
            }
        }
        Ok(patch)
    }

    fn apply(&self, table: &mut PhaseTable, row: usize, patch: Option<ParamArray>) {
        table.rows_mut()[row].trend = patch;
    }
}
