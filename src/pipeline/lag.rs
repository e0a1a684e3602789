//! Lag shift extractor: Trend(i) − Trend(i − L) for every configured lag.
//!
//! Lags are positional (prior observations of the same installation), not
//! calendar time. The earlier trend may come from a historical row.

use std::collections::BTreeMap;

use crate::types::{round_to, FlightPhase, ParamArray, PhaseTable, N_PARAMS};

use super::stage::{RowPatch, SkipReason, Stage, StageContext};

pub struct LagShiftExtractor;

impl LagShiftExtractor {
    /// Component-wise difference, defined only when both trends are.
    pub fn shift(now: Option<&ParamArray>, then: Option<&ParamArray>, decimals: u32) -> Option<ParamArray> {
        let (now, then) = (now?, then?);
        let mut out = [0.0; N_PARAMS];
        for ((slot, n), t) in out.iter_mut().zip(now).zip(then) {
            *slot = round_to(n - t, decimals);
        }
        Some(out)
    }
}

impl Stage for LagShiftExtractor {
    const NAME: &'static str = "lag";
    /// Shift per lag depth
    type Patch = BTreeMap<usize, Option<ParamArray>>;

    fn compute(
        &self,
        table: &PhaseTable,
        _phase: FlightPhase,
        ctx: &StageContext<'_>,
    ) -> Result<RowPatch<Self::Patch>, SkipReason> {
        let depths = &ctx.config.lags.depths;
        let decimals = ctx.config.smoothing.rounding_decimals;
        let rows = table.rows();
        let mut patch = Vec::new();

        for positions in table.series_with_new_rows().values() {
            for (pos, &idx) in positions.iter().enumerate() {
                let row = &rows[idx];
                if !row.is_new() {
                    continue;
                }
                let shifts = depths
                    .iter()
                    .map(|&lag| {
                        let shift = pos.checked_sub(lag).and_then(|earlier| {
                            Self::shift(row.trend.as_ref(), rows[positions[earlier]].trend.as_ref(), decimals)
                        });
                        (lag, shift)
                    })
                    .collect();
                patch.push((idx, shifts));
            }
        }
        Ok(patch)
    }

    fn apply(&self, table: &mut PhaseTable, row: usize, patch: Self::Patch) {
        let record = &mut table.rows_mut()[row];
        for (lag, shift) in patch {
            record.lag_mut(lag).shift = shift;
        }
    }
}
