//! Discontinuity flagger: shop visits and sister engine changes.

use crate::types::{round_to, DiscontinuityFlags, FlightPhase, PhaseTable};

use super::stage::{RowPatch, SkipReason, Stage, StageContext};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Marks each new row with the gap since the previous report of the same
/// installation and whether continuity breaks at that row.
///
/// A shop visit is the first report of an installation or a gap above
/// `smoothing.shop_visit_gap_days`. A sister change is a sister id that
/// differs from the previous report's (absent counts as a value).
pub struct DiscontinuityFlagger;

impl Stage for DiscontinuityFlagger {
    const NAME: &'static str = "flags";
    type Patch = DiscontinuityFlags;

    fn compute(
        &self,
        table: &PhaseTable,
        _phase: FlightPhase,
        ctx: &StageContext<'_>,
    ) -> Result<RowPatch<DiscontinuityFlags>, SkipReason> {
        let gap_limit = ctx.config.smoothing.shop_visit_gap_days;
        let rows = table.rows();
        let mut patch = Vec::new();

        for positions in table.series_with_new_rows().values() {
            for (pos, &idx) in positions.iter().enumerate() {
                let row = &rows[idx];
                if !row.is_new() {
                    continue;
                }
                let flags = match pos.checked_sub(1).map(|p| &rows[positions[p]]) {
                    None => DiscontinuityFlags {
                        days_since_prev: 0.0,
                        shop_visit: true,
                        sister_change: false,
                    },
                    Some(prev) => {
                        let secs = (row.timestamp - prev.timestamp).num_seconds() as f64;
                        let days = round_to(secs / SECONDS_PER_DAY, 1);
                        DiscontinuityFlags {
                            days_since_prev: days,
                            shop_visit: days > gap_limit,
                            sister_change: row.sister_id != prev.sister_id,
                        }
                    }
                };
                patch.push((idx, flags));
            }
        }
        Ok(patch)
    }

    fn apply(&self, table: &mut PhaseTable, row: usize, patch: DiscontinuityFlags) {
        table.rows_mut()[row].flags = Some(patch);
    }
}
