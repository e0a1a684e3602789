//! Damage polarity mapper
//!
//! Pulls the two reserved signatures out of each attribution and flips the
//! sign, so a growing efficiency loss reads as a growing positive damage.

use std::collections::BTreeMap;

use tracing::warn;

use crate::types::{DegradationMode, FlightPhase, PhaseTable};

use super::stage::{RowPatch, SkipReason, Stage, StageContext};

pub struct PolarityMapper;

/// (first-stage, second-stage) damage for one lag.
pub type DamagePair = (Option<f64>, Option<f64>);

impl Stage for PolarityMapper {
    const NAME: &'static str = "polarity";
    type Patch = BTreeMap<usize, DamagePair>;

    fn compute(
        &self,
        table: &PhaseTable,
        phase: FlightPhase,
        ctx: &StageContext<'_>,
    ) -> Result<RowPatch<Self::Patch>, SkipReason> {
        let first_id = ctx.config.attribution.first_stage_signature.as_str();
        let second_id = ctx.config.attribution.second_stage_signature.as_str();
        if let Ok(library) = ctx.libraries.get(phase) {
            for id in [first_id, second_id] {
                if !library.contains(id) {
                    warn!(phase = %phase, signature = id, "Reserved signature missing from library, its damage stays undefined");
                }
            }
        }

        let mut patch = Vec::new();
        for (idx, row) in table.rows().iter().enumerate() {
            if !row.is_new() {
                continue;
            }
            let damages: BTreeMap<usize, DamagePair> = ctx
                .config
                .lags
                .depths
                .iter()
                .map(|&lag| {
                    let mut pair: DamagePair = (None, None);
                    let slots = row
                        .lag(lag)
                        .and_then(|c| c.attribution.as_ref())
                        .map(|a| a.slots.as_slice())
                        .unwrap_or_default();
                    for slot in slots {
                        if slot.identifier == first_id {
                            pair.0 = Some(-slot.coefficient);
                        } else if slot.identifier == second_id {
                            pair.1 = Some(-slot.coefficient);
                        }
                    }
                    (lag, pair)
                })
                .collect();
            patch.push((idx, damages));
        }
        Ok(patch)
    }

    fn apply(&self, table: &mut PhaseTable, row: usize, patch: Self::Patch) {
        let record = &mut table.rows_mut()[row];
        for (lag, (first, second)) in patch {
            let columns = record.lag_mut(lag);
            columns.set_damage(DegradationMode::FirstStage, first);
            columns.set_damage(DegradationMode::SecondStage, second);
        }
    }
}
