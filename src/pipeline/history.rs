//! History merge and retention
//!
//! Newly ingested observations are appended to the sealed per-phase history.
//! A key already in the history is never overwritten by an incoming row.
//! After the merge each installation keeps only its most recent
//! `history.retain_points` observations.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::types::{Installation, PhaseRecord, PhaseTable, Provenance};

/// Merge newly ingested rows into the sealed history of the same phase.
pub fn merge_ingest(history: PhaseTable, incoming: Vec<PhaseRecord>, retain_points: usize) -> PhaseTable {
    let phase = history.phase();
    let existing: HashSet<(Installation, NaiveDateTime)> = history
        .rows()
        .iter()
        .map(|r| (r.installation.clone(), r.timestamp))
        .collect();

    let offered = incoming.len();
    let mut rows = history.into_rows();
    rows.extend(
        incoming
            .into_iter()
            .filter(|r| !existing.contains(&(r.installation.clone(), r.timestamp)))
            .map(|mut r| {
                r.provenance = Provenance::New;
                r
            }),
    );
    let mut table = PhaseTable::new(phase, rows);
    let accepted = table.new_row_count();
    if accepted < offered {
        debug!(phase = %phase, dropped = offered - accepted, "Ignored incoming rows already in history or duplicated");
    }

    let trimmed = retain_recent(&mut table, retain_points);
    info!(phase = %phase, new_rows = accepted, trimmed, rows = table.len(), "History merged");
    table
}

/// Keep the `retain_points` most recent rows of every installation.
/// Returns the number of rows removed.
pub fn retain_recent(table: &mut PhaseTable, retain_points: usize) -> usize {
    let mut keep_from: BTreeMap<Installation, NaiveDateTime> = BTreeMap::new();
    for (installation, positions) in table.installation_series() {
        if positions.len() > retain_points {
            let first_kept = positions[positions.len() - retain_points];
            keep_from.insert(installation, table.rows()[first_kept].timestamp);
        }
    }
    if keep_from.is_empty() {
        return 0;
    }

    let phase = table.phase();
    let before = table.len();
    let rows: Vec<PhaseRecord> = std::mem::replace(table, PhaseTable::empty(phase))
        .into_rows()
        .into_iter()
        .filter(|r| keep_from.get(&r.installation).map_or(true, |from| r.timestamp >= *from))
        .collect();
    *table = PhaseTable::new(phase, rows);
    before - table.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{daily_series, day};
    use crate::types::{FlightPhase, N_PARAMS};

    fn sealed(rows: Vec<PhaseRecord>) -> PhaseTable {
        let mut table = PhaseTable::new(FlightPhase::Cruise, rows);
        table.seal();
        table
    }

    #[test]
    fn test_incoming_rows_marked_new_and_sorted() {
        let history = sealed(daily_series("E1", &[1.0, 2.0]));
        let incoming = vec![PhaseRecord::new(Installation::new("E1", "AC1", 1), day(5), None, [Some(3.0); N_PARAMS])];
        let merged = merge_ingest(history, incoming, 650);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.new_row_count(), 1);
        assert!(merged.rows()[2].is_new());
    }

    #[test]
    fn test_existing_key_is_not_overwritten() {
        let history = sealed(daily_series("E1", &[1.0, 2.0]));
        let mut clash = daily_series("E1", &[99.0]);
        clash[0].provenance = Provenance::New;
        let merged = merge_ingest(history.clone(), clash, 650);
        assert_eq!(merged, history);
        assert!(!merged.has_new_rows());
    }

    #[test]
    fn test_retention_per_installation() {
        let mut rows = daily_series("E1", &[0.0; 10]);
        rows.extend(daily_series("E2", &[0.0; 3]));
        let mut table = PhaseTable::new(FlightPhase::Climb, rows);
        let removed = retain_recent(&mut table, 4);
        assert_eq!(removed, 6);
        let series = table.installation_series();
        assert_eq!(series.values().map(Vec::len).collect::<Vec<_>>(), vec![4, 3]);
        let e1_first = table.rows().iter().find(|r| r.installation.engine_id == "E1").unwrap();
        assert_eq!(e1_first.timestamp, day(6));
    }
}
