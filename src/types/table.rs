//! Per-phase, time-ordered table of records

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::{FlightPhase, Installation, PhaseRecord, Provenance};

/// All records of one flight phase.
///
/// Invariants held after every constructor and `normalize()`:
/// - rows are sorted by timestamp (ties ordered by installation)
/// - (installation, timestamp) is unique; on duplicates the last written row wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTable {
    phase: FlightPhase,
    rows: Vec<PhaseRecord>,
}

impl PhaseTable {
    /// Build a table from rows in any order.
    pub fn new(phase: FlightPhase, rows: Vec<PhaseRecord>) -> Self {
        let mut table = Self { phase, rows };
        table.normalize();
        table
    }

    pub fn empty(phase: FlightPhase) -> Self {
        Self { phase, rows: Vec::new() }
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn rows(&self) -> &[PhaseRecord] {
        &self.rows
    }

    /// Mutable row access for stages. Stages only patch columns they own and
    /// never reorder, so the invariants survive.
    pub fn rows_mut(&mut self) -> &mut [PhaseRecord] {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<PhaseRecord> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn new_row_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_new()).count()
    }

    pub fn has_new_rows(&self) -> bool {
        self.rows.iter().any(PhaseRecord::is_new)
    }

    /// Sort by timestamp and drop duplicate keys, keeping the last occurrence.
    pub fn normalize(&mut self) {
        let mut seen: HashSet<(Installation, NaiveDateTime)> = HashSet::with_capacity(self.rows.len());
        let mut kept: Vec<PhaseRecord> = Vec::with_capacity(self.rows.len());
        for row in std::mem::take(&mut self.rows).into_iter().rev() {
            if seen.insert((row.installation.clone(), row.timestamp)) {
                kept.push(row);
            }
        }
        kept.reverse();
        kept.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.installation.cmp(&b.installation))
        });
        self.rows = kept;
    }

    /// Row positions of every installation, each list in ascending time order.
    pub fn installation_series(&self) -> BTreeMap<Installation, Vec<usize>> {
        let mut series: BTreeMap<Installation, Vec<usize>> = BTreeMap::new();
        for (idx, row) in self.rows.iter().enumerate() {
            series.entry(row.installation.clone()).or_default().push(idx);
        }
        series
    }

    /// Series of installations that have at least one new row.
    ///
    /// Installations without new data are never touched by a stage.
    pub fn series_with_new_rows(&self) -> BTreeMap<Installation, Vec<usize>> {
        let mut series = self.installation_series();
        series.retain(|_, positions| positions.iter().any(|&i| self.rows[i].is_new()));
        series
    }

    /// Mark every row historical. Called before the table is checkpointed.
    pub fn seal(&mut self) {
        for row in &mut self.rows {
            row.provenance = Provenance::Historical;
        }
    }
}
