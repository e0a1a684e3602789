//! JSON-lines checkpoint of the sealed per-phase history
//!
//! One `PhaseRecord` object per line. Saving goes through a temp file and a
//! rename so an interrupted run leaves the previous checkpoint intact.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use super::StorageError;
use crate::types::{FlightPhase, PhaseRecord, PhaseTable};

/// Load a phase's history. A missing checkpoint is an empty history.
pub fn load_checkpoint(path: &Path, phase: FlightPhase) -> Result<PhaseTable, StorageError> {
    if !path.exists() {
        info!(phase = %phase, path = %path.display(), "No checkpoint, starting with empty history");
        return Ok(PhaseTable::empty(phase));
    }

    let file = File::open(path).map_err(|e| StorageError::io(path, e))?;
    let mut rows = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| StorageError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: PhaseRecord = serde_json::from_str(&line).map_err(|source| StorageError::Json {
            path: path.to_path_buf(),
            line: i as u64 + 1,
            source,
        })?;
        rows.push(record);
    }

    let mut table = PhaseTable::new(phase, rows);
    table.seal();
    debug!(phase = %phase, rows = table.len(), "Checkpoint loaded");
    Ok(table)
}

/// Write `table` atomically, one record per line in table order.
pub fn save_checkpoint(path: &Path, table: &PhaseTable) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }
    let tmp_path = path.with_extension("jsonl.tmp");

    let file = File::create(&tmp_path).map_err(|e| StorageError::io(&tmp_path, e))?;
    let mut writer = BufWriter::new(file);
    for (i, row) in table.rows().iter().enumerate() {
        serde_json::to_writer(&mut writer, row).map_err(|source| StorageError::Json {
            path: tmp_path.clone(),
            line: i as u64 + 1,
            source,
        })?;
        writer.write_all(b"\n").map_err(|e| StorageError::io(&tmp_path, e))?;
    }
    writer.flush().map_err(|e| StorageError::io(&tmp_path, e))?;
    drop(writer);

    std::fs::rename(&tmp_path, path).map_err(|e| StorageError::io(path, e))?;
    info!(phase = %table.phase(), rows = table.len(), path = %path.display(), "Checkpoint saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::daily_series;

    #[test]
    fn test_missing_checkpoint_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = load_checkpoint(&dir.path().join("climb.history.jsonl"), FlightPhase::Climb).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.phase(), FlightPhase::Climb);
    }

    #[test]
    fn test_saved_table_loads_sealed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("cruise.history.jsonl");
        let mut table = PhaseTable::new(FlightPhase::Cruise, daily_series("E1", &[0.125, -1.0 / 3.0]));
        table.rows_mut()[0].evidence_count = Some(4);

        save_checkpoint(&path, &table).unwrap();
        assert!(!path.with_extension("jsonl.tmp").exists());
        let loaded = load_checkpoint(&path, FlightPhase::Cruise).unwrap();

        table.seal();
        assert_eq!(loaded, table);
    }

    #[test]
    fn test_resave_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take-off.history.jsonl");
        let mut table = PhaseTable::new(FlightPhase::TakeOff, daily_series("E1", &[0.1, 0.2, 0.7]));
        table.seal();
        save_checkpoint(&path, &table).unwrap();
        let first = std::fs::read(&path).unwrap();

        let loaded = load_checkpoint(&path, FlightPhase::TakeOff).unwrap();
        save_checkpoint(&path, &loaded).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_corrupt_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cruise.history.jsonl");
        std::fs::write(&path, "\n{not json}\n").unwrap();
        let err = load_checkpoint(&path, FlightPhase::Cruise).unwrap_err();
        assert!(matches!(err, StorageError::Json { line: 2, .. }));
    }
}
