//! CSV ingest of newly reported observations
//!
//! Columns are located by header name, so extra columns and column order do
//! not matter. A blank parameter cell is a missing component.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use tracing::{debug, info};

use super::{column_index, parse_cell, StorageError};
use crate::types::{DeviationVector, FlightPhase, Installation, PhaseRecord, N_PARAMS, PARAMETER_NAMES};

const ID_COLUMNS: [&str; 5] = ["engine_id", "aircraft_id", "engine_position", "timestamp", "sister_id"];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Parse `%Y-%m-%d %H:%M:%S`, its ISO-8601 `T` form, or RFC 3339 (converted to UTC).
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
}

/// Read one phase's new observations. A missing file means no new data.
pub fn read_observations(path: &Path, phase: FlightPhase) -> Result<Vec<PhaseRecord>, StorageError> {
    if !path.exists() {
        info!(phase = %phase, path = %path.display(), "No new observations file");
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| StorageError::csv(path, e))?;
    let headers = reader.headers().map_err(|e| StorageError::csv(path, e))?.clone();
    let ids = column_index(&headers, path, &ID_COLUMNS)?;
    let params = column_index(&headers, path, &PARAMETER_NAMES)?;

    let mut records = Vec::new();
    for result in reader.records() {
        let row = result.map_err(|e| StorageError::csv(path, e))?;
        let line = row.position().map_or(0, csv::Position::line);
        let malformed = |message: String| StorageError::Malformed {
            path: path.to_path_buf(),
            line,
            message,
        };
        let cell = |i: usize| row.get(i).unwrap_or("");

        let engine_id = cell(ids[0]);
        if engine_id.is_empty() {
            return Err(malformed("blank engine_id".to_string()));
        }
        let position: u8 = cell(ids[2])
            .parse()
            .map_err(|_| malformed(format!("invalid engine_position '{}'", cell(ids[2]))))?;
        let timestamp = parse_timestamp(cell(ids[3]))
            .ok_or_else(|| malformed(format!("invalid timestamp '{}'", cell(ids[3]))))?;
        let sister = Some(cell(ids[4])).filter(|s| !s.is_empty()).map(str::to_string);

        let mut deviation: DeviationVector = [None; N_PARAMS];
        for (slot, (&col, name)) in deviation.iter_mut().zip(params.iter().zip(PARAMETER_NAMES)) {
            *slot = parse_cell(cell(col)).map_err(|e| malformed(format!("{name}: {e}")))?;
        }

        records.push(PhaseRecord::new(
            Installation::new(engine_id, cell(ids[1]), position),
            timestamp,
            sister,
            deviation,
        ));
    }

    debug!(phase = %phase, rows = records.len(), path = %path.display(), "Observations read");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 2, 3)
            .and_then(|d| d.and_hms_opt(4, 5, 6))
            .unwrap();
        assert_eq!(parse_timestamp("2024-02-03 04:05:06"), Some(expected));
        assert_eq!(parse_timestamp("2024-02-03T04:05:06"), Some(expected));
        assert_eq!(parse_timestamp("2024-02-03T06:05:06+02:00"), Some(expected));
        assert_eq!(parse_timestamp("03/02/2024"), None);
    }

    #[test]
    fn test_reads_rows_with_missing_components() {
        let file = write_csv(
            "engine_id,aircraft_id,engine_position,timestamp,sister_id,P26,T26,P30,T30,TGT,NL,NI,NH,WFE,extra\n\
             E1,AC1,2,2024-01-01 06:00:00,E9,0.1,0.2,0.3,0.4,0.5,0.6,0.7,0.8,0.9,x\n\
             E1,AC1,2,2024-01-02 06:00:00,,0.1,,0.3,0.4,0.5,0.6,0.7,0.8,0.9,y\n",
        );
        let rows = read_observations(file.path(), FlightPhase::Cruise).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].installation, Installation::new("E1", "AC1", 2));
        assert_eq!(rows[0].sister_id.as_deref(), Some("E9"));
        assert_eq!(rows[0].complete_deviation().map(|d| d[8]), Some(0.9));
        assert!(rows[1].sister_id.is_none());
        assert_eq!(rows[1].deviation[1], None);
        assert!(rows.iter().all(PhaseRecord::is_new));
    }

    #[test]
    fn test_missing_column_is_reported() {
        let file = write_csv("engine_id,aircraft_id,engine_position,timestamp,sister_id,P26\n");
        let err = read_observations(file.path(), FlightPhase::Climb).unwrap_err();
        assert!(matches!(err, StorageError::MissingColumn { ref column, .. } if column == "T26"));
    }

    #[test]
    fn test_bad_timestamp_reports_line() {
        let file = write_csv(
            "engine_id,aircraft_id,engine_position,timestamp,sister_id,P26,T26,P30,T30,TGT,NL,NI,NH,WFE\n\
             E1,AC1,1,yesterday,,0,0,0,0,0,0,0,0,0\n",
        );
        let err = read_observations(file.path(), FlightPhase::TakeOff).unwrap_err();
        assert!(matches!(err, StorageError::Malformed { line: 2, .. }), "{err}");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rows = read_observations(&dir.path().join("cruise.csv"), FlightPhase::Cruise).unwrap();
        assert!(rows.is_empty());
    }
}
