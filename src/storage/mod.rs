//! File adapters around the pipeline
//!
//! Everything the pipeline reads or writes lives in four flat directories:
//!
//! ```text
//! input/    <phase>.csv               newly reported observations
//! library/  <phase>.signatures.csv    signature library per phase
//! state/    <phase>.history.jsonl     sealed history checkpoint per phase
//! output/   <phase>.report.csv        wide per-phase report
//!           merged.report.csv         cross-phase merged events
//!           summary.report.csv        per-installation summary
//! ```

pub mod checkpoint;
pub mod library;
pub mod observations;
pub mod reports;

pub use checkpoint::{load_checkpoint, save_checkpoint};
pub use library::{load_libraries, read_library};
pub use observations::{parse_timestamp, read_observations};
pub use reports::{write_merged_report, write_phase_report, write_summary_report};

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::{FlightPhase, LibraryError};

pub const MERGED_REPORT_FILE: &str = "merged.report.csv";
pub const SUMMARY_REPORT_FILE: &str = "summary.report.csv";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{} is missing required column '{column}'", path.display())]
    MissingColumn { path: PathBuf, column: String },

    #[error("{}:{line}: {message}", path.display())]
    Malformed {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("{}:{line}: invalid checkpoint record: {source}", path.display())]
    Json {
        path: PathBuf,
        line: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid signature library {}: {source}", path.display())]
    Library {
        path: PathBuf,
        #[source]
        source: LibraryError,
    },
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub fn observations_path(dir: &Path, phase: FlightPhase) -> PathBuf {
    dir.join(format!("{}.csv", phase.as_str()))
}

pub fn library_path(dir: &Path, phase: FlightPhase) -> PathBuf {
    dir.join(format!("{}.signatures.csv", phase.as_str()))
}

pub fn checkpoint_path(dir: &Path, phase: FlightPhase) -> PathBuf {
    dir.join(format!("{}.history.jsonl", phase.as_str()))
}

pub fn phase_report_path(dir: &Path, phase: FlightPhase) -> PathBuf {
    dir.join(format!("{}.report.csv", phase.as_str()))
}

/// Parse an optional numeric cell. Blank and non-finite cells are missing.
pub(crate) fn parse_cell(raw: &str) -> Result<Option<f64>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: f64 = trimmed
        .parse()
        .map_err(|_| format!("'{trimmed}' is not a number"))?;
    Ok(value.is_finite().then_some(value))
}

/// Column name to record index, failing on the first missing column.
pub(crate) fn column_index(
    headers: &csv::StringRecord,
    path: &Path,
    names: &[&str],
) -> Result<Vec<usize>, StorageError> {
    names
        .iter()
        .map(|name| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .ok_or_else(|| StorageError::MissingColumn {
                    path: path.to_path_buf(),
                    column: (*name).to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_file_names() {
        let dir = Path::new("/data");
        assert_eq!(observations_path(dir, FlightPhase::TakeOff), PathBuf::from("/data/take-off.csv"));
        assert_eq!(library_path(dir, FlightPhase::Climb), PathBuf::from("/data/climb.signatures.csv"));
        assert_eq!(checkpoint_path(dir, FlightPhase::Cruise), PathBuf::from("/data/cruise.history.jsonl"));
    }

    #[test]
    fn test_parse_cell_blank_and_non_finite_are_missing() {
        assert_eq!(parse_cell(" 1.25 "), Ok(Some(1.25)));
        assert_eq!(parse_cell(""), Ok(None));
        assert_eq!(parse_cell("NaN"), Ok(None));
        assert!(parse_cell("abc").is_err());
    }
}
