//! Signature library CSV reader
//!
//! One signature per row: `identifier, P26 … WFE, norm`. Row order is kept,
//! since it fixes the combination enumeration order of the solver.

use std::path::Path;

use tracing::{error, info, warn};

use super::{column_index, library_path, parse_cell, StorageError};
use crate::types::{
    FlightPhase, LibraryError, ParamArray, Signature, SignatureLibraries, SignatureLibrary, N_PARAMS,
    PARAMETER_NAMES,
};

pub fn read_library(path: &Path) -> Result<SignatureLibrary, StorageError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| StorageError::csv(path, e))?;
    let headers = reader.headers().map_err(|e| StorageError::csv(path, e))?.clone();
    let id_col = column_index(&headers, path, &["identifier"])?[0];
    let params = column_index(&headers, path, &PARAMETER_NAMES)?;
    let norm_col = headers.iter().position(|h| h.eq_ignore_ascii_case("norm"));

    let mut signatures = Vec::new();
    for result in reader.records() {
        let row = result.map_err(|e| StorageError::csv(path, e))?;
        let line = row.position().map_or(0, csv::Position::line);
        let malformed = |message: String| StorageError::Malformed {
            path: path.to_path_buf(),
            line,
            message,
        };
        let identifier = row.get(id_col).unwrap_or("").to_string();

        let mut direction: ParamArray = [0.0; N_PARAMS];
        for (slot, (&col, name)) in direction.iter_mut().zip(params.iter().zip(PARAMETER_NAMES)) {
            *slot = parse_cell(row.get(col).unwrap_or(""))
                .map_err(|e| malformed(format!("{identifier} {name}: {e}")))?
                .ok_or_else(|| malformed(format!("{identifier} {name}: direction component is blank")))?;
        }

        let norm = match norm_col {
            Some(col) => parse_cell(row.get(col).unwrap_or(""))
                .map_err(|e| malformed(format!("{identifier} norm: {e}")))?,
            None => None,
        };
        signatures.push(match norm {
            Some(norm) => Signature {
                identifier,
                direction,
                norm,
            },
            None => Signature::from_direction(identifier, direction),
        });
    }

    SignatureLibrary::new(signatures).map_err(|source| StorageError::Library {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `<phase>.signatures.csv` for every phase in `dir`.
///
/// A missing file leaves the phase without a library; a malformed one is kept
/// as an error. Either way only that phase's attribution stage skips.
pub fn load_libraries(dir: &Path) -> SignatureLibraries {
    let mut libraries = SignatureLibraries::new();
    for phase in FlightPhase::ALL {
        let path = library_path(dir, phase);
        if !path.exists() {
            warn!(phase = %phase, path = %path.display(), "No signature library for phase");
            continue;
        }
        match read_library(&path) {
            Ok(library) => {
                info!(phase = %phase, signatures = library.len(), "Signature library loaded");
                libraries.insert(phase, library);
            }
            Err(StorageError::Library { source, .. }) => {
                error!(phase = %phase, error = %source, "Signature library rejected");
                libraries.insert_error(phase, source);
            }
            Err(e) => {
                error!(phase = %phase, error = %e, "Signature library unreadable");
                libraries.insert_error(phase, LibraryError::Unreadable(e.to_string()));
            }
        }
    }
    libraries
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "identifier,P26,T26,P30,T30,TGT,NL,NI,NH,WFE,norm\n";

    fn write(dir: &Path, phase: FlightPhase, body: &str) {
        std::fs::write(library_path(dir, phase), format!("{HEADER}{body}")).unwrap();
    }

    #[test]
    fn test_blank_norm_is_derived() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            FlightPhase::Cruise,
            "IPC ETA,3,4,0,0,0,0,0,0,0,\nHPC ETA,0,0,1,0,0,0,0,0,0,2.5\n",
        );
        let lib = read_library(&library_path(dir.path(), FlightPhase::Cruise)).unwrap();
        let sigs = lib.signatures();
        assert_eq!(sigs.len(), 2);
        assert_eq!(sigs[0].identifier, "IPC ETA");
        assert!((sigs[0].norm - 5.0).abs() < 1e-12);
        assert!((sigs[1].norm - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), FlightPhase::Climb, "A,1,0,0,0,0,0,0,0,0,\nA,0,1,0,0,0,0,0,0,0,\n");
        let err = read_library(&library_path(dir.path(), FlightPhase::Climb)).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Library { source: LibraryError::DuplicateIdentifier(_), .. }
        ));
    }

    #[test]
    fn test_load_libraries_isolates_bad_phase() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), FlightPhase::TakeOff, "A,1,0,0,0,0,0,0,0,0,\n");
        write(dir.path(), FlightPhase::Climb, "");
        let libs = load_libraries(dir.path());

        assert!(libs.get(FlightPhase::TakeOff).is_ok());
        assert_eq!(libs.get(FlightPhase::Climb).unwrap_err(), LibraryError::Empty);
        assert_eq!(
            libs.get(FlightPhase::Cruise).unwrap_err(),
            LibraryError::MissingPhase(FlightPhase::Cruise)
        );
    }

    #[test]
    fn test_non_numeric_component_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), FlightPhase::Cruise, "A,x,0,0,0,0,0,0,0,0,\n");
        let libs = load_libraries(dir.path());
        assert!(matches!(libs.get(FlightPhase::Cruise), Err(LibraryError::Unreadable(_))));
    }
}
