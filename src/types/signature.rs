//! Signature library: named reference directions in deviation space

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use super::{FlightPhase, ParamArray};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LibraryError {
    #[error("Signature library is empty")]
    Empty,

    #[error("Duplicate signature identifier: '{0}'")]
    DuplicateIdentifier(String),

    #[error("Signature '{identifier}' has a non-finite {field}")]
    NonFinite { identifier: String, field: String },

    #[error("Signature '{0}' has a zero direction vector")]
    ZeroDirection(String),

    #[error("Signature '{0}' has a negative norm")]
    NegativeNorm(String),

    #[error("Signature identifier must not be blank")]
    BlankIdentifier,

    #[error("No signature library supplied for flight phase {0}")]
    MissingPhase(FlightPhase),

    #[error("Signature library could not be read: {0}")]
    Unreadable(String),
}

/// One named degradation signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub identifier: String,
    /// Direction in the 9-parameter deviation space
    pub direction: ParamArray,
    /// Magnitude norm used to convert a coefficient into a contribution magnitude
    pub norm: f64,
}

impl Signature {
    /// Build a signature whose norm is the Euclidean length of its direction.
    pub fn from_direction(identifier: impl Into<String>, direction: ParamArray) -> Self {
        let norm = direction.iter().map(|v| v * v).sum::<f64>().sqrt();
        Self {
            identifier: identifier.into(),
            direction,
            norm,
        }
    }
}

/// Ordered, validated set of signatures for one flight phase.
///
/// Order is significant: it defines the combination enumeration order and
/// therefore the tie-break between equally good fits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureLibrary {
    signatures: Vec<Signature>,
}

impl SignatureLibrary {
    pub fn new(signatures: Vec<Signature>) -> Result<Self, LibraryError> {
        if signatures.is_empty() {
            return Err(LibraryError::Empty);
        }
        let mut seen = HashSet::new();
        for sig in &signatures {
            if sig.identifier.trim().is_empty() {
                return Err(LibraryError::BlankIdentifier);
            }
            if !seen.insert(sig.identifier.as_str()) {
                return Err(LibraryError::DuplicateIdentifier(sig.identifier.clone()));
            }
            if sig.direction.iter().any(|v| !v.is_finite()) {
                return Err(LibraryError::NonFinite {
                    identifier: sig.identifier.clone(),
                    field: "direction".to_string(),
                });
            }
            if !sig.norm.is_finite() {
                return Err(LibraryError::NonFinite {
                    identifier: sig.identifier.clone(),
                    field: "norm".to_string(),
                });
            }
            if sig.norm < 0.0 {
                return Err(LibraryError::NegativeNorm(sig.identifier.clone()));
            }
            if sig.direction.iter().all(|v| *v == 0.0) {
                return Err(LibraryError::ZeroDirection(sig.identifier.clone()));
            }
        }
        Ok(Self { signatures })
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.signatures.iter().any(|s| s.identifier == identifier)
    }
}

/// Signature libraries for every flight phase, supplied once per run.
///
/// A phase whose library failed to load keeps the error, so the stage that
/// needs it can report why it skipped.
#[derive(Debug, Clone, Default)]
pub struct SignatureLibraries {
    by_phase: BTreeMap<FlightPhase, Result<SignatureLibrary, LibraryError>>,
}

impl SignatureLibraries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, phase: FlightPhase, library: SignatureLibrary) {
        self.by_phase.insert(phase, Ok(library));
    }

    /// Record that the library for `phase` is unusable.
    pub fn insert_error(&mut self, phase: FlightPhase, error: LibraryError) {
        self.by_phase.insert(phase, Err(error));
    }

    pub fn get(&self, phase: FlightPhase) -> Result<&SignatureLibrary, LibraryError> {
        match self.by_phase.get(&phase) {
            Some(Ok(library)) => Ok(library),
            Some(Err(e)) => Err(e.clone()),
            None => Err(LibraryError::MissingPhase(phase)),
        }
    }

    /// Phases with a usable library.
    pub fn phases(&self) -> impl Iterator<Item = FlightPhase> + '_ {
        self.by_phase
            .iter()
            .filter(|(_, lib)| lib.is_ok())
            .map(|(phase, _)| *phase)
    }
}
