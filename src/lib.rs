//! perfshift: fleet engine performance-shift attribution
//!
//! Turns per-flight-phase engine deviation reports into smoothed trends,
//! multi-horizon shifts, signature attributions and a cross-phase
//! degradation event ("DN fire") per installation.
//!
//! ## Architecture
//!
//! - **config**: TOML pipeline configuration with validation
//! - **types**: records, per-phase tables, signature libraries, correlation rows
//! - **pipeline**: per-phase stages, the cross-phase correlator and the orchestrator
//! - **storage**: CSV ingest and reports, JSON-lines history checkpoints

pub mod config;
pub mod types;
pub mod pipeline;
pub mod storage;

pub use config::{ConfigError, PipelineConfig};

pub use types::{
    CorrelationReport, FlightPhase, Installation, PhaseRecord, PhaseTable, Signature,
    SignatureLibraries, SignatureLibrary,
};

pub use pipeline::{Pipeline, PipelineError, PipelineOutput, PipelineReport};

pub use storage::StorageError;
