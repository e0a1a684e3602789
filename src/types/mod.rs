//! Shared data structures for the performance-shift attribution pipeline
//!
//! This module defines the per-phase table that every stage reads and extends:
//! - `PhaseRecord`: one observation of one installation in one flight phase,
//!   carrying the raw deviation vector plus every derived column
//! - `PhaseTable`: the time-ordered, de-duplicated set of records for a phase
//! - `SignatureLibrary`: the named reference directions used by the solver
//! - Correlation outputs: merged take-off/climb/cruise events and summaries

mod phase;
mod record;
mod signature;
mod table;
mod correlation;

pub use phase::*;
pub use record::*;
pub use signature::*;
pub use table::*;
pub use correlation::*;

use nalgebra::SVector;

/// Number of monitored gas-path parameters in a deviation vector.
pub const N_PARAMS: usize = 9;

/// Column names of the monitored parameters, in vector order.
pub const PARAMETER_NAMES: [&str; N_PARAMS] =
    ["P26", "T26", "P30", "T30", "TGT", "NL", "NI", "NH", "WFE"];

/// Maximum number of signatures combined in a single attribution.
pub const MAX_SLOTS: usize = 3;

/// 9-dimensional vector used by the numeric stages.
pub type Vector9 = SVector<f64, N_PARAMS>;

/// A fully defined 9-component vector as stored in a record.
pub type ParamArray = [f64; N_PARAMS];

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}
