//! Performance-Shift Attribution Pipeline
//!
//! ## Stage Sequence (per flight phase)
//!
//! ```text
//! STAGE 1: flags        days since previous report, shop visit, sister change
//! STAGE 2: smoother     trend = mean of 2W+1 continuous complete deviations
//! STAGE 3: lag          shift(L) = trend(i) − trend(i − L) for every lag L
//! STAGE 4: attribution  best 1..3 signature least-squares fit of each shift
//! STAGE 5: polarity     −coefficient of the two reserved signatures
//! STAGE 6: exceedance   rolling max/mean/fractions per (lag, mode), evidence count
//! ```
//!
//! Then, once per run across phases: the cross-phase correlator.
//!
//! Every stage writes only new rows and only the columns it owns. Historical
//! rows are read to fill windows but are never rewritten, so re-running the
//! pipeline over a fully historical table returns it unchanged.

pub mod stage;
pub mod flags;
pub mod smoother;
pub mod lag;
pub mod attribution;
pub mod polarity;
pub mod exceedance;
pub mod correlator;
pub mod history;
mod orchestrator;

pub use attribution::{AttributionSolver, FitContext, FitError, LagFit};
pub use correlator::CrossPhaseCorrelator;
pub use exceedance::ExceedanceSummarizer;
pub use flags::DiscontinuityFlagger;
pub use history::{merge_ingest, retain_recent};
pub use lag::LagShiftExtractor;
pub use orchestrator::{Pipeline, PipelineError, PipelineOutput, PipelineReport, STAGE_ORDER};
pub use polarity::PolarityMapper;
pub use smoother::RollingSmoother;
pub use stage::{SkipReason, Stage, StageContext, StageOutcome, StageReport};
