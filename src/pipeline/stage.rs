//! Stage interface shared by every per-phase transformation.
//!
//! A stage never mutates the table while it computes. It reads the table,
//! produces a patch keyed by row index, and the patch is applied in one pass
//! afterwards. A stage that cannot run hands its input back untouched.

use std::time::Instant;

use rayon::ThreadPool;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::types::{FlightPhase, LibraryError, PhaseTable, SignatureLibraries};

// ============================================================================
// Context
// ============================================================================

/// Read-only inputs every stage may consult.
pub struct StageContext<'a> {
    pub config: &'a PipelineConfig,
    pub libraries: &'a SignatureLibraries,
    /// Worker pool for row-level parallel work
    pub pool: &'a ThreadPool,
}

// ============================================================================
// Outcome
// ============================================================================

/// Why a stage left its input untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SkipReason {
    /// Every row is historical
    NoNewRows,
    /// The phase has no usable signature library
    Library(String),
    /// The phase task failed (panicked) before finishing
    Failed(String),
}

impl From<LibraryError> for SkipReason {
    fn from(e: LibraryError) -> Self {
        SkipReason::Library(e.to_string())
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoNewRows => write!(f, "no new rows"),
            SkipReason::Library(e) => write!(f, "signature library unusable: {}", e),
            SkipReason::Failed(e) => write!(f, "stage failed: {}", e),
        }
    }
}

/// Result of one stage over one phase table.
#[derive(Debug)]
pub enum StageOutcome {
    Completed(PhaseTable),
    Skipped { table: PhaseTable, reason: SkipReason },
}

impl StageOutcome {
    pub fn table(&self) -> &PhaseTable {
        match self {
            StageOutcome::Completed(table) => table,
            StageOutcome::Skipped { table, .. } => table,
        }
    }

    pub fn into_table(self) -> PhaseTable {
        match self {
            StageOutcome::Completed(table) => table,
            StageOutcome::Skipped { table, .. } => table,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed(_))
    }
}

/// Row-index keyed patch. Each index appears at most once.
pub type RowPatch<T> = Vec<(usize, T)>;

// ============================================================================
// Stage Trait
// ============================================================================

pub trait Stage {
    /// Name used in logs and reports
    const NAME: &'static str;

    /// Columns written for one row
    type Patch: Send;

    /// Compute the patch for every new row that this stage can fill.
    fn compute(
        &self,
        table: &PhaseTable,
        phase: FlightPhase,
        ctx: &StageContext<'_>,
    ) -> Result<RowPatch<Self::Patch>, SkipReason>;

    /// Write one row's patch into the table.
    fn apply(&self, table: &mut PhaseTable, row: usize, patch: Self::Patch);

    /// Run the stage: skip when nothing is new, otherwise compute and merge.
    fn run(&self, mut table: PhaseTable, phase: FlightPhase, ctx: &StageContext<'_>) -> StageOutcome {
        if !table.has_new_rows() {
            return StageOutcome::Skipped {
                table,
                reason: SkipReason::NoNewRows,
            };
        }
        match self.compute(&table, phase, ctx) {
            Ok(patch) => {
                for (row, columns) in patch {
                    debug_assert!(table.rows()[row].is_new(), "patch targets a historical row");
                    self.apply(&mut table, row, columns);
                }
                StageOutcome::Completed(table)
            }
            Err(reason) => StageOutcome::Skipped { table, reason },
        }
    }
}

// ============================================================================
// Reporting
// ============================================================================

/// Outcome of one stage over one phase, as aggregated by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub phase: FlightPhase,
    pub stage: &'static str,
    /// `None` when the stage completed
    pub skipped: Option<SkipReason>,
    pub new_rows: usize,
    pub elapsed_ms: u64,
}

impl StageReport {
    pub fn completed(&self) -> bool {
        self.skipped.is_none()
    }
}

impl std::fmt::Display for StageReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.skipped {
            None => write!(
                f,
                "[{}] {}: completed ({} new rows, {} ms)",
                self.phase, self.stage, self.new_rows, self.elapsed_ms
            ),
            Some(reason) => write!(f, "[{}] {}: skipped ({})", self.phase, self.stage, reason),
        }
    }
}

/// Run one stage with timing and logging, returning the next table and its report.
pub fn run_stage<S: Stage>(
    stage: &S,
    table: PhaseTable,
    phase: FlightPhase,
    ctx: &StageContext<'_>,
) -> (PhaseTable, StageReport) {
    let started = Instant::now();
    let new_rows = table.new_row_count();
    info!(phase = %phase, stage = S::NAME, rows = table.len(), new_rows, "Stage started");

    let outcome = stage.run(table, phase, ctx);
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let skipped = match &outcome {
        StageOutcome::Completed(_) => {
            info!(phase = %phase, stage = S::NAME, elapsed_ms, "Stage completed");
            None
        }
        StageOutcome::Skipped { reason: SkipReason::NoNewRows, .. } => {
            info!(phase = %phase, stage = S::NAME, "Stage skipped: no new rows");
            Some(SkipReason::NoNewRows)
        }
        StageOutcome::Skipped { reason, .. } => {
            warn!(phase = %phase, stage = S::NAME, reason = %reason, "Stage skipped, input passed through");
            Some(reason.clone())
        }
    };

    let report = StageReport {
        phase,
        stage: S::NAME,
        skipped,
        new_rows,
        elapsed_ms,
    };
    (outcome.into_table(), report)
}
