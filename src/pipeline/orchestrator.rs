//! Pipeline orchestrator
//!
//! ```text
//! take-off ─► flags ─► smoother ─► lag ─► attribution ─► polarity ─► exceedance ─┐
//! climb    ─► flags ─► smoother ─► lag ─► attribution ─► polarity ─► exceedance ─┼─► correlator
//! cruise   ─► flags ─► smoother ─► lag ─► attribution ─► polarity ─► exceedance ─┘
//! ```
//!
//! Each phase runs as one blocking task in a `JoinSet`; the phases share no
//! mutable state. A phase whose task panics yields its input table unchanged
//! and the other phases carry on. The correlator runs once all three tables
//! are back.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use rayon::ThreadPool;
use thiserror::Error;
use tokio::task::{Id, JoinSet};
use tracing::{error, info};

use crate::config::{ConfigError, PipelineConfig};
use crate::types::{CorrelationReport, FlightPhase, PhaseTable, SignatureLibraries};

use super::attribution::AttributionSolver;
use super::correlator::CrossPhaseCorrelator;
use super::exceedance::ExceedanceSummarizer;
use super::flags::DiscontinuityFlagger;
use super::lag::LagShiftExtractor;
use super::polarity::PolarityMapper;
use super::smoother::RollingSmoother;
use super::stage::{run_stage, SkipReason, Stage, StageContext, StageReport};

/// Stage names in execution order.
pub const STAGE_ORDER: [&str; 6] = [
    DiscontinuityFlagger::NAME,
    RollingSmoother::NAME,
    LagShiftExtractor::NAME,
    AttributionSolver::NAME,
    PolarityMapper::NAME,
    ExceedanceSummarizer::NAME,
];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build solver thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

// ============================================================================
// Output
// ============================================================================

/// Per-stage reports of one run, ordered by phase then stage.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn skipped(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|s| !s.completed())
    }

    pub fn failed_phases(&self) -> Vec<FlightPhase> {
        let mut phases: Vec<FlightPhase> = self
            .stages
            .iter()
            .filter(|s| matches!(s.skipped, Some(SkipReason::Failed(_))))
            .map(|s| s.phase)
            .collect();
        phases.dedup();
        phases
    }
}

impl std::fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let completed = self.stages.iter().filter(|s| s.completed()).count();
        write!(
            f,
            "Pipeline: {} stage runs, {} completed, {} skipped",
            self.stages.len(),
            completed,
            self.stages.len() - completed
        )
    }
}

/// Everything one run produces.
#[derive(Debug)]
pub struct PipelineOutput {
    /// One table per flight phase, always all three
    pub tables: BTreeMap<FlightPhase, PhaseTable>,
    pub correlation: CorrelationReport,
    pub report: PipelineReport,
}

// ============================================================================
// Pipeline
// ============================================================================

struct PipelineInner {
    config: PipelineConfig,
    libraries: SignatureLibraries,
    pool: ThreadPool,
}

/// Validated configuration, signature libraries and worker pool for a run.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, libraries: SignatureLibraries) -> Result<Self, PipelineError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.attribution.worker_threads)
            .thread_name(|i| format!("perfshift-fit-{i}"))
            .build()?;
        info!(workers = pool.current_num_threads(), "Solver pool ready");
        Ok(Self {
            inner: Arc::new(PipelineInner {
                config,
                libraries,
                pool,
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Run every stage over one phase table on the calling thread.
    pub fn run_phase(&self, table: PhaseTable) -> (PhaseTable, Vec<StageReport>) {
        Self::process_phase(&self.inner, table)
    }

    /// Run all three phases concurrently, then correlate.
    ///
    /// Missing phases are treated as empty tables.
    pub async fn run(&self, tables: BTreeMap<FlightPhase, PhaseTable>) -> PipelineOutput {
        self.run_with(tables, Self::process_phase).await
    }

    async fn run_with<F>(
        &self,
        mut tables: BTreeMap<FlightPhase, PhaseTable>,
        process: F,
    ) -> PipelineOutput
    where
        F: Fn(&PipelineInner, PhaseTable) -> (PhaseTable, Vec<StageReport>) + Copy + Send + 'static,
    {
        let started = Instant::now();
        let mut inputs: BTreeMap<FlightPhase, PhaseTable> = BTreeMap::new();
        let mut task_set: JoinSet<(PhaseTable, Vec<StageReport>)> = JoinSet::new();
        let mut task_phases: BTreeMap<Id, FlightPhase> = BTreeMap::new();

        for phase in FlightPhase::ALL {
            let table = tables.remove(&phase).unwrap_or_else(|| PhaseTable::empty(phase));
            inputs.insert(phase, table.clone());
            let inner = Arc::clone(&self.inner);
            let handle = task_set.spawn_blocking(move || process(&inner, table));
            task_phases.insert(handle.id(), phase);
        }

        let mut outputs: BTreeMap<FlightPhase, (PhaseTable, Vec<StageReport>)> = BTreeMap::new();
        let mut failures: BTreeMap<FlightPhase, String> = BTreeMap::new();
        while let Some(result) = task_set.join_next_with_id().await {
            match result {
                Ok((id, output)) => {
                    if let Some(&phase) = task_phases.get(&id) {
                        outputs.insert(phase, output);
                    }
                }
                Err(e) => {
                    let Some(&phase) = task_phases.get(&e.id()) else {
                        error!(error = %e, "Unknown task failed");
                        continue;
                    };
                    error!(phase = %phase, error = %e, "Phase task failed, its input passes through unchanged");
                    failures.insert(phase, e.to_string());
                }
            }
        }

        let mut report = PipelineReport::default();
        let mut final_tables = BTreeMap::new();
        for (phase, input) in inputs {
            match outputs.remove(&phase) {
                Some((table, reports)) => {
                    report.stages.extend(reports);
                    final_tables.insert(phase, table);
                }
                None => {
                    let reason = SkipReason::Failed(
                        failures.remove(&phase).unwrap_or_else(|| "phase task lost".to_string()),
                    );
                    report.stages.extend(STAGE_ORDER.iter().map(|&stage| StageReport {
                        phase,
                        stage,
                        skipped: Some(reason.clone()),
                        new_rows: input.new_row_count(),
                        elapsed_ms: 0,
                    }));
                    final_tables.insert(phase, input);
                }
            }
        }

        let correlation = CrossPhaseCorrelator::correlate(
            &final_tables[&FlightPhase::TakeOff],
            &final_tables[&FlightPhase::Climb],
            &final_tables[&FlightPhase::Cruise],
            &self.inner.config.correlation,
        );

        info!(elapsed_ms = started.elapsed().as_millis() as u64, "{}", report);
        PipelineOutput {
            tables: final_tables,
            correlation,
            report,
        }
    }

    fn process_phase(inner: &PipelineInner, table: PhaseTable) -> (PhaseTable, Vec<StageReport>) {
        let phase = table.phase();
        let ctx = StageContext {
            config: &inner.config,
            libraries: &inner.libraries,
            pool: &inner.pool,
        };
        let mut reports = Vec::with_capacity(STAGE_ORDER.len());

        let table = step(&DiscontinuityFlagger, table, phase, &ctx, &mut reports);
        let table = step(&RollingSmoother, table, phase, &ctx, &mut reports);
        let table = step(&LagShiftExtractor, table, phase, &ctx, &mut reports);
        let table = step(&AttributionSolver, table, phase, &ctx, &mut reports);
        let table = step(&PolarityMapper, table, phase, &ctx, &mut reports);
        let table = step(&ExceedanceSummarizer, table, phase, &ctx, &mut reports);
        (table, reports)
    }
}

fn step<S: Stage>(
    stage: &S,
    table: PhaseTable,
    phase: FlightPhase,
    ctx: &StageContext<'_>,
    reports: &mut Vec<StageReport>,
) -> PhaseTable {
    let (table, report) = run_stage(stage, table, phase, ctx);
    reports.push(report);
    table
}
