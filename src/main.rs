//! perfshift - fleet engine performance-shift attribution
//!
//! One invocation is one batch run:
//!
//! ```text
//! library/<phase>.signatures.csv ──┐
//! state/<phase>.history.jsonl  ────┼─► merge ─► pipeline ─► output/*.report.csv
//! input/<phase>.csv ───────────────┘                   └──► state/<phase>.history.jsonl
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use perfshift::config::{ConfigError, PipelineConfig};
use perfshift::pipeline::{merge_ingest, Pipeline};
use perfshift::storage::{self, MERGED_REPORT_FILE, SUMMARY_REPORT_FILE};
use perfshift::types::FlightPhase;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "perfshift")]
#[command(about = "Fleet engine performance-shift attribution pipeline")]
#[command(version)]
struct CliArgs {
    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Ingest new observations, run every stage and write checkpoints and reports
    Run(RunArgs),

    /// Validate a configuration file and print the effective values
    CheckConfig {
        /// Path to the TOML file
        path: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Directory holding `<phase>.csv` files of newly reported observations
    #[arg(long, env = "PERFSHIFT_INPUT_DIR")]
    input_dir: PathBuf,

    /// Directory holding `<phase>.signatures.csv` signature libraries
    #[arg(long, env = "PERFSHIFT_LIBRARY_DIR")]
    library_dir: PathBuf,

    /// Directory holding `<phase>.history.jsonl` checkpoints (created if absent)
    #[arg(long, env = "PERFSHIFT_STATE_DIR")]
    state_dir: PathBuf,

    /// Directory reports are written to (created if absent)
    #[arg(long, env = "PERFSHIFT_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Explicit config file; must load. Without it the standard search order applies
    #[arg(long)]
    config: Option<PathBuf>,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    match args.command {
        SubCommand::Run(run_args) => run(run_args).await,
        SubCommand::CheckConfig { path } => check_config(&path),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::load(),
    };
    let retain_points = config.history.retain_points;

    let libraries = storage::load_libraries(&args.library_dir);
    let pipeline = Pipeline::new(config, libraries).context("Failed to initialise pipeline")?;

    // A corrupt checkpoint or input file aborts before anything is overwritten
    let mut tables = BTreeMap::new();
    for phase in FlightPhase::ALL {
        let checkpoint = storage::checkpoint_path(&args.state_dir, phase);
        let history = storage::load_checkpoint(&checkpoint, phase)
            .with_context(|| format!("Failed to load {phase} history"))?;
        let input = storage::observations_path(&args.input_dir, phase);
        let incoming = storage::read_observations(&input, phase)
            .with_context(|| format!("Failed to read {phase} observations"))?;
        tables.insert(phase, merge_ingest(history, incoming, retain_points));
    }

    let output = pipeline.run(tables).await;
    for stage in &output.report.stages {
        info!("{}", stage);
    }
    let failed = output.report.failed_phases();

    for (phase, mut table) in output.tables {
        storage::write_phase_report(&storage::phase_report_path(&args.output_dir, phase), &table, pipeline.config())
            .with_context(|| format!("Failed to write {phase} report"))?;

        // Keep the previous checkpoint so the same observations are retried next run
        if failed.contains(&phase) {
            warn!(phase = %phase, "Phase failed, checkpoint left untouched");
            continue;
        }
        table.seal();
        storage::save_checkpoint(&storage::checkpoint_path(&args.state_dir, phase), &table)
            .with_context(|| format!("Failed to save {phase} checkpoint"))?;
    }

    storage::write_merged_report(&args.output_dir.join(MERGED_REPORT_FILE), &output.correlation)
        .context("Failed to write merged report")?;
    storage::write_summary_report(&args.output_dir.join(SUMMARY_REPORT_FILE), &output.correlation)
        .context("Failed to write summary report")?;

    let fired: Vec<String> = output
        .correlation
        .fired_installations()
        .map(|s| s.installation.to_string())
        .collect();
    info!(fired = fired.len(), "Installations with a DN fire: {}", fired.join(", "));

    if !failed.is_empty() {
        bail!("{} phase(s) failed: {:?}", failed.len(), failed);
    }
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    match PipelineConfig::load_from_file(path) {
        Ok(config) => {
            println!("{} is valid. Effective configuration:\n", path.display());
            println!("{}", config.to_toml()?);
            Ok(())
        }
        Err(ConfigError::Validation(errors)) => {
            for e in &errors {
                println!("error: {e}");
            }
            bail!("{} has {} validation error(s)", path.display(), errors.len())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to load {}", path.display())),
    }
}
