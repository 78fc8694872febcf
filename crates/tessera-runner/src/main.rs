//! Headless driver: run one simulation or a parameter sweep from a JSON run file.

mod telemetry;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tessera_core::{ExperimentConfig, History};
use tessera_world::{ParameterSweep, ReactionDiffusionStepper, TracingSink};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate one population and write its history
    Run {
        /// Experiment file
        config: PathBuf,

        /// History output; `.bin` writes bincode, anything else JSON
        #[arg(short, long, default_value = "history.json")]
        output: PathBuf,

        /// Log progress every this many steps
        #[arg(long, default_value_t = 100)]
        progress_every: usize,
    },
    /// Score a grid of perturbed-parameter runs
    Sweep {
        /// Experiment file
        config: PathBuf,

        #[arg(short, long, default_value = "scores.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_telemetry(args.json_logs)?;

    match args.command {
        Command::Run {
            config,
            output,
            progress_every,
        } => run(&config, &output, progress_every),
        Command::Sweep { config, output } => sweep(&config, &output),
    }
}

fn load(path: &Path) -> Result<ExperimentConfig> {
    ExperimentConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn run(config_path: &Path, output: &Path, progress_every: usize) -> Result<()> {
    let config = load(config_path)?;
    let mut stepper = ReactionDiffusionStepper::from_config(&config)?;
    let mut sink = TracingSink { progress_every };
    let history = stepper.run_with_sink(&config.run, &mut sink)?;
    write_history(&history, output)?;
    info!(
        event = "history_written",
        path = %output.display(),
        snapshots = history.len(),
        "Wrote history"
    );
    Ok(())
}

fn sweep(config_path: &Path, output: &Path) -> Result<()> {
    let config = load(config_path)?;
    let scores = ParameterSweep::new(config.sweep.clone()).run_registered(&config.params)?;
    std::fs::write(output, serde_json::to_string_pretty(&scores)?)
        .with_context(|| format!("writing {}", output.display()))?;
    info!(
        event = "scores_written",
        path = %output.display(),
        "Wrote sweep scores"
    );
    Ok(())
}

fn write_history(history: &History, output: &Path) -> Result<()> {
    let bytes = match output.extension().and_then(|e| e.to_str()) {
        Some("bin") => history.to_bytes()?,
        _ => history.to_json()?.into_bytes(),
    };
    std::fs::write(output, bytes).with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}
