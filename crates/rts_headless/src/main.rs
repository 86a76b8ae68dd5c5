//! Headless scenario runner.
//!
//! Runs RON scenarios without graphics and prints a JSON summary on
//! stdout. Designed for CI testing and determinism verification.
//!
//! # Usage
//!
//! ```bash
//! # Run a scenario to completion
//! cargo run -p rts_headless -- run --scenario scenarios/skirmish.ron
//!
//! # Stop early and keep the state for later
//! cargo run -p rts_headless -- run --scenario scenarios/skirmish.ron --ticks 500 --save state.bin
//!
//! # Pick up where a saved run stopped
//! cargo run -p rts_headless -- resume --scenario scenarios/skirmish.ron --state state.bin
//!
//! # Verify determinism across parallel runs and a save/resume split
//! cargo run -p rts_headless -- verify --scenario scenarios/skirmish.ron --runs 8 --split 400
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides the level chosen by `--verbose`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rts_headless::{run_scenario, verify_scenario, Scenario, ScenarioRun};

#[derive(Parser)]
#[command(name = "rts_headless")]
#[command(about = "Headless RTS scenario runner for CI and determinism checks")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario and print its summary
    Run {
        /// Scenario file to load
        #[arg(short, long)]
        scenario: PathBuf,

        /// Ticks to run instead of the scenario's own length
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Write the summary here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Save the final simulation state
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Continue a run from a saved state
    Resume {
        /// Scenario the state was saved from
        #[arg(short, long)]
        scenario: PathBuf,

        /// Saved state
        #[arg(long)]
        state: PathBuf,

        /// Tick to stop at instead of the scenario's own length
        #[arg(short, long)]
        ticks: Option<u64>,
    },

    /// Verify that repeated runs end in the same state
    Verify {
        /// Scenario file to load
        #[arg(short, long)]
        scenario: PathBuf,

        /// Number of parallel runs
        #[arg(short, long, default_value = "4")]
        runs: usize,

        /// Ticks to run instead of the scenario's own length
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Also save and resume at this tick
        #[arg(long)]
        split: Option<u64>,
    },

    /// Time a scenario run
    Benchmark {
        /// Scenario file to load
        #[arg(short, long)]
        scenario: PathBuf,

        /// Number of ticks to run
        #[arg(short, long, default_value = "10000")]
        ticks: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging to stderr (stdout is for results)
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            ticks,
            output,
            save,
        } => cmd_run(&scenario, ticks, output.as_deref(), save.as_deref()),
        Commands::Resume {
            scenario,
            state,
            ticks,
        } => cmd_resume(&scenario, &state, ticks),
        Commands::Verify {
            scenario,
            runs,
            ticks,
            split,
        } => cmd_verify(&scenario, runs, ticks, split),
        Commands::Benchmark { scenario, ticks } => cmd_benchmark(&scenario, ticks),
    }
}

fn fail(context: &str, error: impl std::fmt::Display) -> ! {
    eprintln!("{context}: {error}");
    std::process::exit(1);
}

fn load(path: &Path) -> Scenario {
    tracing::info!("Loading scenario: {}", path.display());
    Scenario::load(path).unwrap_or_else(|e| fail("Failed to load scenario", e))
}

fn emit<T: Serialize>(value: &T, output: Option<&Path>) {
    let json = serde_json::to_string_pretty(value).unwrap_or_else(|e| fail("Failed to encode summary", e));
    match output {
        Some(path) => {
            std::fs::write(path, json).unwrap_or_else(|e| fail("Failed to write summary", e));
            tracing::info!("Summary written to {}", path.display());
        }
        None => println!("{json}"),
    }
}

/// Run a scenario from tick zero
fn cmd_run(path: &Path, ticks: Option<u64>, output: Option<&Path>, save: Option<&Path>) {
    let scenario = load(path);
    let Some(save) = save else {
        let summary = run_scenario(&scenario, ticks).unwrap_or_else(|e| fail("Scenario failed", e));
        emit(&summary, output);
        return;
    };

    let mut run = ScenarioRun::new(&scenario).unwrap_or_else(|e| fail("Scenario failed", e));
    run.run_until(ticks.unwrap_or(scenario.ticks));
    let bytes = run.save().unwrap_or_else(|e| fail("Failed to save state", e));
    std::fs::write(save, bytes).unwrap_or_else(|e| fail("Failed to write state", e));
    tracing::info!("State saved to {}", save.display());
    emit(&run.summary(), output);
}

/// Continue a saved run
fn cmd_resume(path: &Path, state: &Path, ticks: Option<u64>) {
    let scenario = load(path);
    let bytes = std::fs::read(state).unwrap_or_else(|e| fail("Failed to read state", e));
    let mut run = ScenarioRun::resume(&scenario, &bytes).unwrap_or_else(|e| fail("Failed to resume", e));
    run.run_until(ticks.unwrap_or(scenario.ticks));
    emit(&run.summary(), None);
}

/// Run a scenario several times and compare final states
fn cmd_verify(path: &Path, runs: usize, ticks: Option<u64>, split: Option<u64>) {
    let scenario = load(path);
    tracing::info!("Verifying determinism: {} ({} runs)", scenario.name, runs);
    let verification =
        verify_scenario(&scenario, runs.max(1), ticks, split).unwrap_or_else(|e| fail("Scenario failed", e));
    emit(&verification, None);

    if verification.is_deterministic() {
        eprintln!("PASS: All {runs} runs produced identical results");
    } else {
        eprintln!("FAIL: Non-determinism detected!");
        std::process::exit(1);
    }
}

/// Time a fixed number of ticks
fn cmd_benchmark(path: &Path, ticks: u64) {
    let scenario = load(path);
    let mut run = ScenarioRun::new(&scenario).unwrap_or_else(|e| fail("Scenario failed", e));

    let start = Instant::now();
    run.run_until(ticks);
    let elapsed = start.elapsed();

    let tps = ticks as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    eprintln!("Benchmark complete:");
    eprintln!("  Ticks: {ticks}");
    eprintln!("  Objects: {}", run.simulation().objects().len());
    eprintln!("  Time: {elapsed:?}");
    eprintln!("  Ticks/sec: {tps:.0}");
    eprintln!("  Final hash: {:016x}", run.simulation().state_hash());
}
