//! spingrid: distributed simulated annealing.
//!
//! One binary, two roles:
//! - `run`: the coordinator. Loads the problem, admits workers, splits the
//!   repetitions across them and writes the results file.
//! - `worker`: dials a coordinator and solves repetitions on its threads.
//!
//! # Usage
//!
//! ```text
//! spingrid run -i lattice.lat -o results.txt -r 1000 --local-threads 4
//! spingrid worker --coordinator head-node:7878 --threads 16
//! ```

mod worker_mode;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spin_core::{ProblemDefinition, SolveParams, SpinConfig};
use spingrid::console;
use spingrid::{Coordinator, RunHeader, Settings, write_results_file};
use spingrid_membership::{CommandLauncher, PlacementHint};

#[derive(Parser)]
#[command(name = "spingrid", about = "Distributed simulated annealing for spin glasses")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Coordinate a run: distribute repetitions and collect the results.
    Run(RunArgs),
    /// Serve repetitions for a coordinator.
    Worker(WorkerArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Lattice file describing the Hamiltonian.
    #[arg(short, long)]
    input: PathBuf,

    /// Results file.
    #[arg(short, long)]
    output: PathBuf,

    /// Number of repetitions, each with its own seed.
    #[arg(short, long, default_value = "1000")]
    repetitions: usize,

    /// Monte Carlo sweeps per repetition.
    #[arg(short = 'N', long = "sweeps", alias = "Ns", default_value = "1000")]
    sweeps: u64,

    /// Starting inverse temperature.
    #[arg(short = 'b', long, default_value = "0.1")]
    beta0: f64,

    /// Ending inverse temperature.
    #[arg(short = 'e', long, default_value = "3.0")]
    beta1: f64,

    /// Optional spingrid.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address for worker connections; overrides `[coordinator] listen`.
    #[arg(long)]
    listen: Option<String>,

    /// Threads of an in-process worker; 0 disables it.
    #[arg(long, default_value = "0")]
    local_threads: usize,

    /// Worker processes to start on this machine.
    #[arg(long, default_value = "0")]
    workers: usize,

    /// Read operator commands from stdin while the run is in progress.
    #[arg(long)]
    interactive: bool,
}

#[derive(Args)]
pub(crate) struct WorkerArgs {
    /// Coordinator address, host:port.
    #[arg(long)]
    coordinator: String,

    /// Solver threads; defaults to the available parallelism.
    #[arg(long)]
    threads: Option<usize>,

    /// Worker id; defaults to <hostname>-<pid>.
    #[arg(long)]
    id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,spingrid=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run_coordinator(args).await,
        Command::Worker(args) => worker_mode::run_worker(args).await,
    }
}

async fn run_coordinator(args: RunArgs) -> anyhow::Result<()> {
    // ── Configuration ──────────────────────────────────────────

    let config = match &args.config {
        Some(path) => SpinConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => SpinConfig::default(),
    };
    let mut settings = Settings::from_config(&config)?;
    if let Some(listen) = &args.listen {
        if settings.coordinator.advertise == settings.coordinator.listen {
            settings.coordinator.advertise = listen.clone();
        }
        settings.coordinator.listen = listen.clone();
    }

    let params = SolveParams {
        beta0: args.beta0,
        beta1: args.beta1,
        sweeps: args.sweeps,
    };

    // ── Problem ────────────────────────────────────────────────

    let problem = ProblemDefinition::from_file(&args.input)
        .with_context(|| format!("loading problem {}", args.input.display()))?;
    info!(
        input = %args.input.display(),
        spins = problem.size(),
        couplings = problem.coupling_count(),
        "problem loaded"
    );

    // ── Coordinator ────────────────────────────────────────────

    let coordinator = Arc::new(
        Coordinator::builder(Arc::new(problem), settings)
            .with_launcher(Arc::new(CommandLauncher))
            .start()
            .await?,
    );

    if args.local_threads > 0 {
        coordinator.add_local_worker(args.local_threads).await;
    }
    if args.workers > 0 {
        coordinator.grow(args.workers, PlacementHint::Local);
    }

    let console_handle = args.interactive.then(|| {
        let coordinator = coordinator.clone();
        let shutdown = coordinator.shutdown_signal();
        tokio::spawn(async move {
            if let Err(e) = console::run(coordinator, console::stdin_lines(), tokio::io::stdout(), shutdown).await {
                warn!(error = %e, "console stopped");
            }
        })
    });

    // ── Run ────────────────────────────────────────────────────

    let start_calc = Instant::now();
    let result = coordinator.run(args.repetitions, params).await;
    info!(seconds = start_calc.elapsed().as_secs_f64(), "calculation time");

    let outcome = match result {
        Ok(results) => {
            let start_io = Instant::now();
            let header = RunHeader {
                input: &args.input,
                params,
                repetitions: args.repetitions,
            };
            let written = write_results_file(&args.output, &header, &results.outcomes);
            info!(seconds = start_io.elapsed().as_secs_f64(), output = %args.output.display(), "io time");
            written
        }
        Err(e) => Err(anyhow::Error::new(e).context("run failed")),
    };

    // ── Shutdown ───────────────────────────────────────────────

    coordinator.shutdown().await;
    if let Some(handle) = console_handle {
        let _ = handle.await;
    }
    outcome
}
