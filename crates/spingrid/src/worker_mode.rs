//! Worker mode: runs on compute nodes and serves one coordinator.
//!
//! The process:
//! 1. Picks its id (`--id`, or `<hostname>-<pid>`)
//! 2. Dials the coordinator and announces itself
//! 3. Solves repetitions until the coordinator retires it, hangs up, or
//!    the process receives Ctrl-C

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use spin_anneal::SaSolver;
use spin_core::WorkerId;
use spingrid_transport::WorkerAgent;

use crate::WorkerArgs;

pub(crate) async fn run_worker(args: WorkerArgs) -> anyhow::Result<()> {
    let id = WorkerId::new(args.id.unwrap_or_else(default_worker_id));
    let threads = args
        .threads
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1)
        .max(1);
    info!(worker_id = %id, threads, coordinator = %args.coordinator, "spingrid worker starting");

    let agent = WorkerAgent::new(id.clone(), Arc::new(SaSolver), threads);

    tokio::select! {
        served = agent.run(&args.coordinator) => {
            served.with_context(|| format!("serving coordinator {}", args.coordinator))?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            info!(worker_id = %id, "interrupted");
        }
    }

    info!(worker_id = %id, "spingrid worker stopped");
    Ok(())
}

fn default_worker_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "worker".to_string());
    format!("{host}-{}", std::process::id())
}
