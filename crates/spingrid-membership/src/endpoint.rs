//! Seams between the scheduler and a worker.
//!
//! A `WorkerEndpoint` is what the name directory hands out for a worker.
//! Initializing it pushes the problem definition and yields the two call
//! handles the rest of the coordinator uses: one for dispatching
//! repetitions, one for reading load.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use spin_core::{ProblemDefinition, SolveOutcome, SolveParams, WorkerId};

use crate::error::EndpointError;

/// Load signal reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadSample {
    /// Fraction of thread time spent without work since the last sample, 0.0..=1.0.
    pub idle_rate: f64,
    /// Repetitions currently accepted but not finished.
    pub in_flight: u32,
    /// Repetitions finished since the worker started.
    pub completed: u64,
}

/// Runs one repetition on a worker's copy of the problem.
#[async_trait]
pub trait DispatchHandle: Send + Sync {
    async fn solve(&self, seed: u64, params: SolveParams) -> Result<SolveOutcome, EndpointError>;
}

/// Reads a worker's load.
#[async_trait]
pub trait TelemetryHandle: Send + Sync {
    async fn load_sample(&self) -> Result<LoadSample, EndpointError>;
}

/// Handles resolved during admission. Only a `READY` record carries them.
#[derive(Clone)]
pub struct WorkerHandles {
    pub dispatch: Arc<dyn DispatchHandle>,
    pub telemetry: Arc<dyn TelemetryHandle>,
    /// Number of repetitions the worker runs in parallel.
    pub thread_count: usize,
}

impl fmt::Debug for WorkerHandles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandles")
            .field("thread_count", &self.thread_count)
            .finish_non_exhaustive()
    }
}

/// A worker as seen from the coordinator, before and after admission.
#[async_trait]
pub trait WorkerEndpoint: Send + Sync {
    fn worker_id(&self) -> &WorkerId;

    /// Send the problem definition; resolves once the worker holds its copy.
    async fn initialize(&self, problem: Arc<ProblemDefinition>) -> Result<WorkerHandles, EndpointError>;

    /// Ask the worker to stop.
    async fn shutdown(&self) -> Result<(), EndpointError>;
}
