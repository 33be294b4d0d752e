//! Per-process execution state shared by both endpoint kinds.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{RwLock, Semaphore};
use tracing::debug;

use spin_anneal::Solver;
use spin_core::{ProblemDefinition, SolveOutcome, SolveParams};
use spingrid_membership::{DispatchHandle, EndpointError, LoadSample, TelemetryHandle};

/// Measures how much of the worker's thread time went unused.
///
/// Integrates the number of busy threads over time; `sample` turns the
/// integral since the previous sample into an idle fraction.
#[derive(Clone)]
pub struct IdleTracker {
    threads: usize,
    state: Arc<Mutex<IdleState>>,
}

struct IdleState {
    window_start: Instant,
    last_change: Instant,
    active: usize,
    busy: Duration,
}

impl IdleState {
    fn advance(&mut self, now: Instant) {
        let span = now.saturating_duration_since(self.last_change);
        self.busy += span * self.active as u32;
        self.last_change = now;
    }
}

/// Marks one thread busy until dropped.
pub struct BusyGuard {
    state: Arc<Mutex<IdleState>>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.advance(Instant::now());
        state.active = state.active.saturating_sub(1);
    }
}

impl IdleTracker {
    pub fn new(threads: usize) -> Self {
        let now = Instant::now();
        Self {
            threads: threads.max(1),
            state: Arc::new(Mutex::new(IdleState {
                window_start: now,
                last_change: now,
                active: 0,
                busy: Duration::ZERO,
            })),
        }
    }

    pub fn busy(&self) -> BusyGuard {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.advance(Instant::now());
        state.active += 1;
        BusyGuard {
            state: self.state.clone(),
        }
    }

    /// Idle fraction since the previous sample, then start a new window.
    pub fn sample(&self) -> f64 {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.advance(now);
        let window = now.saturating_duration_since(state.window_start).as_secs_f64() * self.threads as f64;
        let busy = state.busy.as_secs_f64();
        state.window_start = now;
        state.busy = Duration::ZERO;
        if window <= 0.0 {
            return if state.active > 0 { 0.0 } else { 1.0 };
        }
        (1.0 - busy / window).clamp(0.0, 1.0)
    }
}

/// Holds the worker's problem copy and runs repetitions on the blocking
/// pool, at most `threads` at a time.
pub struct WorkerCore {
    solver: Arc<dyn Solver>,
    threads: usize,
    problem: RwLock<Option<Arc<ProblemDefinition>>>,
    permits: Arc<Semaphore>,
    idle: IdleTracker,
    in_flight: Arc<AtomicU32>,
    completed: AtomicU64,
}

struct InFlight(Arc<AtomicU32>);

impl InFlight {
    fn enter(counter: &Arc<AtomicU32>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WorkerCore {
    pub fn new(solver: Arc<dyn Solver>, threads: usize) -> Self {
        let threads = threads.max(1);
        Self {
            solver,
            threads,
            problem: RwLock::new(None),
            permits: Arc::new(Semaphore::new(threads)),
            idle: IdleTracker::new(threads),
            in_flight: Arc::new(AtomicU32::new(0)),
            completed: AtomicU64::new(0),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Install the problem copy. A second call replaces it.
    pub async fn load(&self, problem: Arc<ProblemDefinition>) {
        debug!(spins = problem.size(), solver = self.solver.name(), "problem loaded");
        *self.problem.write().await = Some(problem);
    }

    pub async fn is_loaded(&self) -> bool {
        self.problem.read().await.is_some()
    }

    /// Run one repetition. Waits for a free thread first.
    pub async fn solve(&self, seed: u64, params: SolveParams) -> Result<SolveOutcome, EndpointError> {
        let problem = self
            .problem
            .read()
            .await
            .clone()
            .ok_or(EndpointError::NotInitialized)?;
        let in_flight = InFlight::enter(&self.in_flight);
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EndpointError::Closed)?;

        // The guards move into the blocking closure so a cancelled caller
        // does not release the thread while the repetition still runs.
        let busy = self.idle.busy();
        let solver = self.solver.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _busy = busy;
            let _in_flight = in_flight;
            solver.run(&problem, seed, &params)
        })
        .await
        .map_err(|e| EndpointError::Remote(e.to_string()))?;

        self.completed.fetch_add(1, Ordering::Relaxed);
        Ok(outcome)
    }

    pub fn load_sample(&self) -> LoadSample {
        LoadSample {
            idle_rate: self.idle.sample(),
            in_flight: self.in_flight.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }

    /// Refuse further repetitions. Running ones finish.
    pub fn close(&self) {
        self.permits.close();
    }
}

#[async_trait]
impl DispatchHandle for WorkerCore {
    async fn solve(&self, seed: u64, params: SolveParams) -> Result<SolveOutcome, EndpointError> {
        WorkerCore::solve(self, seed, params).await
    }
}

#[async_trait]
impl TelemetryHandle for WorkerCore {
    async fn load_sample(&self) -> Result<LoadSample, EndpointError> {
        Ok(WorkerCore::load_sample(self))
    }
}
