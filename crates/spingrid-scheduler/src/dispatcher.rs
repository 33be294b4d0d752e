//! Task dispatcher: runs a batch of repetitions over the ready workers.
//!
//! Each pass of the dispatch loop:
//! 1. re-reads the membership table;
//! 2. empties the queues of workers that left `READY` (except `FINALIZING`
//!    ones, which keep draining) or were re-admitted since the queue was
//!    filled, and requeues their unfinished seeds;
//! 3. harvests finished calls from the front of every queue;
//! 4. fills every ready worker's queue up to its bound, retries first;
//! 5. sleeps `poll_interval`.
//!
//! A call that fails or spends longer than `task_timeout` at the front of
//! its queue is requeued and its worker marked `INVALID`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use spin_core::{SchedulerSettings, SolveOutcome, SolveParams, WorkerId};
use spingrid_membership::{MembershipController, WorkerState};

use crate::aggregator::ResultAggregator;
use crate::error::{SchedulerError, SchedulerResult};
use crate::queue::{Harvest, PendingQueue};

/// Dispatcher tunables: the `[scheduler]` section with defaults applied.
pub type DispatcherConfig = SchedulerSettings;

/// Outcome of one `spawn` call.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// One outcome per requested repetition, in completion order.
    pub outcomes: Vec<SolveOutcome>,
    pub requested: usize,
    /// Slots that were dispatched more than once.
    pub requeued: usize,
    /// Completed repetitions per worker.
    pub per_worker: BTreeMap<WorkerId, usize>,
    /// Deepest any worker queue got at submission time.
    pub max_queue_depth: usize,
    pub elapsed: Duration,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.len() == self.requested
    }

    /// Repetitions per second over the whole run.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.outcomes.len() as f64 / secs } else { 0.0 }
    }
}

/// Splits batches of repetitions across ready workers.
pub struct TaskDispatcher {
    controller: MembershipController,
    aggregator: Arc<ResultAggregator>,
    config: DispatcherConfig,
    seeds: AtomicU64,
    run_lock: Mutex<()>,
    requested: AtomicUsize,
    completed: AtomicUsize,
    aborted: AtomicBool,
}

/// Mutable state of one `spawn` call.
struct Run {
    total: usize,
    params: SolveParams,
    queues: HashMap<WorkerId, PendingQueue>,
    retry: VecDeque<u64>,
    fresh_dispatched: usize,
    requeued: usize,
    per_worker: BTreeMap<WorkerId, usize>,
    max_queue_depth: usize,
    ever_ready: bool,
    last_report: Instant,
    completed_at_report: usize,
}

impl TaskDispatcher {
    pub fn new(controller: MembershipController, config: DispatcherConfig) -> Self {
        Self {
            controller,
            aggregator: Arc::new(ResultAggregator::new()),
            seeds: AtomicU64::new(config.seed_base),
            config,
            run_lock: Mutex::new(()),
            requested: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// `(completed, requested)` of the current or last run.
    pub fn progress(&self) -> (usize, usize) {
        (
            self.completed.load(Ordering::Acquire),
            self.requested.load(Ordering::Acquire),
        )
    }

    /// Stop the current run at its next pass.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// Run `total` repetitions and return their outcomes.
    ///
    /// Waits for workers if none are ready. Only one run executes at a time;
    /// a second caller waits for the first to finish.
    pub async fn spawn(&self, total: usize, params: SolveParams) -> SchedulerResult<ResultSet> {
        let _guard = self.run_lock.lock().await;

        self.aborted.store(false, Ordering::Release);
        self.seeds.store(self.config.seed_base, Ordering::Release);
        self.requested.store(total, Ordering::Release);
        self.completed.store(0, Ordering::Release);
        self.aggregator.drain();

        if total == 0 {
            return Ok(ResultSet::default());
        }

        let started = Instant::now();
        let mut run = Run {
            total,
            params,
            queues: HashMap::new(),
            retry: VecDeque::new(),
            fresh_dispatched: 0,
            requeued: 0,
            per_worker: BTreeMap::new(),
            max_queue_depth: 0,
            ever_ready: false,
            last_report: started,
            completed_at_report: 0,
        };
        info!(repetitions = total, sweeps = params.sweeps, "run started");

        loop {
            let completed = self.aggregator.count();
            self.completed.store(completed, Ordering::Release);
            if completed >= total {
                break;
            }
            if self.aborted.load(Ordering::Acquire) {
                warn!(completed, requested = total, "run aborted");
                return Err(SchedulerError::Aborted { completed, requested: total });
            }
            if let Some(deadline) = self.config.run_deadline
                && started.elapsed() >= deadline
            {
                warn!(completed, requested = total, "run deadline exceeded");
                return Err(SchedulerError::DeadlineExceeded { completed, requested: total });
            }

            self.pass(&mut run).await;

            if !run.ever_ready && started.elapsed() >= self.config.ready_timeout {
                warn!(waited = ?self.config.ready_timeout, "no worker became ready");
                return Err(SchedulerError::NoWorkers { waited: self.config.ready_timeout });
            }

            self.report(&mut run);
            tokio::time::sleep(self.config.poll_interval).await;
        }

        let elapsed = started.elapsed();
        let outcomes = self.aggregator.drain();
        let result = ResultSet {
            outcomes,
            requested: total,
            requeued: run.requeued,
            per_worker: std::mem::take(&mut run.per_worker),
            max_queue_depth: run.max_queue_depth,
            elapsed,
        };
        info!(
            repetitions = result.len(),
            requeued = result.requeued,
            workers = result.per_worker.len(),
            elapsed_secs = elapsed.as_secs_f64(),
            solves_per_sec = result.throughput(),
            "run complete"
        );
        Ok(result)
    }

    async fn pass(&self, run: &mut Run) {
        let snapshot = self.controller.table().snapshot().await;
        let states: HashMap<&WorkerId, (WorkerState, u64)> =
            snapshot.iter().map(|r| (&r.id, (r.state, r.admission))).collect();
        let state_of = |id: &WorkerId| states.get(id).map_or(WorkerState::Invalid, |s| s.0);
        let admission_of = |id: &WorkerId| states.get(id).map_or(0, |s| s.1);

        // Workers that are gone, or came back under a new admission: keep
        // what finished, requeue the rest.
        for (id, queue) in run.queues.iter_mut() {
            let current = queue.admission() == admission_of(id);
            if queue.is_empty()
                || (current && matches!(state_of(id), WorkerState::Ready | WorkerState::Finalizing))
            {
                continue;
            }
            if !current {
                debug!(worker_id = %id, admission = admission_of(id), "worker re-admitted; dropping its old queue");
            }
            let (done, lost) = queue.abandon().await;
            for outcome in done {
                self.collect(run_per_worker(&mut run.per_worker, id), outcome);
            }
            if !lost.is_empty() {
                info!(worker_id = %id, slots = lost.len(), "requeueing slots of departed worker");
                run.requeued += lost.len();
                run.retry.extend(lost);
            }
        }
        run.queues.retain(|id, q| {
            (!q.is_empty() || state_of(id) == WorkerState::Ready) && q.admission() == admission_of(id)
        });

        // Harvest.
        let now = Instant::now();
        let mut failed: Vec<(WorkerId, String)> = Vec::new();
        for (id, queue) in run.queues.iter_mut() {
            while let Some(harvest) = queue.poll_front(now).await {
                match harvest {
                    Harvest::Done(outcome) => {
                        self.collect(run_per_worker(&mut run.per_worker, id), outcome);
                    }
                    Harvest::Failed { seed, error } => {
                        debug!(worker_id = %id, seed, %error, "repetition failed");
                        run.retry.push_back(seed);
                        run.requeued += 1;
                        failed.push((id.clone(), error));
                        break;
                    }
                    Harvest::Expired { seed } => {
                        run.retry.push_back(seed);
                        run.requeued += 1;
                        failed.push((id.clone(), format!("repetition {seed} timed out")));
                        break;
                    }
                }
            }
        }
        for (id, reason) in &failed {
            self.controller.invalidate(id, reason).await;
        }

        // Dispatch.
        for record in snapshot.iter().filter(|r| r.is_ready()) {
            if failed.iter().any(|(id, _)| id == &record.id) {
                continue;
            }
            let Some(handle) = record.dispatch.clone() else {
                continue;
            };
            run.ever_ready = true;

            let bound = record.thread_count.max(1) * self.config.queue_multiplier;
            let queue = run
                .queues
                .entry(record.id.clone())
                .or_insert_with(|| PendingQueue::new(bound).with_admission(record.admission));
            queue.set_bound(bound);

            while queue.has_room() {
                let seed = if let Some(seed) = run.retry.pop_front() {
                    seed
                } else if run.fresh_dispatched < run.total {
                    run.fresh_dispatched += 1;
                    self.seeds.fetch_add(1, Ordering::AcqRel)
                } else {
                    break;
                };

                let handle = handle.clone();
                let params = run.params;
                let task = tokio::spawn(async move { handle.solve(seed, params).await });
                if let Err(task) = queue.push(seed, task, self.config.task_timeout) {
                    task.abort();
                    run.retry.push_front(seed);
                    break;
                }
                run.max_queue_depth = run.max_queue_depth.max(queue.len());
            }
        }
    }

    fn collect(&self, counter: &mut usize, outcome: SolveOutcome) {
        *counter += 1;
        self.aggregator.add(outcome);
    }

    fn report(&self, run: &mut Run) {
        let elapsed = run.last_report.elapsed();
        if elapsed < self.config.report_interval {
            return;
        }
        let completed = self.aggregator.count();
        let rate = completed.saturating_sub(run.completed_at_report) as f64 / elapsed.as_secs_f64();
        let in_flight: usize = run.queues.values().map(PendingQueue::len).sum();
        info!(
            completed,
            requested = run.total,
            in_flight,
            workers = run.queues.len(),
            solves_per_sec = rate,
            "dispatch progress"
        );
        run.last_report = Instant::now();
        run.completed_at_report = completed;
    }
}

fn run_per_worker<'a>(per_worker: &'a mut BTreeMap<WorkerId, usize>, id: &WorkerId) -> &'a mut usize {
    per_worker.entry(id.clone()).or_insert(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use spin_core::{Coupling, ProblemDefinition};
    use spingrid_membership::{
        DispatchHandle, EndpointError, LoadSample, MembershipTable, NameDirectory, TelemetryHandle,
        WorkerEndpoint, WorkerHandles,
    };

    #[derive(Default)]
    struct FakeWorker {
        delay: Duration,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
        seeds: StdMutex<Vec<u64>>,
        stall: AtomicBool,
        fail: AtomicBool,
        /// Solve one repetition at a time, like a single-threaded worker.
        serial: bool,
        gate: Mutex<()>,
    }

    #[async_trait]
    impl DispatchHandle for FakeWorker {
        async fn solve(&self, seed: u64, _params: SolveParams) -> Result<SolveOutcome, EndpointError> {
            self.seeds.lock().unwrap().push(seed);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if self.stall.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Err(EndpointError::Closed);
            }
            let _turn = if self.serial { Some(self.gate.lock().await) } else { None };
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(SolveOutcome { seed, energy: -(seed as f64), spins: vec![0, 1] })
        }
    }

    #[async_trait]
    impl TelemetryHandle for FakeWorker {
        async fn load_sample(&self) -> Result<LoadSample, EndpointError> {
            Ok(LoadSample {
                idle_rate: 0.0,
                in_flight: self.in_flight.load(Ordering::SeqCst),
                completed: 0,
            })
        }
    }

    struct FakeEndpoint {
        id: WorkerId,
        threads: usize,
        worker: Arc<FakeWorker>,
    }

    #[async_trait]
    impl WorkerEndpoint for FakeEndpoint {
        fn worker_id(&self) -> &WorkerId {
            &self.id
        }

        async fn initialize(&self, _problem: Arc<ProblemDefinition>) -> Result<WorkerHandles, EndpointError> {
            Ok(WorkerHandles {
                dispatch: self.worker.clone(),
                telemetry: self.worker.clone(),
                thread_count: self.threads,
            })
        }

        async fn shutdown(&self) -> Result<(), EndpointError> {
            Ok(())
        }
    }

    fn controller() -> MembershipController {
        let problem = ProblemDefinition::from_couplings(2, vec![Coupling { sites: vec![0, 1], value: 1.0 }]).unwrap();
        MembershipController::new(
            Arc::new(MembershipTable::new()),
            Arc::new(NameDirectory::new()),
            Arc::new(problem),
        )
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            poll_interval: Duration::from_millis(2),
            ready_timeout: Duration::from_secs(5),
            task_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    async fn add_worker(ctl: &MembershipController, name: &str, threads: usize, worker: FakeWorker) -> Arc<FakeWorker> {
        let id = WorkerId::from(name);
        let worker = Arc::new(worker);
        let endpoint = Arc::new(FakeEndpoint { id: id.clone(), threads, worker: worker.clone() });
        ctl.directory().register(&id, endpoint).await;
        ctl.announce(&id).await;
        assert!(ctl.admit(&id).await.unwrap());
        worker
    }

    fn quick() -> FakeWorker {
        FakeWorker { delay: Duration::from_millis(1), ..Default::default() }
    }

    fn unique_seeds(outcomes: &[SolveOutcome]) -> HashSet<u64> {
        outcomes.iter().map(|o| o.seed).collect()
    }

    #[tokio::test]
    async fn zero_repetitions_returns_immediately() {
        let dispatcher = TaskDispatcher::new(controller(), config());
        let result = dispatcher.spawn(0, SolveParams::default()).await.unwrap();
        assert!(result.is_empty());
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn three_workers_thirty_repetitions() {
        let ctl = controller();
        let mut workers = Vec::new();
        for name in ["w1", "w2", "w3"] {
            workers.push(add_worker(&ctl, name, 1, quick()).await);
        }
        let dispatcher = TaskDispatcher::new(ctl, config());
        let result = dispatcher.spawn(30, SolveParams::default()).await.unwrap();

        assert_eq!(result.len(), 30);
        assert_eq!(unique_seeds(&result.outcomes), (0..30).collect());
        assert_eq!(result.per_worker.values().sum::<usize>(), 30);
        assert!(result.max_queue_depth <= 5);
        for w in &workers {
            assert!(w.max_in_flight.load(Ordering::SeqCst) <= 5);
        }
        assert_eq!(dispatcher.progress(), (30, 30));
    }

    #[tokio::test]
    async fn seeds_unique_for_various_worker_counts() {
        for count in [1usize, 2, 8] {
            let ctl = controller();
            let mut workers = Vec::new();
            for i in 0..count {
                workers.push(add_worker(&ctl, &format!("w{i}"), 2, quick()).await);
            }
            let dispatcher = TaskDispatcher::new(ctl, DispatcherConfig { seed_base: 100, ..config() });
            let result = dispatcher.spawn(64, SolveParams::default()).await.unwrap();
            assert_eq!(result.len(), 64);

            let mut dispatched: Vec<u64> = workers.iter().flat_map(|w| w.seeds.lock().unwrap().clone()).collect();
            dispatched.sort_unstable();
            assert_eq!(dispatched, (100..164).collect::<Vec<_>>(), "{count} workers");
        }
    }

    #[tokio::test]
    async fn repeated_spawn_restarts_seed_counter() {
        let ctl = controller();
        add_worker(&ctl, "w1", 2, quick()).await;
        let dispatcher = TaskDispatcher::new(ctl, config());
        let a = dispatcher.spawn(10, SolveParams::default()).await.unwrap();
        let b = dispatcher.spawn(10, SolveParams::default()).await.unwrap();
        assert_eq!(unique_seeds(&a.outcomes), unique_seeds(&b.outcomes));
    }

    #[tokio::test]
    async fn invalidated_worker_slots_are_requeued() {
        let ctl = controller();
        add_worker(&ctl, "w1", 1, quick()).await;
        let w2 = add_worker(&ctl, "w2", 1, FakeWorker { stall: AtomicBool::new(true), ..Default::default() }).await;
        add_worker(&ctl, "w3", 1, quick()).await;

        let dispatcher = Arc::new(TaskDispatcher::new(ctl.clone(), config()));
        let run = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.spawn(30, SolveParams::default()).await })
        };

        while w2.in_flight.load(Ordering::SeqCst) < 5 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        ctl.invalidate(&WorkerId::from("w2"), "lost contact").await;

        let result = run.await.unwrap().unwrap();
        assert_eq!(result.len(), 30);
        assert_eq!(result.requeued, 5);
        assert_eq!(unique_seeds(&result.outcomes).len(), 30);
        assert!(!result.per_worker.contains_key(&WorkerId::from("w2")));
    }

    #[tokio::test]
    async fn timed_out_call_invalidates_worker() {
        let ctl = controller();
        add_worker(&ctl, "slow", 1, FakeWorker { stall: AtomicBool::new(true), ..Default::default() }).await;
        add_worker(&ctl, "fast", 1, quick()).await;

        let dispatcher = TaskDispatcher::new(
            ctl.clone(),
            DispatcherConfig { task_timeout: Duration::from_millis(50), ..config() },
        );
        let result = dispatcher.spawn(20, SolveParams::default()).await.unwrap();
        assert_eq!(result.len(), 20);
        assert!(result.requeued >= 5);
        assert_eq!(ctl.table().state_of(&WorkerId::from("slow")).await, WorkerState::Invalid);
    }

    #[tokio::test]
    async fn queued_calls_are_not_charged_for_waiting() {
        let ctl = controller();
        let worker = FakeWorker { delay: Duration::from_millis(40), serial: true, ..Default::default() };
        add_worker(&ctl, "single", 1, worker).await;

        // Five calls queue behind one thread; the last finishes ~200ms after
        // submission, well past the timeout, but each runs for only 40ms.
        let dispatcher = TaskDispatcher::new(
            ctl.clone(),
            DispatcherConfig { task_timeout: Duration::from_millis(120), ..config() },
        );
        let result = dispatcher.spawn(10, SolveParams::default()).await.unwrap();
        assert_eq!(result.len(), 10);
        assert_eq!(result.requeued, 0);
        assert_eq!(ctl.table().state_of(&WorkerId::from("single")).await, WorkerState::Ready);
    }

    #[tokio::test]
    async fn readmitted_worker_gets_a_fresh_queue() {
        let ctl = controller();
        let id = WorkerId::from("w1");
        let worker = add_worker(&ctl, "w1", 1, FakeWorker { stall: AtomicBool::new(true), ..quick() }).await;

        let dispatcher = Arc::new(TaskDispatcher::new(
            ctl.clone(),
            DispatcherConfig { poll_interval: Duration::from_millis(50), ..config() },
        ));
        let run = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.spawn(10, SolveParams::default()).await })
        };
        while worker.in_flight.load(Ordering::SeqCst) < 5 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Drop and re-admit between two passes; the calls made under the old
        // admission will never answer.
        ctl.invalidate(&id, "connection reset").await;
        assert!(ctl.announce(&id).await);
        assert!(ctl.admit(&id).await.unwrap());
        worker.stall.store(false, Ordering::SeqCst);

        let result = run.await.unwrap().unwrap();
        assert_eq!(result.len(), 10);
        assert_eq!(result.requeued, 5);
        assert_eq!(unique_seeds(&result.outcomes), (0..10).collect());
        assert_eq!(ctl.table().state_of(&id).await, WorkerState::Ready);
        assert_eq!(ctl.table().get(&id).await.unwrap().admission, 2);
    }

    #[tokio::test]
    async fn failing_worker_is_invalidated_and_run_completes() {
        let ctl = controller();
        add_worker(&ctl, "bad", 2, FakeWorker { fail: AtomicBool::new(true), ..Default::default() }).await;
        add_worker(&ctl, "good", 2, quick()).await;

        let dispatcher = TaskDispatcher::new(ctl.clone(), config());
        let result = dispatcher.spawn(25, SolveParams::default()).await.unwrap();
        assert_eq!(result.len(), 25);
        assert_eq!(unique_seeds(&result.outcomes).len(), 25);
        assert_eq!(ctl.table().state_of(&WorkerId::from("bad")).await, WorkerState::Invalid);
        assert_eq!(result.per_worker.get(&WorkerId::from("good")), Some(&25));
    }

    #[tokio::test]
    async fn waits_for_a_worker_to_become_ready() {
        let ctl = controller();
        let dispatcher = Arc::new(TaskDispatcher::new(ctl.clone(), config()));
        let run = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.spawn(8, SolveParams::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(dispatcher.progress(), (0, 8));

        add_worker(&ctl, "late", 2, quick()).await;
        let result = run.await.unwrap().unwrap();
        assert_eq!(result.len(), 8);
    }

    #[tokio::test]
    async fn no_workers_fails_after_ready_timeout() {
        let dispatcher = TaskDispatcher::new(
            controller(),
            DispatcherConfig { ready_timeout: Duration::from_millis(30), ..config() },
        );
        let err = dispatcher.spawn(4, SolveParams::default()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoWorkers { .. }));
    }

    #[tokio::test]
    async fn run_deadline_is_enforced() {
        let ctl = controller();
        add_worker(&ctl, "stuck", 1, FakeWorker { stall: AtomicBool::new(true), ..Default::default() }).await;
        let dispatcher = TaskDispatcher::new(
            ctl,
            DispatcherConfig { run_deadline: Some(Duration::from_millis(50)), ..config() },
        );
        let err = dispatcher.spawn(4, SolveParams::default()).await.unwrap_err();
        assert_eq!(err, SchedulerError::DeadlineExceeded { completed: 0, requested: 4 });
    }

    #[tokio::test]
    async fn abort_stops_the_run() {
        let ctl = controller();
        add_worker(&ctl, "stuck", 1, FakeWorker { stall: AtomicBool::new(true), ..Default::default() }).await;
        let dispatcher = Arc::new(TaskDispatcher::new(ctl, config()));
        let run = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.spawn(4, SolveParams::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        dispatcher.abort();
        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, SchedulerError::Aborted { completed: 0, requested: 4 }));
    }

    #[tokio::test]
    async fn finalizing_worker_drains_without_new_work() {
        let ctl = controller();
        let slow = add_worker(&ctl, "slow", 1, FakeWorker { delay: Duration::from_millis(40), ..Default::default() }).await;
        add_worker(&ctl, "fast", 1, quick()).await;

        let dispatcher = Arc::new(TaskDispatcher::new(ctl.clone(), config()));
        let run = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.spawn(40, SolveParams::default()).await })
        };
        while slow.in_flight.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        ctl.retire(&WorkerId::from("slow")).await.unwrap();
        // Let any pass that read the table before the retire settle.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let dispatched_to_slow = slow.seeds.lock().unwrap().len();

        let result = run.await.unwrap().unwrap();
        assert_eq!(result.len(), 40);
        assert_eq!(slow.seeds.lock().unwrap().len(), dispatched_to_slow);
        assert_eq!(ctl.table().state_of(&WorkerId::from("slow")).await, WorkerState::Disconnecting);
    }
}
