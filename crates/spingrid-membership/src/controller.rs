//! Membership controller: the single writer of the membership table.
//!
//! Drives each worker through its lifecycle:
//!
//! ```text
//! announce ──► CONNECTING ──admit──► INITIALIZING ──init ack──► READY
//!                                                                 │
//!                    retire: FINALIZING ──► DISCONNECTING ◄───────┘
//! any failure ──► INVALID (re-enters only through a fresh announce)
//! ```
//!
//! Admission pushes the problem definition to the worker and resolves its
//! handles strictly before the record flips to `READY`. Only the caller
//! that wins the `CONNECTING → INITIALIZING` swap performs it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use spin_core::{MembershipSettings, ProblemDefinition, WorkerId};

use crate::directory::NameDirectory;
use crate::endpoint::{LoadSample, TelemetryHandle};
use crate::error::{MembershipError, MembershipResult};
use crate::launcher::{LaunchPlan, PlacementHint, ProcessLauncher};
use crate::record::WorkerState;
use crate::table::MembershipTable;

const DRAIN_POLL: Duration = Duration::from_millis(100);
const MIN_SHUTDOWN_WAIT: Duration = Duration::from_millis(100);

#[derive(Default)]
struct LaunchCounters {
    requested: AtomicU64,
    failed: AtomicU64,
}

/// Counts of workers per state plus launch bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MembershipStatus {
    pub connecting: usize,
    pub initializing: usize,
    pub ready: usize,
    pub finalizing: usize,
    pub disconnecting: usize,
    pub invalid: usize,
    /// Sum of thread counts over ready workers.
    pub ready_threads: usize,
    pub launches_requested: u64,
    pub launch_failures: u64,
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "workers: {} ready ({} threads), {} connecting, {} initializing, {} finalizing, \
             {} disconnecting, {} invalid; launches: {} requested, {} failed",
            self.ready,
            self.ready_threads,
            self.connecting,
            self.initializing,
            self.finalizing,
            self.disconnecting,
            self.invalid,
            self.launches_requested,
            self.launch_failures,
        )
    }
}

/// Owns every lifecycle transition. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MembershipController {
    table: Arc<MembershipTable>,
    directory: Arc<NameDirectory>,
    problem: Arc<ProblemDefinition>,
    launcher: Option<(Arc<dyn ProcessLauncher>, LaunchPlan)>,
    settings: MembershipSettings,
    counters: Arc<LaunchCounters>,
}

impl MembershipController {
    pub fn new(table: Arc<MembershipTable>, directory: Arc<NameDirectory>, problem: Arc<ProblemDefinition>) -> Self {
        Self {
            table,
            directory,
            problem,
            launcher: None,
            settings: MembershipSettings::default(),
            counters: Arc::new(LaunchCounters::default()),
        }
    }

    pub fn with_settings(mut self, settings: MembershipSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Enable `grow` with the given launcher and command lines.
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>, plan: LaunchPlan) -> Self {
        self.launcher = Some((launcher, plan));
        self
    }

    /// Read access for the dispatcher and telemetry.
    pub fn table(&self) -> &Arc<MembershipTable> {
        &self.table
    }

    pub fn directory(&self) -> &Arc<NameDirectory> {
        &self.directory
    }

    pub fn problem(&self) -> &Arc<ProblemDefinition> {
        &self.problem
    }

    /// Record first contact from a worker. Does not initialize it.
    ///
    /// Returns true when the worker moved to `CONNECTING`; false when it was
    /// already connecting, initializing, ready or finalizing.
    pub async fn announce(&self, id: &WorkerId) -> bool {
        let moved = self.table.announce(id).await;
        if moved {
            info!(worker_id = %id, "worker announced");
        } else {
            let state = self.table.state_of(id).await;
            debug!(worker_id = %id, %state, "duplicate announce ignored");
        }
        moved
    }

    /// Admit a `CONNECTING` worker.
    ///
    /// Returns `Ok(false)` if another caller owns the admission or the worker
    /// is not connecting. Any failure leaves the worker `INVALID`.
    pub async fn admit(&self, id: &WorkerId) -> MembershipResult<bool> {
        if !self
            .table
            .compare_and_transition(id, WorkerState::Connecting, WorkerState::Initializing)
            .await
        {
            return Ok(false);
        }

        let Some(endpoint) = self.directory.resolve(id).await else {
            self.invalidate(id, "no endpoint registered").await;
            return Err(MembershipError::NotRegistered(id.clone()));
        };

        let started = Instant::now();
        let init = tokio::time::timeout(self.settings.admission_timeout, endpoint.initialize(self.problem.clone()));
        match init.await {
            Ok(Ok(handles)) => {
                let threads = handles.thread_count;
                if let Err(e) = self.table.mark_ready(id, handles).await {
                    warn!(worker_id = %id, error = %e, "worker changed state during admission");
                    return Err(e);
                }
                info!(
                    worker_id = %id,
                    threads,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "worker ready"
                );
                Ok(true)
            }
            Ok(Err(source)) => {
                self.invalidate(id, &source.to_string()).await;
                Err(MembershipError::Admission { id: id.clone(), source })
            }
            Err(_) => {
                self.invalidate(id, "admission timed out").await;
                Err(MembershipError::AdmissionTimeout(id.clone()))
            }
        }
    }

    /// Mark a worker `INVALID`. Returns true if its state changed.
    pub async fn invalidate(&self, id: &WorkerId, reason: &str) -> bool {
        match self.table.transition(id, WorkerState::Invalid).await {
            Ok(WorkerState::Invalid) => false,
            Ok(prev) => {
                warn!(worker_id = %id, from = %prev, %reason, "worker invalidated");
                true
            }
            Err(_) => false,
        }
    }

    /// Elastic remove of a `READY` worker.
    ///
    /// Stops new work immediately, waits for the worker's in-flight
    /// repetitions up to `shutdown_timeout`, asks it to stop, and
    /// unregisters its endpoint.
    pub async fn retire(&self, id: &WorkerId) -> MembershipResult<()> {
        let record = self
            .table
            .get(id)
            .await
            .ok_or_else(|| MembershipError::UnknownWorker(id.clone()))?;
        if !self
            .table
            .compare_and_transition(id, WorkerState::Ready, WorkerState::Finalizing)
            .await
        {
            return Err(MembershipError::IllegalTransition {
                id: id.clone(),
                from: self.table.state_of(id).await,
                to: WorkerState::Finalizing,
            });
        }
        info!(worker_id = %id, "retiring worker");

        let deadline = Instant::now() + self.settings.shutdown_timeout;
        if let Some(telemetry) = record.telemetry {
            wait_drained(id, telemetry.as_ref(), deadline).await;
        }

        if let Some(endpoint) = self.directory.resolve(id).await {
            let wait = deadline.saturating_duration_since(Instant::now()).max(MIN_SHUTDOWN_WAIT);
            match tokio::time::timeout(wait, endpoint.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(worker_id = %id, error = %e, "worker shutdown failed"),
                Err(_) => warn!(worker_id = %id, "worker shutdown timed out"),
            }
        }

        self.table
            .compare_and_transition(id, WorkerState::Finalizing, WorkerState::Disconnecting)
            .await;
        self.directory.unregister(id).await;
        info!(worker_id = %id, "worker disconnected");
        Ok(())
    }

    /// Store the latest load sample of a ready worker; `None` means no data.
    pub async fn record_load(&self, id: &WorkerId, sample: Option<LoadSample>) -> bool {
        self.table.record_load(id, sample).await
    }

    pub async fn status(&self) -> MembershipStatus {
        let mut status = MembershipStatus {
            launches_requested: self.counters.requested.load(Ordering::Relaxed),
            launch_failures: self.counters.failed.load(Ordering::Relaxed),
            ..Default::default()
        };
        for record in self.table.snapshot().await {
            match record.state {
                WorkerState::Connecting => status.connecting += 1,
                WorkerState::Initializing => status.initializing += 1,
                WorkerState::Ready => {
                    status.ready += 1;
                    status.ready_threads += record.thread_count;
                }
                WorkerState::Finalizing => status.finalizing += 1,
                WorkerState::Disconnecting => status.disconnecting += 1,
                WorkerState::Invalid => status.invalid += 1,
            }
        }
        status
    }

    /// Ask the launcher for `count` more workers. Returns immediately;
    /// new workers show up later through `announce`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn grow(&self, count: usize, hint: PlacementHint) {
        if count == 0 {
            return;
        }
        self.counters.requested.fetch_add(count as u64, Ordering::Relaxed);
        let Some((launcher, plan)) = self.launcher.clone() else {
            self.counters.failed.fetch_add(count as u64, Ordering::Relaxed);
            warn!(count, "cannot grow: no process launcher configured");
            return;
        };

        info!(count, ?hint, "requesting workers");
        let counters = self.counters.clone();
        tokio::spawn(async move {
            let failed = launch(launcher.as_ref(), &plan, count, &hint).await;
            if failed > 0 {
                counters.failed.fetch_add(failed as u64, Ordering::Relaxed);
            }
        });
    }
}

/// Poll the worker's load until nothing is in flight or the deadline passes.
async fn wait_drained(id: &WorkerId, telemetry: &dyn TelemetryHandle, deadline: Instant) {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!(worker_id = %id, "drain deadline reached");
            return;
        }
        match tokio::time::timeout(remaining, telemetry.load_sample()).await {
            Ok(Ok(sample)) if sample.in_flight == 0 => return,
            Ok(Ok(sample)) => debug!(worker_id = %id, in_flight = sample.in_flight, "draining"),
            Ok(Err(_)) | Err(_) => return,
        }
        tokio::time::sleep(DRAIN_POLL.min(remaining)).await;
    }
}

/// Run one grow request. Returns how many workers failed to start.
async fn launch(launcher: &dyn ProcessLauncher, plan: &LaunchPlan, count: usize, hint: &PlacementHint) -> usize {
    let argv = match hint {
        PlacementHint::Local => plan.worker_argv(),
        PlacementHint::Host(host) => plan.host_argv(host),
        PlacementHint::Cluster => {
            let captured = match plan.cluster_argv(count) {
                Ok(argv) => launcher.capture(&argv, plan.capture_timeout()).await,
                Err(e) => Err(e),
            };
            return match captured {
                Ok(lines) => {
                    for line in lines {
                        info!(%line, "cluster launcher");
                    }
                    0
                }
                Err(e) => {
                    warn!(count, error = %e, "cluster launch failed");
                    count
                }
            };
        }
    };

    let mut failed = 0;
    for _ in 0..count {
        if let Err(e) = launcher.detach(&argv).await {
            warn!(error = %e, "worker launch failed");
            failed += 1;
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use spin_core::Coupling;

    use crate::endpoint::{WorkerEndpoint, WorkerHandles};
    use crate::error::{EndpointError, LaunchError, LaunchResult};
    use crate::table::tests::handles;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Ok,
        Fail,
        Hang,
    }

    struct TestEndpoint {
        id: WorkerId,
        behaviour: Behaviour,
        inits: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    impl TestEndpoint {
        fn new(id: &str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                id: WorkerId::from(id),
                behaviour,
                inits: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl WorkerEndpoint for TestEndpoint {
        fn worker_id(&self) -> &WorkerId {
            &self.id
        }

        async fn initialize(&self, problem: Arc<ProblemDefinition>) -> Result<WorkerHandles, EndpointError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            assert_eq!(problem.size(), 2);
            match self.behaviour {
                Behaviour::Ok => Ok(handles(4)),
                Behaviour::Fail => Err(EndpointError::Remote("bad problem".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }

        async fn shutdown(&self) -> Result<(), EndpointError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingLauncher {
        detached: Mutex<Vec<Vec<String>>>,
        captured: Mutex<Vec<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl ProcessLauncher for RecordingLauncher {
        async fn capture(&self, argv: &[String], _timeout: Duration) -> LaunchResult<Vec<String>> {
            self.captured.lock().unwrap().push(argv.to_vec());
            Ok(vec!["Submitted batch job 17".to_string()])
        }

        async fn detach(&self, argv: &[String]) -> LaunchResult<()> {
            if self.fail {
                return Err(LaunchError::EmptyCommand);
            }
            self.detached.lock().unwrap().push(argv.to_vec());
            Ok(())
        }
    }

    fn problem() -> Arc<ProblemDefinition> {
        let c = Coupling { sites: vec![0, 1], value: -1.0 };
        Arc::new(ProblemDefinition::from_couplings(2, vec![c]).unwrap())
    }

    fn controller() -> MembershipController {
        MembershipController::new(
            Arc::new(MembershipTable::new()),
            Arc::new(NameDirectory::new()),
            problem(),
        )
        .with_settings(MembershipSettings {
            admission_timeout: Duration::from_millis(200),
            shutdown_timeout: Duration::from_millis(200),
        })
    }

    async fn join(ctl: &MembershipController, ep: &Arc<TestEndpoint>) {
        ctl.directory().register(&ep.id, ep.clone()).await;
        assert!(ctl.announce(&ep.id).await);
    }

    #[tokio::test]
    async fn admission_reaches_ready_with_handles() {
        let ctl = controller();
        let ep = TestEndpoint::new("w1", Behaviour::Ok);
        join(&ctl, &ep).await;
        assert_eq!(ctl.table().state_of(&ep.id).await, WorkerState::Connecting);

        assert!(ctl.admit(&ep.id).await.unwrap());
        let record = ctl.table().get(&ep.id).await.unwrap();
        assert_eq!(record.state, WorkerState::Ready);
        assert_eq!(record.thread_count, 4);
        assert!(record.dispatch.is_some());
    }

    #[tokio::test]
    async fn duplicate_announce_on_ready_worker_is_noop() {
        let ctl = controller();
        let ep = TestEndpoint::new("w1", Behaviour::Ok);
        join(&ctl, &ep).await;
        ctl.admit(&ep.id).await.unwrap();

        assert!(!ctl.announce(&ep.id).await);
        assert!(!ctl.admit(&ep.id).await.unwrap());
        assert_eq!(ep.inits.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.table().state_of(&ep.id).await, WorkerState::Ready);
    }

    #[tokio::test]
    async fn lifecycle_calls_run_on_spawned_tasks() {
        let ctl = controller();
        let ep = TestEndpoint::new("w1", Behaviour::Ok);
        ctl.directory().register(&ep.id, ep.clone()).await;

        let spawn_announce = |ctl: MembershipController, id: WorkerId| tokio::spawn(async move { ctl.announce(&id).await });
        assert!(spawn_announce(ctl.clone(), ep.id.clone()).await.unwrap());
        // The duplicate path logs the current state.
        assert!(!spawn_announce(ctl.clone(), ep.id.clone()).await.unwrap());

        let admitted = {
            let ctl = ctl.clone();
            let id = ep.id.clone();
            tokio::spawn(async move { ctl.admit(&id).await })
        };
        assert!(admitted.await.unwrap().unwrap());
        let retired = {
            let ctl = ctl.clone();
            let id = ep.id.clone();
            tokio::spawn(async move { ctl.retire(&id).await })
        };
        retired.await.unwrap().unwrap();
        assert_eq!(ctl.table().state_of(&ep.id).await, WorkerState::Disconnecting);
    }

    #[tokio::test]
    async fn concurrent_admit_initializes_once() {
        let ctl = controller();
        let ep = TestEndpoint::new("w1", Behaviour::Ok);
        join(&ctl, &ep).await;

        let (a, b) = tokio::join!(ctl.admit(&ep.id), ctl.admit(&ep.id));
        assert_ne!(a.unwrap(), b.unwrap());
        assert_eq!(ep.inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_admission_invalidates_and_reannounce_retries() {
        let ctl = controller();
        let ep = TestEndpoint::new("w1", Behaviour::Fail);
        join(&ctl, &ep).await;

        let err = ctl.admit(&ep.id).await.unwrap_err();
        assert!(matches!(err, MembershipError::Admission { .. }));
        assert_eq!(ctl.table().state_of(&ep.id).await, WorkerState::Invalid);

        assert!(ctl.announce(&ep.id).await);
        assert_eq!(ctl.table().state_of(&ep.id).await, WorkerState::Connecting);
    }

    #[tokio::test]
    async fn admission_times_out() {
        let ctl = controller();
        let ep = TestEndpoint::new("w1", Behaviour::Hang);
        join(&ctl, &ep).await;

        let err = ctl.admit(&ep.id).await.unwrap_err();
        assert!(matches!(err, MembershipError::AdmissionTimeout(_)));
        assert_eq!(ctl.table().state_of(&ep.id).await, WorkerState::Invalid);
    }

    #[tokio::test]
    async fn admit_without_endpoint_is_not_registered() {
        let ctl = controller();
        let id = WorkerId::from("orphan");
        ctl.announce(&id).await;
        assert!(matches!(ctl.admit(&id).await, Err(MembershipError::NotRegistered(_))));
        assert_eq!(ctl.table().state_of(&id).await, WorkerState::Invalid);
    }

    #[tokio::test]
    async fn retire_walks_to_disconnecting() {
        let ctl = controller();
        let ep = TestEndpoint::new("w1", Behaviour::Ok);
        join(&ctl, &ep).await;
        ctl.admit(&ep.id).await.unwrap();

        ctl.retire(&ep.id).await.unwrap();
        assert_eq!(ctl.table().state_of(&ep.id).await, WorkerState::Disconnecting);
        assert_eq!(ep.shutdowns.load(Ordering::SeqCst), 1);
        assert!(ctl.directory().resolve(&ep.id).await.is_none());

        // Retiring again is illegal; a fresh announce is allowed.
        assert!(ctl.retire(&ep.id).await.is_err());
        assert!(ctl.announce(&ep.id).await);
    }

    #[tokio::test]
    async fn invalidate_reports_change_once() {
        let ctl = controller();
        let ep = TestEndpoint::new("w1", Behaviour::Ok);
        join(&ctl, &ep).await;
        assert!(ctl.invalidate(&ep.id, "test").await);
        assert!(!ctl.invalidate(&ep.id, "test").await);
        assert!(!ctl.invalidate(&WorkerId::from("ghost"), "test").await);
    }

    #[tokio::test]
    async fn status_counts_states() {
        let ctl = controller();
        let ok = TestEndpoint::new("a", Behaviour::Ok);
        let bad = TestEndpoint::new("b", Behaviour::Fail);
        join(&ctl, &ok).await;
        join(&ctl, &bad).await;
        ctl.announce(&WorkerId::from("c")).await;
        ctl.admit(&ok.id).await.unwrap();
        let _ = ctl.admit(&bad.id).await;

        let status = ctl.status().await;
        assert_eq!(status.ready, 1);
        assert_eq!(status.ready_threads, 4);
        assert_eq!(status.invalid, 1);
        assert_eq!(status.connecting, 1);
        assert!(status.to_string().starts_with("workers: 1 ready (4 threads)"));
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn grow_detaches_one_process_per_worker() {
        let launcher = Arc::new(RecordingLauncher::default());
        let ctl = controller().with_launcher(launcher.clone(), LaunchPlan::new("/bin/spingrid", "head:7878"));

        ctl.grow(2, PlacementHint::Host("node3".into()));
        wait_for(|| launcher.detached.lock().unwrap().len() == 2).await;
        let detached = launcher.detached.lock().unwrap();
        assert_eq!(detached[0][..2], ["ssh".to_string(), "node3".to_string()]);
        assert_eq!(ctl.counters.requested.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn grow_cluster_runs_template_once() {
        let launcher = Arc::new(RecordingLauncher::default());
        let plan = LaunchPlan::new("/bin/spingrid", "head:7878")
            .with_cluster_command(vec!["sbatch".into(), "-N{count}".into(), "{worker}".into()]);
        let ctl = controller().with_launcher(launcher.clone(), plan);

        ctl.grow(3, PlacementHint::Cluster);
        wait_for(|| launcher.captured.lock().unwrap().len() == 1).await;
        assert_eq!(launcher.captured.lock().unwrap()[0][1], "-N3");
    }

    #[tokio::test]
    async fn grow_failures_are_counted() {
        let launcher = Arc::new(RecordingLauncher { fail: true, ..Default::default() });
        let ctl = controller().with_launcher(launcher, LaunchPlan::new("/bin/spingrid", "head:7878"));
        ctl.grow(3, PlacementHint::Local);
        let counters = ctl.counters.clone();
        wait_for(|| counters.failed.load(Ordering::Relaxed) == 3).await;
        assert_eq!(ctl.status().await.launch_failures, 3);
    }

    #[tokio::test]
    async fn grow_without_launcher_fails_fast() {
        let ctl = controller();
        ctl.grow(2, PlacementHint::Local);
        let status = ctl.status().await;
        assert_eq!(status.launches_requested, 2);
        assert_eq!(status.launch_failures, 2);
    }
}
