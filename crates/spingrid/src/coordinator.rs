//! Coordinator: owns every scheduling subsystem of one run.
//!
//! # Architecture
//!
//! ```text
//! Coordinator
//!   ├── MembershipTable + NameDirectory   (shared, behind the controller)
//!   ├── MembershipController              (lifecycle, grow/retire)
//!   ├── TaskDispatcher                    (run → ResultSet)
//!   ├── TelemetryMonitor task             (admission + load reports)
//!   └── AnnounceListener task             (remote workers dial in here)
//! ```
//!
//! Background tasks stop when `shutdown` flips the shared watch channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use spin_anneal::{SaSolver, Solver};
use spin_core::{
    CoordinatorSettings, CoreResult, LauncherSettings, MembershipSettings, ProblemDefinition,
    SchedulerSettings, SolveParams, SpinConfig, TelemetrySettings, WorkerId,
};
use spingrid_membership::{
    LaunchPlan, MembershipController, MembershipTable, NameDirectory, PlacementHint, ProcessLauncher,
    WorkerEndpoint,
};
use spingrid_scheduler::{ResultSet, SchedulerResult, TaskDispatcher};
use spingrid_telemetry::TelemetryMonitor;
use spingrid_transport::{AnnounceListener, LocalEndpoint};

/// All resolved configuration sections.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub scheduler: SchedulerSettings,
    pub membership: MembershipSettings,
    pub telemetry: TelemetrySettings,
    pub launcher: LauncherSettings,
    pub coordinator: CoordinatorSettings,
}

impl Settings {
    pub fn from_config(config: &SpinConfig) -> CoreResult<Self> {
        Ok(Self {
            scheduler: config.resolved_scheduler()?,
            membership: config.resolved_membership()?,
            telemetry: config.resolved_telemetry()?,
            launcher: config.resolved_launcher()?,
            coordinator: config.resolved_coordinator(),
        })
    }
}

pub struct CoordinatorBuilder {
    problem: Arc<ProblemDefinition>,
    settings: Settings,
    solver: Arc<dyn Solver>,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    listen: bool,
}

impl CoordinatorBuilder {
    /// Kernel used by in-process workers.
    pub fn with_solver(mut self, solver: Arc<dyn Solver>) -> Self {
        self.solver = solver;
        self
    }

    /// Enable `grow` through this launcher.
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Skip the announce listener; only in-process workers can join.
    pub fn without_listener(mut self) -> Self {
        self.listen = false;
        self
    }

    pub async fn start(self) -> anyhow::Result<Coordinator> {
        let Self {
            problem,
            settings,
            solver,
            launcher,
            listen,
        } = self;

        let table = Arc::new(MembershipTable::new());
        let directory = Arc::new(NameDirectory::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let mut controller = MembershipController::new(table, directory, problem)
            .with_settings(settings.membership.clone());

        // ── Announce listener ──────────────────────────────────────

        let mut listen_addr = None;
        if listen {
            let listener = AnnounceListener::bind(&settings.coordinator.listen, controller.clone())
                .await
                .with_context(|| format!("binding announce listener on {}", settings.coordinator.listen))?;
            let addr = listener.local_addr()?;
            listen_addr = Some(addr);
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move { listener.run(rx).await }));
        }
        let dial = dial_address(&settings.coordinator, listen_addr);

        if let Some(launcher) = launcher {
            let plan = LaunchPlan::from_settings(&settings.launcher, dial.clone())
                .context("resolving worker launch command")?;
            controller = controller.with_launcher(launcher, plan);
        }

        // ── Dispatcher and telemetry ───────────────────────────────

        let dispatcher = Arc::new(TaskDispatcher::new(controller.clone(), settings.scheduler.clone()));
        let telemetry = Arc::new(TelemetryMonitor::new(controller.clone(), settings.telemetry.clone()));
        let monitor = telemetry.clone();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { monitor.run(rx).await }));

        info!(
            spins = controller.problem().size(),
            couplings = controller.problem().coupling_count(),
            listen = ?listen_addr,
            %dial,
            "coordinator started"
        );

        Ok(Coordinator {
            controller,
            dispatcher,
            telemetry,
            solver,
            listen_addr,
            dial,
            shutdown_tx,
            tasks: Mutex::new(tasks),
            local_workers: AtomicUsize::new(0),
        })
    }
}

/// One coordinator per run. Shared between the run, the console and
/// status queries through `Arc`.
pub struct Coordinator {
    controller: MembershipController,
    dispatcher: Arc<TaskDispatcher>,
    telemetry: Arc<TelemetryMonitor>,
    solver: Arc<dyn Solver>,
    listen_addr: Option<SocketAddr>,
    dial: String,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    local_workers: AtomicUsize,
}

impl Coordinator {
    pub fn builder(problem: Arc<ProblemDefinition>, settings: Settings) -> CoordinatorBuilder {
        CoordinatorBuilder {
            problem,
            settings,
            solver: Arc::new(SaSolver),
            launcher: None,
            listen: true,
        }
    }

    pub fn controller(&self) -> &MembershipController {
        &self.controller
    }

    pub fn dispatcher(&self) -> &Arc<TaskDispatcher> {
        &self.dispatcher
    }

    pub fn telemetry(&self) -> &Arc<TelemetryMonitor> {
        &self.telemetry
    }

    /// Bound address of the announce listener, if one runs.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    /// Address launched workers are told to dial.
    pub fn dial_address(&self) -> &str {
        &self.dial
    }

    /// Fires once `shutdown` starts.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Register an endpoint and announce it. Admission happens on the next
    /// telemetry tick.
    pub async fn attach(&self, endpoint: Arc<dyn WorkerEndpoint>) -> bool {
        let id = endpoint.worker_id().clone();
        if let Some(previous) = self.controller.directory().register(&id, endpoint).await {
            debug!(worker_id = %previous.worker_id(), "endpoint replaced");
        }
        self.controller.announce(&id).await
    }

    /// Start a worker on this process's own threads.
    pub async fn add_local_worker(&self, threads: usize) -> WorkerId {
        let n = self.local_workers.fetch_add(1, Ordering::Relaxed);
        let id = WorkerId::new(format!("local-{}-{n}", std::process::id()));
        let endpoint = LocalEndpoint::new(id.clone(), self.solver.clone(), threads.max(1));
        self.attach(Arc::new(endpoint)).await;
        info!(worker_id = %id, threads, "local worker attached");
        id
    }

    pub fn grow(&self, count: usize, hint: PlacementHint) {
        self.controller.grow(count, hint);
    }

    pub async fn retire(&self, id: &WorkerId) -> anyhow::Result<()> {
        self.controller
            .retire(id)
            .await
            .with_context(|| format!("retiring worker {id}"))
    }

    /// Run `total` repetitions across the current workers.
    pub async fn run(&self, total: usize, params: SolveParams) -> SchedulerResult<ResultSet> {
        self.dispatcher.spawn(total, params).await
    }

    /// Operator status: membership counts, run progress, latest load report.
    pub async fn query(&self) -> String {
        let status = self.controller.status().await;
        let (completed, requested) = self.dispatcher.progress();
        let report = self.telemetry.latest();
        format!("{status}\nprogress: {completed}/{requested} repetitions\n{report}")
    }

    /// Retire every ready worker, then stop the background tasks.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        let mut retiring = JoinSet::new();
        for record in self.controller.table().ready_workers().await {
            let controller = self.controller.clone();
            retiring.spawn(async move {
                if let Err(e) = controller.retire(&record.id).await {
                    warn!(worker_id = %record.id, error = %e, "retire on shutdown failed");
                }
            });
        }
        while retiring.join_next().await.is_some() {}

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("coordinator stopped");
    }
}

/// The address workers dial: `advertise` when it was set apart from
/// `listen`, otherwise the bound address with an unspecified IP replaced
/// by this host's name.
fn dial_address(settings: &CoordinatorSettings, bound: Option<SocketAddr>) -> String {
    let Some(addr) = bound else {
        return settings.advertise.clone();
    };
    if settings.advertise != settings.listen {
        return settings.advertise.clone();
    }
    if addr.ip().is_unspecified() {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        format!("{host}:{}", addr.port())
    } else {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use spingrid_membership::WorkerState;

    fn problem() -> Arc<ProblemDefinition> {
        Arc::new(ProblemDefinition::from_lattice_str("0 1 -1.0\n1 2 -1.0\n2 3 -1.0\n3 0 -1.0\n").unwrap())
    }

    fn fast_settings() -> Settings {
        let mut settings = Settings::default();
        settings.telemetry.interval = Duration::from_millis(20);
        settings.scheduler.poll_interval = Duration::from_millis(5);
        settings.scheduler.ready_timeout = Duration::from_secs(5);
        settings.coordinator.listen = "127.0.0.1:0".to_string();
        settings.coordinator.advertise = settings.coordinator.listen.clone();
        settings
    }

    #[test]
    fn dial_address_prefers_explicit_advertise() {
        let settings = CoordinatorSettings {
            listen: "0.0.0.0:7878".into(),
            advertise: "head:7878".into(),
        };
        let bound: SocketAddr = "0.0.0.0:7878".parse().unwrap();
        assert_eq!(dial_address(&settings, Some(bound)), "head:7878");
    }

    #[test]
    fn dial_address_uses_bound_port() {
        let settings = CoordinatorSettings {
            listen: "127.0.0.1:0".into(),
            advertise: "127.0.0.1:0".into(),
        };
        let bound: SocketAddr = "127.0.0.1:41234".parse().unwrap();
        assert_eq!(dial_address(&settings, Some(bound)), "127.0.0.1:41234");
    }

    #[test]
    fn dial_address_replaces_unspecified_ip() {
        let settings = CoordinatorSettings::default();
        let bound: SocketAddr = "0.0.0.0:7878".parse().unwrap();
        let dial = dial_address(&settings, Some(bound));
        assert!(dial.ends_with(":7878"));
        assert!(!dial.starts_with("0.0.0.0"));
    }

    #[test]
    fn settings_from_empty_config_are_defaults() {
        let settings = Settings::from_config(&SpinConfig::default()).unwrap();
        assert_eq!(settings.scheduler, SchedulerSettings::default());
        assert_eq!(settings.coordinator, CoordinatorSettings::default());
    }

    #[tokio::test]
    async fn local_worker_becomes_ready_and_runs() {
        let coordinator = Coordinator::builder(problem(), fast_settings())
            .without_listener()
            .start()
            .await
            .unwrap();
        assert!(coordinator.listen_addr().is_none());

        let id = coordinator.add_local_worker(2).await;
        let results = coordinator.run(12, SolveParams { sweeps: 20, ..Default::default() }).await.unwrap();
        assert_eq!(results.len(), 12);
        assert_eq!(coordinator.controller().table().state_of(&id).await, WorkerState::Ready);

        coordinator.shutdown().await;
        assert_eq!(coordinator.controller().table().state_of(&id).await, WorkerState::Disconnecting);
    }

    struct Constant;

    impl Solver for Constant {
        fn name(&self) -> &'static str {
            "constant"
        }

        fn run(&self, problem: &ProblemDefinition, seed: u64, _params: &SolveParams) -> spin_core::SolveOutcome {
            spin_core::SolveOutcome {
                seed,
                energy: -1.0,
                spins: vec![0; problem.size()],
            }
        }
    }

    #[tokio::test]
    async fn local_workers_use_the_configured_solver() {
        let coordinator = Coordinator::builder(problem(), fast_settings())
            .with_solver(Arc::new(Constant))
            .without_listener()
            .start()
            .await
            .unwrap();
        coordinator.add_local_worker(1).await;
        let results = coordinator.run(5, SolveParams::default()).await.unwrap();
        assert!(results.outcomes.iter().all(|o| o.energy == -1.0 && o.spins == [0, 0, 0, 0]));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn query_reports_membership_and_progress() {
        let coordinator = Coordinator::builder(problem(), fast_settings()).start().await.unwrap();
        assert!(coordinator.listen_addr().is_some());
        coordinator.add_local_worker(1).await;

        let text = coordinator.query().await;
        assert!(text.contains("workers:"), "{text}");
        assert!(text.contains("progress: 0/0"), "{text}");
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn grow_without_launcher_counts_failures() {
        let coordinator = Coordinator::builder(problem(), fast_settings())
            .without_listener()
            .start()
            .await
            .unwrap();
        coordinator.grow(3, PlacementHint::Local);
        let status = coordinator.controller().status().await;
        assert_eq!(status.launches_requested, 3);
        assert_eq!(status.launch_failures, 3);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let coordinator = Coordinator::builder(problem(), fast_settings()).start().await.unwrap();
        let mut signal = coordinator.shutdown_signal();
        coordinator.shutdown().await;
        coordinator.shutdown().await;
        assert!(*signal.borrow_and_update());
    }
}
