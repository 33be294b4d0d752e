//! Telemetry monitor: periodic admission and load sampling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use spin_core::{TelemetrySettings, WorkerId};
use spingrid_membership::{MembershipController, WorkerRecord, WorkerState};

use crate::report::{LoadReport, WorkerLoad};

/// Background loop sampling worker load and admitting announced workers.
pub struct TelemetryMonitor {
    controller: MembershipController,
    settings: TelemetrySettings,
    epoch: AtomicU64,
    reports: watch::Sender<LoadReport>,
    /// Admissions started by a tick and not yet finished, one per worker.
    admissions: Mutex<HashMap<WorkerId, JoinHandle<()>>>,
}

impl TelemetryMonitor {
    pub fn new(controller: MembershipController, settings: TelemetrySettings) -> Self {
        let (reports, _) = watch::channel(LoadReport::default());
        Self {
            controller,
            settings,
            epoch: AtomicU64::new(0),
            reports,
            admissions: Mutex::new(HashMap::new()),
        }
    }

    /// Receiver of every published report.
    pub fn subscribe(&self) -> watch::Receiver<LoadReport> {
        self.reports.subscribe()
    }

    /// The most recent report.
    pub fn latest(&self) -> LoadReport {
        self.reports.borrow().clone()
    }

    /// Admissions still running.
    pub fn admissions_in_flight(&self) -> usize {
        let mut admissions = self.admissions.lock().unwrap_or_else(PoisonError::into_inner);
        admissions.retain(|_, task| !task.is_finished());
        admissions.len()
    }

    /// Run ticks every `interval` until shutdown is signalled. Admissions
    /// still running at shutdown are cancelled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.settings.interval.as_millis() as u64, "telemetry monitor started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }
        info!("telemetry monitor shutting down");
        self.cancel_admissions().await;
    }

    /// One iteration: start admissions, sample ready workers, publish.
    pub async fn tick(&self) -> LoadReport {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = self.controller.table().snapshot().await;

        let admitting = self.start_admissions(&snapshot);

        let mut samples = JoinSet::new();
        for record in snapshot.iter().filter(|r| r.is_ready()) {
            let Some(telemetry) = record.telemetry.clone() else {
                continue;
            };
            let id = record.id.clone();
            let threads = record.thread_count;
            let timeout = self.settings.sample_timeout;
            samples.spawn(async move {
                let sample = match tokio::time::timeout(timeout, telemetry.load_sample()).await {
                    Ok(Ok(sample)) => Some(sample),
                    Ok(Err(e)) => {
                        debug!(worker_id = %id, error = %e, "load sample failed");
                        None
                    }
                    Err(_) => {
                        debug!(worker_id = %id, "load sample timed out");
                        None
                    }
                };
                WorkerLoad { id, threads, sample }
            });
        }

        let mut workers = Vec::new();
        while let Some(joined) = samples.join_next().await {
            match joined {
                Ok(load) => {
                    self.controller.record_load(&load.id, load.sample).await;
                    workers.push(load);
                }
                Err(e) => warn!(error = %e, "load sample task failed"),
            }
        }
        workers.sort_by(|a, b| a.id.cmp(&b.id));

        let report = LoadReport {
            epoch,
            workers,
            admitting,
        };
        if report.ready_count() > 0 || !report.admitting.is_empty() {
            info!(
                epoch,
                ready = report.ready_count(),
                admitting = report.admitting.len(),
                missing = report.missing(),
                in_flight = report.in_flight(),
                idle_rate = report.mean_idle_rate().unwrap_or(f64::NAN),
                "load report"
            );
        }
        self.reports.send_replace(report.clone());
        report
    }

    /// Start admission for every `Connecting` worker that has none running.
    /// Admission runs beside the tick so a slow worker cannot stall sampling.
    fn start_admissions(&self, snapshot: &[WorkerRecord]) -> Vec<WorkerId> {
        let mut admissions = self.admissions.lock().unwrap_or_else(PoisonError::into_inner);
        admissions.retain(|_, task| !task.is_finished());

        let mut admitting = Vec::new();
        for record in snapshot.iter().filter(|r| r.state == WorkerState::Connecting) {
            admitting.push(record.id.clone());
            if admissions.contains_key(&record.id) {
                continue;
            }
            let controller = self.controller.clone();
            let id = record.id.clone();
            let task = tokio::spawn(async move {
                if let Err(e) = controller.admit(&id).await {
                    warn!(worker_id = %id, error = %e, "admission failed");
                }
            });
            admissions.insert(record.id.clone(), task);
        }
        admitting
    }

    /// Abort running admissions; their workers are marked `Invalid`.
    async fn cancel_admissions(&self) {
        let pending: Vec<(WorkerId, JoinHandle<()>)> = self
            .admissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (id, task) in pending {
            task.abort();
            if let Err(e) = task.await
                && e.is_cancelled()
            {
                self.controller.invalidate(&id, "admission cancelled at shutdown").await;
            }
        }
    }
}
