//! In-process worker: repetitions run on the coordinator's own threads.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use spin_anneal::Solver;
use spin_core::{ProblemDefinition, WorkerId};
use spingrid_membership::{EndpointError, WorkerEndpoint, WorkerHandles};

use crate::worker::WorkerCore;

pub struct LocalEndpoint {
    id: WorkerId,
    core: Arc<WorkerCore>,
}

impl LocalEndpoint {
    pub fn new(id: WorkerId, solver: Arc<dyn Solver>, threads: usize) -> Self {
        Self {
            id,
            core: Arc::new(WorkerCore::new(solver, threads)),
        }
    }

    pub fn core(&self) -> &Arc<WorkerCore> {
        &self.core
    }
}

#[async_trait]
impl WorkerEndpoint for LocalEndpoint {
    fn worker_id(&self) -> &WorkerId {
        &self.id
    }

    async fn initialize(&self, problem: Arc<ProblemDefinition>) -> Result<WorkerHandles, EndpointError> {
        self.core.load(problem).await;
        Ok(WorkerHandles {
            dispatch: self.core.clone(),
            telemetry: self.core.clone(),
            thread_count: self.core.threads(),
        })
    }

    async fn shutdown(&self) -> Result<(), EndpointError> {
        info!(worker_id = %self.id, "local worker stopping");
        self.core.close();
        Ok(())
    }
}
