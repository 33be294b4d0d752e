//! Name directory: symbolic name → worker endpoint.
//!
//! Workers register under `"/solver/<worker-id>"`; admission resolves the
//! endpoint by the same name. Re-registering a name replaces the previous
//! endpoint so a restarted worker can announce again.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use spin_core::WorkerId;

use crate::endpoint::WorkerEndpoint;

#[derive(Default)]
pub struct NameDirectory {
    entries: RwLock<HashMap<String, Arc<dyn WorkerEndpoint>>>,
}

impl NameDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint under the worker's symbolic name. Returns the
    /// endpoint it replaced, if any.
    pub async fn register(&self, id: &WorkerId, endpoint: Arc<dyn WorkerEndpoint>) -> Option<Arc<dyn WorkerEndpoint>> {
        let name = id.symbolic_name();
        debug!(%name, "endpoint registered");
        self.entries.write().await.insert(name, endpoint)
    }

    pub async fn resolve(&self, id: &WorkerId) -> Option<Arc<dyn WorkerEndpoint>> {
        self.entries.read().await.get(&id.symbolic_name()).cloned()
    }

    pub async fn unregister(&self, id: &WorkerId) -> Option<Arc<dyn WorkerEndpoint>> {
        let removed = self.entries.write().await.remove(&id.symbolic_name());
        if removed.is_some() {
            debug!(worker_id = %id, "endpoint unregistered");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
