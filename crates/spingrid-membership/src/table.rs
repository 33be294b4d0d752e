//! Membership table: WorkerId → WorkerRecord under one readers-writer lock.
//!
//! Readers copy records out (`snapshot`, `ready_workers`) and iterate
//! without the lock. Mutators are crate-private; `MembershipController` is
//! the only writer. No method awaits anything but the lock itself, so the
//! lock is never held across a call to a worker.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use spin_core::WorkerId;

use crate::endpoint::{LoadSample, WorkerHandles};
use crate::error::{MembershipError, MembershipResult};
use crate::record::{WorkerRecord, WorkerState};

#[derive(Default)]
pub struct MembershipTable {
    records: RwLock<HashMap<WorkerId, WorkerRecord>>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record, ordered by worker id.
    pub async fn snapshot(&self) -> Vec<WorkerRecord> {
        let records = self.records.read().await;
        let mut out: Vec<WorkerRecord> = records.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Copy of the `READY` records, ordered by worker id.
    pub async fn ready_workers(&self) -> Vec<WorkerRecord> {
        let records = self.records.read().await;
        let mut out: Vec<WorkerRecord> = records.values().filter(|r| r.is_ready()).cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn get(&self, id: &WorkerId) -> Option<WorkerRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// State of a worker. An absent worker reads as `Invalid`.
    pub async fn state_of(&self, id: &WorkerId) -> WorkerState {
        self.records
            .read()
            .await
            .get(id)
            .map(|r| r.state)
            .unwrap_or(WorkerState::Invalid)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Move an absent, `Invalid` or `Disconnecting` worker to `Connecting`.
    /// Returns false (and changes nothing) for any other state.
    pub(crate) async fn announce(&self, id: &WorkerId) -> bool {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            None => {
                records.insert(id.clone(), WorkerRecord::connecting(id.clone()));
                true
            }
            Some(r) if r.state.can_transition_to(WorkerState::Connecting) => {
                r.set_state(WorkerState::Connecting);
                true
            }
            Some(_) => false,
        }
    }

    /// Apply a lifecycle transition. Returns the previous state.
    ///
    /// `Ready` is only reachable through `mark_ready`, which carries the handles.
    pub(crate) async fn transition(&self, id: &WorkerId, next: WorkerState) -> MembershipResult<WorkerState> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| MembershipError::UnknownWorker(id.clone()))?;
        let prev = record.state;
        if prev == next {
            return Ok(prev);
        }
        if next == WorkerState::Ready || !prev.can_transition_to(next) {
            return Err(MembershipError::IllegalTransition {
                id: id.clone(),
                from: prev,
                to: next,
            });
        }
        record.set_state(next);
        debug!(worker_id = %id, from = %prev, to = %next, "worker state changed");
        Ok(prev)
    }

    /// Transition only if the current state is `expected`. The caller that
    /// wins owns the step that follows.
    pub(crate) async fn compare_and_transition(
        &self,
        id: &WorkerId,
        expected: WorkerState,
        next: WorkerState,
    ) -> bool {
        if next == WorkerState::Ready || !expected.can_transition_to(next) {
            return false;
        }
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(r) if r.state == expected => {
                r.set_state(next);
                debug!(worker_id = %id, from = %expected, to = %next, "worker state changed");
                true
            }
            _ => false,
        }
    }

    /// `Initializing → Ready`, attaching the resolved handles in the same write.
    pub(crate) async fn mark_ready(&self, id: &WorkerId, handles: WorkerHandles) -> MembershipResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| MembershipError::UnknownWorker(id.clone()))?;
        if record.state != WorkerState::Initializing {
            return Err(MembershipError::IllegalTransition {
                id: id.clone(),
                from: record.state,
                to: WorkerState::Ready,
            });
        }
        record.attach(handles);
        Ok(())
    }

    /// Store a load sample on a `Ready` worker. Returns false otherwise.
    pub(crate) async fn record_load(&self, id: &WorkerId, sample: Option<LoadSample>) -> bool {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(r) if r.is_ready() => {
                r.last_load = sample;
                true
            }
            _ => false,
        }
    }
}
