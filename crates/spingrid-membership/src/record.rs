//! Worker records and the lifecycle state machine.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use spin_core::WorkerId;

use crate::endpoint::{DispatchHandle, LoadSample, TelemetryHandle, WorkerHandles};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Connecting,
    Initializing,
    Ready,
    Finalizing,
    Disconnecting,
    Invalid,
}

impl WorkerState {
    /// Whether `self -> next` is an edge of the lifecycle.
    ///
    /// `Invalid` is reachable from everywhere. A worker re-enters
    /// `Connecting` only from `Invalid` or `Disconnecting`, so `Ready`
    /// never regresses straight to `Connecting`.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (_, Invalid)
                | (Invalid | Disconnecting, Connecting)
                | (Connecting, Initializing)
                | (Initializing, Ready)
                | (Ready, Finalizing)
                | (Finalizing, Disconnecting)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Connecting => "CONNECTING",
            WorkerState::Initializing => "INITIALIZING",
            WorkerState::Ready => "READY",
            WorkerState::Finalizing => "FINALIZING",
            WorkerState::Disconnecting => "DISCONNECTING",
            WorkerState::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory view of one worker.
///
/// `dispatch` and `telemetry` are `Some` exactly when `state == Ready`.
#[derive(Clone)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub state: WorkerState,
    pub dispatch: Option<Arc<dyn DispatchHandle>>,
    pub telemetry: Option<Arc<dyn TelemetryHandle>>,
    pub thread_count: usize,
    pub last_load: Option<LoadSample>,
    /// Time of the last state change.
    pub since: Instant,
    /// Times this worker has become `Ready`. Tells one admission of a
    /// worker id from the next.
    pub admission: u64,
}

impl WorkerRecord {
    /// A freshly announced worker.
    pub fn connecting(id: WorkerId) -> Self {
        Self {
            id,
            state: WorkerState::Connecting,
            dispatch: None,
            telemetry: None,
            thread_count: 0,
            last_load: None,
            since: Instant::now(),
            admission: 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == WorkerState::Ready
    }

    pub(crate) fn set_state(&mut self, state: WorkerState) {
        if state != WorkerState::Ready {
            self.dispatch = None;
            self.telemetry = None;
            self.last_load = None;
        }
        self.state = state;
        self.since = Instant::now();
    }

    pub(crate) fn attach(&mut self, handles: WorkerHandles) {
        self.dispatch = Some(handles.dispatch);
        self.telemetry = Some(handles.telemetry);
        self.thread_count = handles.thread_count;
        self.state = WorkerState::Ready;
        self.since = Instant::now();
        self.admission += 1;
    }
}

impl fmt::Debug for WorkerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRecord")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("thread_count", &self.thread_count)
            .field("admission", &self.admission)
            .field("last_load", &self.last_load)
            .finish_non_exhaustive()
    }
}
