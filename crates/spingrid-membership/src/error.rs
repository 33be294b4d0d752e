//! Membership error types.

use std::time::Duration;

use thiserror::Error;

use spin_core::WorkerId;

use crate::record::WorkerState;

/// Errors from lifecycle operations.
#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("unknown worker: {0}")]
    UnknownWorker(WorkerId),

    #[error("worker {id}: illegal transition {from} -> {to}")]
    IllegalTransition {
        id: WorkerId,
        from: WorkerState,
        to: WorkerState,
    },

    #[error("no endpoint registered for worker {0}")]
    NotRegistered(WorkerId),

    #[error("admission of worker {id} failed: {source}")]
    Admission {
        id: WorkerId,
        #[source]
        source: EndpointError,
    },

    #[error("admission of worker {0} timed out")]
    AdmissionTimeout(WorkerId),

    #[error("launch error: {0}")]
    Launch(#[from] LaunchError),
}

pub type MembershipResult<T> = Result<T, MembershipError>;

/// Errors from calls on a worker's endpoint or handles.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EndpointError {
    #[error("worker connection closed")]
    Closed,

    #[error("worker has no problem loaded")]
    NotInitialized,

    #[error("worker reported failure: {0}")]
    Remote(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors from starting worker processes.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {after:?}")]
    Timeout { program: String, after: Duration },

    #[error("no cluster command configured")]
    NoClusterCommand,

    #[error("no process launcher configured")]
    NoLauncher,

    #[error("launcher i/o: {0}")]
    Io(#[from] std::io::Error),
}

pub type LaunchResult<T> = Result<T, LaunchError>;
