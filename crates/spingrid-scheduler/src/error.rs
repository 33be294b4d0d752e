//! Scheduler error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that end a `spawn` call early.
#[derive(Debug, Error, PartialEq)]
pub enum SchedulerError {
    #[error("no worker became ready within {waited:?}")]
    NoWorkers { waited: Duration },

    #[error("run deadline exceeded after {completed}/{requested} repetitions")]
    DeadlineExceeded { completed: usize, requested: usize },

    #[error("run aborted after {completed}/{requested} repetitions")]
    Aborted { completed: usize, requested: usize },
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
