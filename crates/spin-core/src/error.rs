//! Core error types.

use thiserror::Error;

/// Errors raised while loading problems or configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("problem has no couplings")]
    EmptyProblem,
}

pub type CoreResult<T> = Result<T, CoreError>;
