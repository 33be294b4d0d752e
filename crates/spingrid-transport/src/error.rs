//! Transport error types.

use thiserror::Error;

use spingrid_membership::EndpointError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("connection closed")]
    Closed,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    #[error("unexpected message: {0}")]
    Unexpected(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

impl From<TransportError> for EndpointError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Closed => EndpointError::Closed,
            other => EndpointError::Protocol(other.to_string()),
        }
    }
}
