//! Wire protocol between coordinator and worker processes.
//!
//! Every frame is a `u32` big-endian body length followed by a JSON body.
//! Requests carry a `request_id` that the matching reply echoes, so one
//! connection serves many concurrent calls.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use spin_core::{ProblemDefinition, SolveOutcome, SolveParams, WorkerId};
use spingrid_membership::LoadSample;

use crate::error::{TransportError, TransportResult};

/// Bumped on any incompatible message change.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted frame body. A problem definition is the biggest payload.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Worker → coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// First frame on every connection.
    Hello {
        protocol_version: u32,
        worker_id: WorkerId,
        threads: usize,
    },
    InitAck { request_id: u64, threads: usize },
    Solved { request_id: u64, outcome: SolveOutcome },
    Load { request_id: u64, sample: LoadSample },
    Failed { request_id: u64, error: String },
}

impl WorkerMessage {
    /// The request this message answers; `None` for `Hello`.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            WorkerMessage::Hello { .. } => None,
            WorkerMessage::InitAck { request_id, .. }
            | WorkerMessage::Solved { request_id, .. }
            | WorkerMessage::Load { request_id, .. }
            | WorkerMessage::Failed { request_id, .. } => Some(*request_id),
        }
    }
}

/// Coordinator → worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    Init { request_id: u64, problem: ProblemDefinition },
    Solve { request_id: u64, seed: u64, params: SolveParams },
    QueryLoad { request_id: u64 },
    Shutdown,
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> TransportResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}
