//! Coordinator side of one TCP worker connection.
//!
//! Calls are multiplexed over the connection by request id. A reader task
//! routes each reply to the `oneshot` sender registered by its caller; when
//! the connection ends every outstanding call fails with `Closed`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use spin_core::{ProblemDefinition, SolveOutcome, SolveParams, WorkerId};
use spingrid_membership::{
    DispatchHandle, EndpointError, LoadSample, TelemetryHandle, WorkerEndpoint, WorkerHandles,
};

use crate::error::{TransportError, TransportResult};
use crate::protocol::{CoordinatorMessage, WorkerMessage, read_frame, write_frame};

#[derive(Default)]
struct Pending {
    closed: bool,
    calls: HashMap<u64, oneshot::Sender<WorkerMessage>>,
}

/// The shared half of a connection. Doubles as the worker's dispatch and
/// telemetry handle.
struct Link {
    id: WorkerId,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Mutex<Pending>,
    next_request: AtomicU64,
}

/// Drops the pending entry of a call that ends without a reply.
struct CallGuard<'a> {
    link: &'a Link,
    request_id: u64,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.link.pending().calls.remove(&self.request_id);
    }
}

impl Link {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.pending().closed
    }

    fn close(&self) {
        let mut pending = self.pending();
        pending.closed = true;
        // Dropping the senders fails every waiting caller.
        pending.calls.clear();
    }

    async fn send(&self, message: &CoordinatorMessage) -> TransportResult<()> {
        let mut writer = self.writer.lock().await;
        let result = write_frame(&mut *writer, message).await;
        if result.is_err() {
            self.close();
        }
        result
    }

    async fn call(&self, build: impl FnOnce(u64) -> CoordinatorMessage) -> TransportResult<WorkerMessage> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending();
            if pending.closed {
                return Err(TransportError::Closed);
            }
            pending.calls.insert(request_id, tx);
        }
        let _guard = CallGuard { link: self, request_id };
        self.send(&build(request_id)).await?;
        rx.await.map_err(|_| TransportError::Closed)
    }
}

async fn read_loop(link: Arc<Link>, mut reader: BufReader<OwnedReadHalf>) {
    loop {
        match read_frame::<_, WorkerMessage>(&mut reader).await {
            Ok(Some(message)) => {
                let Some(request_id) = message.request_id() else {
                    warn!(worker_id = %link.id, "unexpected hello on established connection");
                    continue;
                };
                let waiter = link.pending().calls.remove(&request_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(message);
                    }
                    None => debug!(worker_id = %link.id, request_id, "reply for abandoned call"),
                }
            }
            Ok(None) => {
                info!(worker_id = %link.id, "worker connection closed");
                break;
            }
            Err(e) => {
                warn!(worker_id = %link.id, error = %e, "worker connection failed");
                break;
            }
        }
    }
    link.close();
}

fn unexpected(reply: &WorkerMessage) -> EndpointError {
    EndpointError::Protocol(format!("unexpected reply to request {:?}", reply.request_id()))
}

#[async_trait]
impl DispatchHandle for Link {
    async fn solve(&self, seed: u64, params: SolveParams) -> Result<SolveOutcome, EndpointError> {
        match self.call(|request_id| CoordinatorMessage::Solve { request_id, seed, params }).await? {
            WorkerMessage::Solved { outcome, .. } => Ok(outcome),
            WorkerMessage::Failed { error, .. } => Err(EndpointError::Remote(error)),
            other => Err(unexpected(&other)),
        }
    }
}

#[async_trait]
impl TelemetryHandle for Link {
    async fn load_sample(&self) -> Result<LoadSample, EndpointError> {
        match self.call(|request_id| CoordinatorMessage::QueryLoad { request_id }).await? {
            WorkerMessage::Load { sample, .. } => Ok(sample),
            WorkerMessage::Failed { error, .. } => Err(EndpointError::Remote(error)),
            other => Err(unexpected(&other)),
        }
    }
}

/// A worker process reached over TCP.
pub struct RemoteEndpoint {
    id: WorkerId,
    link: Arc<Link>,
    reader: JoinHandle<()>,
}

impl RemoteEndpoint {
    /// Take over a connection whose `Hello` has already been read.
    pub fn spawn(id: WorkerId, stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        let link = Arc::new(Link {
            id: id.clone(),
            writer: tokio::sync::Mutex::new(write),
            pending: Mutex::new(Pending::default()),
            next_request: AtomicU64::new(1),
        });
        let reader = tokio::spawn(read_loop(link.clone(), BufReader::new(read)));
        Self { id, link, reader }
    }

    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }
}

impl Drop for RemoteEndpoint {
    fn drop(&mut self) {
        self.reader.abort();
        self.link.close();
    }
}

#[async_trait]
impl WorkerEndpoint for RemoteEndpoint {
    fn worker_id(&self) -> &WorkerId {
        &self.id
    }

    async fn initialize(&self, problem: Arc<ProblemDefinition>) -> Result<WorkerHandles, EndpointError> {
        let reply = self
            .link
            .call(|request_id| CoordinatorMessage::Init {
                request_id,
                problem: (*problem).clone(),
            })
            .await?;
        match reply {
            WorkerMessage::InitAck { threads, .. } => Ok(WorkerHandles {
                dispatch: self.link.clone(),
                telemetry: self.link.clone(),
                thread_count: threads,
            }),
            WorkerMessage::Failed { error, .. } => Err(EndpointError::Remote(error)),
            other => Err(unexpected(&other)),
        }
    }

    async fn shutdown(&self) -> Result<(), EndpointError> {
        self.link.send(&CoordinatorMessage::Shutdown).await?;
        Ok(())
    }
}
