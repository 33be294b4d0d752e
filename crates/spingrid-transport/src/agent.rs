//! Worker-process side of the TCP transport.
//!
//! Dials the coordinator, introduces itself with `Hello`, then serves
//! requests until the coordinator sends `Shutdown` or hangs up. Solve
//! requests run concurrently; replies go out through a single writer task
//! in completion order.

use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use spin_anneal::Solver;
use spin_core::WorkerId;

use crate::error::TransportResult;
use crate::protocol::{CoordinatorMessage, PROTOCOL_VERSION, WorkerMessage, read_frame, write_frame};
use crate::worker::WorkerCore;

pub struct WorkerAgent {
    id: WorkerId,
    core: Arc<WorkerCore>,
}

impl WorkerAgent {
    pub fn new(id: WorkerId, solver: Arc<dyn Solver>, threads: usize) -> Self {
        Self {
            id,
            core: Arc::new(WorkerCore::new(solver, threads)),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Connect to `coordinator` and serve until told to stop.
    pub async fn run(self, coordinator: &str) -> TransportResult<()> {
        let stream = TcpStream::connect(coordinator).await?;
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        info!(worker_id = %self.id, %coordinator, threads = self.core.threads(), "connected to coordinator");

        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMessage>();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = write_frame(&mut write, &message).await {
                    warn!(error = %e, "reply write failed");
                    break;
                }
            }
        });

        let _ = tx.send(WorkerMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
            worker_id: self.id.clone(),
            threads: self.core.threads(),
        });

        let result = self.serve(&mut reader, &tx).await;

        self.core.close();
        drop(tx);
        let _ = writer.await;
        info!(worker_id = %self.id, "worker agent stopped");
        result
    }

    async fn serve(
        &self,
        reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
        tx: &mpsc::UnboundedSender<WorkerMessage>,
    ) -> TransportResult<()> {
        loop {
            let Some(message) = read_frame::<_, CoordinatorMessage>(reader).await? else {
                info!(worker_id = %self.id, "coordinator closed the connection");
                return Ok(());
            };
            match message {
                CoordinatorMessage::Init { request_id, problem } => {
                    self.core.load(Arc::new(problem)).await;
                    let _ = tx.send(WorkerMessage::InitAck {
                        request_id,
                        threads: self.core.threads(),
                    });
                }
                CoordinatorMessage::Solve {
                    request_id,
                    seed,
                    params,
                } => {
                    let core = self.core.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let reply = match core.solve(seed, params).await {
                            Ok(outcome) => WorkerMessage::Solved { request_id, outcome },
                            Err(e) => WorkerMessage::Failed {
                                request_id,
                                error: e.to_string(),
                            },
                        };
                        let _ = tx.send(reply);
                    });
                }
                CoordinatorMessage::QueryLoad { request_id } => {
                    let _ = tx.send(WorkerMessage::Load {
                        request_id,
                        sample: self.core.load_sample(),
                    });
                }
                CoordinatorMessage::Shutdown => {
                    debug!(worker_id = %self.id, "shutdown requested");
                    return Ok(());
                }
            }
        }
    }
}
