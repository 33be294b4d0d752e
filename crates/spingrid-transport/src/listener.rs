//! Accepts worker connections and announces them to the membership
//! controller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use spin_core::WorkerId;
use spingrid_membership::{MembershipController, WorkerState};

use crate::error::{TransportError, TransportResult};
use crate::protocol::{PROTOCOL_VERSION, WorkerMessage, read_frame};
use crate::remote::RemoteEndpoint;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AnnounceListener {
    listener: TcpListener,
    controller: MembershipController,
    handshake_timeout: Duration,
}

impl AnnounceListener {
    pub async fn bind(addr: &str, controller: MembershipController) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            controller,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown is signalled. Each handshake runs
    /// in its own task.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "announce listener started");
        }
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let controller = self.controller.clone();
                        let timeout = self.handshake_timeout;
                        tokio::spawn(async move {
                            match handshake(stream, &controller, timeout).await {
                                Ok(id) => debug!(worker_id = %id, %peer, "worker connected"),
                                Err(e) => warn!(%peer, error = %e, "worker handshake failed"),
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = shutdown.changed() => {
                    info!("announce listener shutting down");
                    break;
                }
            }
        }
    }
}

/// Read `Hello`, register the worker's endpoint, and announce it.
async fn handshake(mut stream: TcpStream, controller: &MembershipController, timeout: Duration) -> TransportResult<WorkerId> {
    let hello = tokio::time::timeout(timeout, read_frame::<_, WorkerMessage>(&mut stream))
        .await
        .map_err(|_| TransportError::Handshake("no hello before timeout".into()))??;

    let (id, threads) = match hello {
        Some(WorkerMessage::Hello {
            protocol_version,
            worker_id,
            threads,
        }) => {
            if protocol_version != PROTOCOL_VERSION {
                return Err(TransportError::VersionMismatch {
                    expected: PROTOCOL_VERSION,
                    got: protocol_version,
                });
            }
            (worker_id, threads)
        }
        Some(other) => return Err(TransportError::Unexpected(format!("{:?} before hello", other.request_id()))),
        None => return Err(TransportError::Closed),
    };

    // A known id on a new connection means the old process is gone.
    let state = controller.table().state_of(&id).await;
    if !matches!(state, WorkerState::Invalid | WorkerState::Disconnecting) {
        controller.invalidate(&id, "worker reconnected").await;
    }

    let endpoint = Arc::new(RemoteEndpoint::spawn(id.clone(), stream));
    controller.directory().register(&id, endpoint).await;
    info!(worker_id = %id, threads, "worker said hello");
    controller.announce(&id).await;
    Ok(id)
}
