//! spingrid-transport: how the coordinator reaches its workers.
//!
//! Two endpoint kinds implement the membership endpoint traits:
//!
//! - [`LocalEndpoint`]: worker threads inside the coordinator process
//! - [`RemoteEndpoint`]: a worker process connected over TCP
//!
//! Both run repetitions through a [`WorkerCore`], which holds the problem
//! copy, bounds parallelism to the worker's thread count, and measures
//! idle time.
//!
//! # Architecture
//!
//! ```text
//! worker process                          coordinator
//! WorkerAgent ──dial──► AnnounceListener ──Hello──► NameDirectory.register
//!     │                                            MembershipController.announce
//!     │  ◄──── Init / Solve / QueryLoad / Shutdown ──── RemoteEndpoint
//!     └───── InitAck / Solved / Load / Failed ────►   (request-id multiplexed)
//! ```
//!
//! Frames are a 4-byte big-endian length followed by a JSON body.

pub mod agent;
pub mod error;
pub mod listener;
pub mod local;
pub mod protocol;
pub mod remote;
pub mod worker;

pub use agent::WorkerAgent;
pub use error::{TransportError, TransportResult};
pub use listener::AnnounceListener;
pub use local::LocalEndpoint;
pub use protocol::{CoordinatorMessage, PROTOCOL_VERSION, WorkerMessage};
pub use remote::RemoteEndpoint;
pub use worker::{IdleTracker, WorkerCore};
