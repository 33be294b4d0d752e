//! spingrid-membership: worker lifecycle and elastic membership.
//!
//! Tracks every worker the coordinator has heard of, drives each one
//! through admission, and asks an external launcher for more capacity.
//!
//! # Architecture
//!
//! ```text
//! MembershipController (single writer)
//!   ├── MembershipTable   WorkerId → WorkerRecord behind one RwLock
//!   ├── NameDirectory     "/solver/<id>" → WorkerEndpoint
//!   └── ProcessLauncher   grow(n) → start worker processes
//!
//! Worker lifecycle
//!   INVALID → CONNECTING → INITIALIZING → READY → FINALIZING → DISCONNECTING
//!   any state → INVALID on unrecoverable communication failure
//! ```
//!
//! Readers (dispatcher, telemetry) take snapshots; the table lock is never
//! held across a call to a worker.

pub mod controller;
pub mod directory;
pub mod endpoint;
pub mod error;
pub mod launcher;
pub mod record;
pub mod table;

pub use controller::{MembershipController, MembershipStatus};
pub use directory::NameDirectory;
pub use endpoint::{DispatchHandle, LoadSample, TelemetryHandle, WorkerEndpoint, WorkerHandles};
pub use error::{EndpointError, LaunchError, LaunchResult, MembershipError, MembershipResult};
pub use launcher::{CommandLauncher, LaunchPlan, PlacementHint, ProcessLauncher};
pub use record::{WorkerRecord, WorkerState};
pub use table::MembershipTable;
