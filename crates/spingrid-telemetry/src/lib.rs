//! spingrid-telemetry: background load monitoring.
//!
//! The `TelemetryMonitor` runs beside the dispatcher on its own schedule.
//! Every tick it:
//! - starts admission for workers that announced themselves
//! - samples the load of every ready worker, concurrently and best-effort
//! - stores each sample on the worker's record
//! - publishes a consolidated `LoadReport`
//!
//! Reports are informational; nothing rebalances work from them.

pub mod monitor;
pub mod report;

pub use monitor::TelemetryMonitor;
pub use report::{LoadReport, WorkerLoad};
