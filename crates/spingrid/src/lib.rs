//! spingrid: coordinator assembly for the `spingrid` binary.
//!
//! The binary wires these pieces together; integration tests drive them
//! directly.

pub mod console;
pub mod coordinator;
pub mod output;

pub use coordinator::{Coordinator, CoordinatorBuilder, Settings};
pub use output::{RunHeader, write_results, write_results_file};
