//! spin-core: types shared by every spingrid crate.
//!
//! - [`types`]: worker identity, solve parameters, repetition outcomes
//! - [`hamiltonian`]: the spin-glass problem definition and its loader
//! - [`config`]: `spingrid.toml` parsing and defaults

pub mod config;
pub mod error;
pub mod hamiltonian;
pub mod types;

pub use config::{
    CoordinatorSettings, LauncherSettings, MembershipSettings, SchedulerSettings, SpinConfig,
    TelemetrySettings, parse_duration,
};
pub use error::{CoreError, CoreResult};
pub use hamiltonian::{Coupling, ProblemDefinition};
pub use types::*;
