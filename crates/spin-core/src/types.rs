//! Shared types used across spingrid crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of a worker process. Unique within one coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Symbolic name under which the worker's endpoint is registered.
    pub fn symbolic_name(&self) -> String {
        format!("/solver/{}", self.0)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Parameters of one annealing repetition, identical for every task of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveParams {
    /// Starting inverse temperature.
    pub beta0: f64,
    /// Ending inverse temperature.
    pub beta1: f64,
    /// Monte Carlo sweeps per repetition.
    pub sweeps: u64,
}

impl Default for SolveParams {
    fn default() -> Self {
        Self {
            beta0: 0.1,
            beta1: 3.0,
            sweeps: 1000,
        }
    }
}

/// Output of one repetition. The seed identifies it within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveOutcome {
    pub seed: u64,
    /// Final energy of the configuration.
    pub energy: f64,
    /// Final spin configuration, one 0/1 entry per site.
    pub spins: Vec<u8>,
}

/// Formats as `<energy> <spins>`, the line format of the results file.
impl fmt::Display for SolveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.energy)?;
        for s in &self.spins {
            write!(f, "{s}")?;
        }
        Ok(())
    }
}
