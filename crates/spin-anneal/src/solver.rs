//! The kernel capability.

use spin_core::{ProblemDefinition, SolveOutcome, SolveParams};

/// One repetition of a stochastic optimizer over a problem.
///
/// `run` must be deterministic for a given `(problem, seed, params)` and
/// safe to call from many threads at once.
pub trait Solver: Send + Sync + 'static {
    /// Short kernel name for logs.
    fn name(&self) -> &'static str;

    fn run(&self, problem: &ProblemDefinition, seed: u64, params: &SolveParams) -> SolveOutcome;
}
