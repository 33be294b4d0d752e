//! spin-anneal: compute kernels executed by workers.
//!
//! The scheduler never names a concrete kernel; it only sees the
//! [`Solver`] capability. [`SaSolver`] is the kernel that ships with
//! spingrid.

pub mod sa;
pub mod solver;

pub use sa::SaSolver;
pub use solver::Solver;
