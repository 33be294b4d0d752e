//! Simulated annealing over a spin-glass Hamiltonian.
//!
//! Starts from a random spin configuration and performs `sweeps` Monte
//! Carlo sweeps while the inverse temperature ramps linearly from `beta0`
//! to `beta1`. Each sweep visits every site once and applies the
//! Metropolis rule: a flip is accepted when it lowers the energy, or with
//! probability `exp(-beta * dE)` otherwise.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use spin_core::{Coupling, ProblemDefinition, SolveOutcome, SolveParams};

use crate::solver::Solver;

/// The simulated annealing kernel. Stateless; every run owns its spins.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaSolver;

impl SaSolver {
    pub fn new() -> Self {
        Self
    }
}

impl Solver for SaSolver {
    fn name(&self) -> &'static str {
        "simulated-annealing"
    }

    fn run(&self, problem: &ProblemDefinition, seed: u64, params: &SolveParams) -> SolveOutcome {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let n = problem.size();

        let mut spins: Vec<u8> = (0..n).map(|_| u8::from(rng.gen_bool(0.5))).collect();
        let mut e = energy(problem, &spins);

        for s in 0..params.sweeps {
            let beta = inverse_temperature(params, s);
            for i in 0..n {
                let de = delta_energy(problem, &spins, i);
                if de <= 0.0 || rng.r#gen::<f64>() < (-beta * de).exp() {
                    spins[i] ^= 1;
                    e += de;
                }
            }
        }

        SolveOutcome {
            seed,
            energy: e,
            spins,
        }
    }
}

/// Linear ramp from `beta0` at sweep 0 to `beta1` at the last sweep.
fn inverse_temperature(params: &SolveParams, sweep: u64) -> f64 {
    if params.sweeps <= 1 {
        return params.beta0;
    }
    params.beta0 + (params.beta1 - params.beta0) / (params.sweeps - 1) as f64 * sweep as f64
}

/// Parity of the spins a coupling touches.
fn parity(coupling: &Coupling, spins: &[u8]) -> u8 {
    coupling.sites.iter().fold(0, |acc, &b| acc ^ spins[b as usize])
}

/// +1 for couplings over an odd number of sites, -1 for even.
fn order_sign(coupling: &Coupling) -> f64 {
    if coupling.sites.len() % 2 == 1 { 1.0 } else { -1.0 }
}

/// Total energy of a configuration.
pub fn energy(problem: &ProblemDefinition, spins: &[u8]) -> f64 {
    let mut e = 0.0;
    for i in 0..problem.size() {
        for c in problem.node(i) {
            let term = (2.0 * parity(c, spins) as f64 - 1.0) * c.value * order_sign(c);
            // Each coupling is visited once per site it touches.
            e += term / c.sites.len() as f64;
        }
    }
    e
}

/// Energy change from flipping site `i`.
fn delta_energy(problem: &ProblemDefinition, spins: &[u8], i: usize) -> f64 {
    let mut e = 0.0;
    for c in problem.node(i) {
        e += (1.0 - 2.0 * parity(c, spins) as f64) * c.value * order_sign(c);
    }
    2.0 * e
}
