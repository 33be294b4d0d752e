//! Spin-glass Hamiltonian: the problem definition shared by every worker.
//!
//! A problem is a set of couplings over spin sites. Each coupling ties one
//! or more sites to a real value. The definition is loaded once by the
//! coordinator, serialized to every worker at admission, and never mutated
//! afterwards.
//!
//! # Lattice format
//!
//! ```text
//! # comment lines are skipped
//! 0 1 -1.0
//! 1 2 1.0
//! 0 1 2 0.5
//! ```
//!
//! Every token but the last is a site label; the last is the coupling value.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

/// One coupling term: a sorted set of site indices and its strength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupling {
    pub sites: Vec<u32>,
    pub value: f64,
}

/// Immutable Hamiltonian over `size()` spins.
///
/// `node(i)` lists every coupling that involves site `i`, so a coupling
/// over k distinct sites appears in k node lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemDefinition {
    nodes: Vec<Vec<Coupling>>,
    couplings: usize,
}

impl ProblemDefinition {
    /// Build a problem directly from couplings over `size` sites.
    pub fn from_couplings(size: usize, couplings: Vec<Coupling>) -> CoreResult<Self> {
        let mut nodes: Vec<Vec<Coupling>> = vec![Vec::new(); size];
        let count = couplings.len();
        for coupling in couplings {
            let mut seen = HashSet::new();
            for &site in &coupling.sites {
                let slot = nodes.get_mut(site as usize).ok_or_else(|| {
                    CoreError::Config(format!("site {site} out of range for {size} spins"))
                })?;
                if seen.insert(site) {
                    slot.push(coupling.clone());
                }
            }
        }
        Ok(Self {
            nodes,
            couplings: count,
        })
    }

    /// Load a lattice file.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let problem = Self::from_lattice_str(&content)?;
        debug!(
            path = %path.display(),
            spins = problem.size(),
            couplings = problem.coupling_count(),
            "problem loaded"
        );
        Ok(problem)
    }

    /// Parse lattice text.
    pub fn from_lattice_str(content: &str) -> CoreResult<Self> {
        let mut index: HashMap<&str, u32> = HashMap::new();
        let mut marks: HashSet<Vec<u32>> = HashSet::new();
        let mut couplings = Vec::new();

        for (n, line) in content.lines().enumerate() {
            let line_no = n + 1;
            if !line.contains(' ') || line.contains('#') {
                continue;
            }

            let tokens: Vec<&str> = line.split_whitespace().collect();
            let Some((raw_value, labels)) = tokens.split_last() else {
                continue;
            };
            let value: f64 = raw_value.parse().map_err(|_| CoreError::Parse {
                line: line_no,
                reason: format!("invalid coupling value '{raw_value}'"),
            })?;
            if value == 0.0 {
                continue;
            }
            if labels.is_empty() {
                return Err(CoreError::Parse {
                    line: line_no,
                    reason: "coupling without sites".to_string(),
                });
            }

            let mut sites: Vec<u32> = labels
                .iter()
                .map(|label| {
                    let next = index.len() as u32;
                    *index.entry(*label).or_insert(next)
                })
                .collect();
            sites.sort_unstable();

            if !marks.insert(sites.clone()) {
                warn!(line = line_no, text = %line, "duplicate coupling ignored");
                continue;
            }
            couplings.push(Coupling { sites, value });
        }

        if couplings.is_empty() {
            return Err(CoreError::EmptyProblem);
        }
        Self::from_couplings(index.len(), couplings)
    }

    /// Number of spin sites.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Number of distinct couplings.
    pub fn coupling_count(&self) -> usize {
        self.couplings
    }

    /// Couplings that involve site `i`.
    pub fn node(&self, i: usize) -> &[Coupling] {
        &self.nodes[i]
    }
}
