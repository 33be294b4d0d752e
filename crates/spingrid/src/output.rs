//! Results file writer.
//!
//! ```text
//! # infile=lattice.lat Ns=1000 beta0=0.100000 beta1=3.000000 num_rep=4
//! -182 0110...
//! -184 1001...
//! ```
//!
//! One line per repetition, ordered by seed.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;

use spin_core::{SolveOutcome, SolveParams};

/// First line of a results file.
#[derive(Debug, Clone, Copy)]
pub struct RunHeader<'a> {
    pub input: &'a Path,
    pub params: SolveParams,
    pub repetitions: usize,
}

impl fmt::Display for RunHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "# infile={} Ns={} beta0={:.6} beta1={:.6} num_rep={}",
            self.input.display(),
            self.params.sweeps,
            self.params.beta0,
            self.params.beta1,
            self.repetitions,
        )
    }
}

/// Write the header and one line per outcome, sorted by seed.
pub fn write_results<W: Write>(mut out: W, header: &RunHeader<'_>, outcomes: &[SolveOutcome]) -> std::io::Result<()> {
    let mut sorted: Vec<&SolveOutcome> = outcomes.iter().collect();
    sorted.sort_by_key(|o| o.seed);

    writeln!(out, "{header}")?;
    for outcome in sorted {
        writeln!(out, "{outcome}")?;
    }
    out.flush()
}

pub fn write_results_file(path: &Path, header: &RunHeader<'_>, outcomes: &[SolveOutcome]) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_results(BufWriter::new(file), header, outcomes).with_context(|| format!("writing {}", path.display()))
}
