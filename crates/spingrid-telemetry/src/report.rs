//! Consolidated load report.

use std::fmt;

use spin_core::WorkerId;
use spingrid_membership::LoadSample;

/// Load of one ready worker. `sample` is `None` when the worker did not
/// answer in time.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerLoad {
    pub id: WorkerId,
    pub threads: usize,
    pub sample: Option<LoadSample>,
}

/// One telemetry tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub epoch: u64,
    pub workers: Vec<WorkerLoad>,
    /// Workers whose admission started during this tick.
    pub admitting: Vec<WorkerId>,
}

impl LoadReport {
    pub fn ready_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of ready workers without a sample.
    pub fn missing(&self) -> usize {
        self.workers.iter().filter(|w| w.sample.is_none()).count()
    }

    /// Mean idle rate over the workers that reported, weighted by thread count.
    pub fn mean_idle_rate(&self) -> Option<f64> {
        let (weighted, threads) = self
            .workers
            .iter()
            .filter_map(|w| w.sample.map(|s| (s.idle_rate * w.threads as f64, w.threads)))
            .fold((0.0, 0usize), |(a, t), (w, n)| (a + w, t + n));
        (threads > 0).then(|| weighted / threads as f64)
    }

    pub fn in_flight(&self) -> u64 {
        self.workers
            .iter()
            .filter_map(|w| w.sample)
            .map(|s| u64::from(s.in_flight))
            .sum()
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "load #{}: {} ready", self.epoch, self.ready_count())?;
        match self.mean_idle_rate() {
            Some(idle) => write!(f, ", idle {:.1}%", idle * 100.0)?,
            None => write!(f, ", idle n/a")?,
        }
        write!(f, ", {} in flight", self.in_flight())?;
        for w in &self.workers {
            match w.sample {
                Some(s) => write!(f, "; {} idle {:.1}% ({} in flight)", w.id, s.idle_rate * 100.0, s.in_flight)?,
                None => write!(f, "; {} no data", w.id)?,
            }
        }
        Ok(())
    }
}
