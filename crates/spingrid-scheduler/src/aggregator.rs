//! Result aggregator: collects outcomes as repetitions finish.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use spin_core::SolveOutcome;

/// Unordered collection of finished repetitions.
///
/// `count()` is a lock-free read, so status queries never contend with
/// `add`.
#[derive(Default)]
pub struct ResultAggregator {
    outcomes: Mutex<Vec<SolveOutcome>>,
    count: AtomicUsize,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, outcome: SolveOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome);
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Take everything collected so far and start over.
    pub fn drain(&self) -> Vec<SolveOutcome> {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        self.count.store(0, Ordering::Release);
        std::mem::take(&mut *outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn outcome(seed: u64) -> SolveOutcome {
        SolveOutcome { seed, energy: 0.0, spins: vec![1] }
    }

    #[test]
    fn drain_resets() {
        let agg = ResultAggregator::new();
        agg.add(outcome(1));
        agg.add(outcome(2));
        assert_eq!(agg.count(), 2);
        let drained = agg.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(agg.count(), 0);
        assert!(agg.drain().is_empty());
    }

    #[test]
    fn concurrent_adds_are_all_counted() {
        let agg = Arc::new(ResultAggregator::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        agg.add(outcome(t * 100 + i));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(agg.count(), 800);
        let mut seeds: Vec<u64> = agg.drain().into_iter().map(|o| o.seed).collect();
        seeds.sort_unstable();
        seeds.dedup();
        assert_eq!(seeds.len(), 800);
    }
}
