//! Per-worker queue of outstanding repetition calls.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use spin_core::SolveOutcome;
use spingrid_membership::EndpointError;

/// A dispatched repetition awaiting its result.
pub type SolveTask = JoinHandle<Result<SolveOutcome, EndpointError>>;

struct Pending {
    seed: u64,
    task: SolveTask,
    timeout: Duration,
    /// Armed when the call reaches the front of the queue.
    deadline: Option<Instant>,
}

/// What popping the front of a queue produced.
#[derive(Debug)]
pub enum Harvest {
    Done(SolveOutcome),
    /// The call returned an error or the task died.
    Failed { seed: u64, error: String },
    /// The call outlived its deadline and was aborted.
    Expired { seed: u64 },
}

/// FIFO of outstanding calls to one worker.
///
/// Owned by the dispatch loop; nothing else touches it. Dropping the queue
/// aborts whatever is still outstanding.
///
/// A call's timeout counts from the moment it reaches the front, so calls
/// waiting behind others for a worker thread are not charged for the wait.
pub struct PendingQueue {
    entries: VecDeque<Pending>,
    bound: usize,
    admission: u64,
}

impl PendingQueue {
    pub fn new(bound: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            bound,
            admission: 0,
        }
    }

    /// Tag the queue with the worker admission it was filled for.
    pub fn with_admission(mut self, admission: u64) -> Self {
        self.admission = admission;
        self
    }

    pub fn admission(&self) -> u64 {
        self.admission
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Adjust the bound; a worker may report a different thread count after
    /// re-admission. Entries already queued are kept.
    pub fn set_bound(&mut self, bound: usize) {
        self.bound = bound;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_room(&self) -> bool {
        self.entries.len() < self.bound
    }

    /// Queue a call allowed `timeout` once it is at the front. Returns the
    /// task back if the queue is full.
    pub fn push(&mut self, seed: u64, task: SolveTask, timeout: Duration) -> Result<(), SolveTask> {
        if !self.has_room() {
            return Err(task);
        }
        self.entries.push_back(Pending {
            seed,
            task,
            timeout,
            deadline: None,
        });
        Ok(())
    }

    /// Pop the front if it finished or expired. `None` while it is still
    /// running within its deadline. The first poll that finds a call at the
    /// front starts its timeout.
    pub async fn poll_front(&mut self, now: Instant) -> Option<Harvest> {
        let front = self.entries.front_mut()?;
        if front.task.is_finished() {
            let Pending { seed, task, .. } = self.entries.pop_front()?;
            return Some(match task.await {
                Ok(Ok(outcome)) => Harvest::Done(outcome),
                Ok(Err(e)) => Harvest::Failed { seed, error: e.to_string() },
                Err(e) => Harvest::Failed { seed, error: e.to_string() },
            });
        }
        let deadline = *front.deadline.get_or_insert(now + front.timeout);
        if now >= deadline {
            let Pending { seed, task, .. } = self.entries.pop_front()?;
            task.abort();
            return Some(Harvest::Expired { seed });
        }
        None
    }

    /// Empty the queue of a worker that is gone. Finished calls keep their
    /// outcome; everything else is aborted and its seed returned for requeue.
    pub async fn abandon(&mut self) -> (Vec<SolveOutcome>, Vec<u64>) {
        let mut done = Vec::new();
        let mut lost = Vec::new();
        while let Some(Pending { seed, task, .. }) = self.entries.pop_front() {
            if task.is_finished() {
                match task.await {
                    Ok(Ok(outcome)) => done.push(outcome),
                    _ => lost.push(seed),
                }
            } else {
                task.abort();
                lost.push(seed);
            }
        }
        (done, lost)
    }
}

impl Drop for PendingQueue {
    fn drop(&mut self) {
        for p in &self.entries {
            p.task.abort();
        }
    }
}
