//! spingrid-scheduler: repetition dispatch and result aggregation.
//!
//! Splits a batch of annealing repetitions across whichever workers are
//! `READY`, keeps each worker's queue of outstanding calls bounded, and
//! collects the outcomes.
//!
//! # Architecture
//!
//! ```text
//! TaskDispatcher::spawn(n, params)
//!   ├── MembershipTable snapshot  (re-read every pass)
//!   ├── seed counter              (one atomic, unique seed per task)
//!   ├── PendingQueue per worker   (bound = threads × queue_multiplier)
//!   │     push: tokio task calling DispatchHandle::solve
//!   │     pop:  finished front → ResultAggregator
//!   └── retry queue               (seeds of failed / timed-out / orphaned slots)
//! ```
//!
//! A run always returns exactly `n` outcomes or an error; slots lost to a
//! failing worker are requeued with their original seed.

pub mod aggregator;
pub mod dispatcher;
pub mod error;
pub mod queue;

pub use aggregator::ResultAggregator;
pub use dispatcher::{DispatcherConfig, ResultSet, TaskDispatcher};
pub use error::{SchedulerError, SchedulerResult};
pub use queue::{Harvest, PendingQueue};
