//! Task scheduler
//!
//! Callers post closures through a [`TaskRunner`]. The scheduler routes each
//! task to the worker pool whose threads match the task's [`TaskTraits`]
//! (priority tier and blocking-I/O permission). A timer thread holds delayed
//! tasks until they are due.

mod dedicated;
mod pool;
mod profile;
mod runner;
#[allow(clippy::module_inception)]
mod scheduler;
mod sequence;
mod task;
mod timer;
pub(crate) mod tracker;
mod traits;
mod worker;

pub use profile::LocationTally;
pub use runner::{
    ParallelTaskRunner, SequencedTaskRunner, SingleThreadTaskRunner, TaskRunner, TaskRunnerExt,
};
pub use scheduler::{SchedulerStats, TaskScheduler};
pub use sequence::SequenceToken;
pub use task::{Runnable, RunnerId, TaskId};
pub use traits::{ExecutionMode, TaskPriority, TaskTraits};
