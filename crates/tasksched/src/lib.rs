//! Tasksched
//!
//! A task scheduler that runs posted closures on worker threads whose
//! environment matches the traits each task declares:
//! - **Traits**: priority tier and blocking-I/O permission (`TaskTraits`)
//! - **Runners**: parallel, sequenced and single-threaded execution modes
//!   (`TaskRunner`)
//! - **Scheduler**: tiered worker pools, delayed tasks, drain/join
//!   (`TaskScheduler`)
//!
//! # Example
//!
//! ```rust,ignore
//! use tasksched::{ExecutionMode, TaskPriority, TaskRunnerExt, TaskScheduler, TaskTraits};
//!
//! let scheduler = TaskScheduler::create()?;
//! let runner = scheduler.create_task_runner_with_traits(
//!     TaskTraits::new().with_priority(TaskPriority::UserVisible).with_file_io(),
//!     ExecutionMode::Sequenced,
//! );
//!
//! runner.post_task(|| println!("first"));
//! runner.post_task(|| println!("second"));
//!
//! scheduler.join_for_testing();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Scheduler configuration (pool bounds, thread naming, nice values)
pub mod config;

/// Error types
pub mod error;

/// Source-position tags attached to posted tasks
pub mod location;

/// Platform services: thread priority primitives
pub mod platform;

/// Scheduler: traits, sequences, worker pools, task runners
pub mod scheduler;

/// Per-thread blocking-I/O permission
pub mod thread_restrictions;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{PoolConfig, PoolsConfig, SchedulerConfig};
pub use error::{SchedulerError, SchedulerResult};
pub use location::Location;
pub use platform::{current_thread_priority, PlatformThread, ThreadPriority};
pub use scheduler::{
    ExecutionMode, LocationTally, ParallelTaskRunner, RunnerId, Runnable, SchedulerStats,
    SequenceToken, SequencedTaskRunner, SingleThreadTaskRunner, TaskId, TaskPriority, TaskRunner,
    TaskRunnerExt, TaskScheduler, TaskTraits,
};
pub use thread_restrictions::ScopedAllowIo;
