//! Task runners: the caller-facing posting handles
//!
//! Every runner routes its tasks to the pool matching its traits. What
//! differs is how tasks are grouped into sequences:
//!
//! | Runner                     | Sequence             | Threads                   |
//! |----------------------------|----------------------|---------------------------|
//! | [`ParallelTaskRunner`]     | a fresh one per task | any worker of the pool    |
//! | [`SequencedTaskRunner`]    | one for the runner   | any worker, one at a time |
//! | [`SingleThreadTaskRunner`] | one for the runner   | one dedicated thread      |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{SchedulerError, SchedulerResult};
use crate::location::Location;
use crate::scheduler::dedicated::DedicatedWorker;
use crate::scheduler::pool::{Executor, PostTarget};
use crate::scheduler::scheduler::SchedulerShared;
use crate::scheduler::sequence::Sequence;
use crate::scheduler::task::{RunnerId, Runnable, Task};
use crate::scheduler::{ExecutionMode, SequenceToken, TaskTraits};

/// Handle that accepts tasks under one execution mode and one set of traits.
///
/// Runners are shared as `Arc<dyn TaskRunner>` and may be used from any
/// thread, including from inside their own tasks.
pub trait TaskRunner: Send + Sync + fmt::Debug {
    /// Post `runnable` to run no sooner than `delay` from now.
    ///
    /// Returns [`SchedulerError::ShutdownInProgress`] if the scheduler no
    /// longer accepts tasks, or [`SchedulerError::WorkerSpawn`] if no thread
    /// could be started to run it.
    fn try_post_delayed_task_at(
        &self,
        location: Location,
        runnable: Runnable,
        delay: Duration,
    ) -> SchedulerResult<()>;

    /// Whether the calling thread is currently inside this runner's turn
    fn runs_tasks_on_current_thread(&self) -> bool;

    /// Traits every task of this runner carries
    fn traits(&self) -> TaskTraits;

    /// Execution mode of this runner
    fn execution_mode(&self) -> ExecutionMode;

    /// Identity of this runner
    fn id(&self) -> RunnerId;

    /// Post `runnable` with a delay. Returns false if the scheduler is
    /// shutting down; the task is then discarded.
    ///
    /// # Panics
    ///
    /// Panics if the task was accepted but no worker thread could be started
    /// for it.
    fn post_delayed_task_at(&self, location: Location, runnable: Runnable, delay: Duration) -> bool {
        match self.try_post_delayed_task_at(location, runnable, delay) {
            Ok(()) => true,
            Err(SchedulerError::ShutdownInProgress) => false,
            Err(e) => panic!("task posted from {} cannot run: {}", location, e),
        }
    }

    /// Post `runnable` to run as soon as possible. See
    /// [`post_delayed_task_at`](TaskRunner::post_delayed_task_at).
    fn post_task_at(&self, location: Location, runnable: Runnable) -> bool {
        self.post_delayed_task_at(location, runnable, Duration::ZERO)
    }

    /// Fallible form of [`post_task_at`](TaskRunner::post_task_at)
    fn try_post_task_at(&self, location: Location, runnable: Runnable) -> SchedulerResult<()> {
        self.try_post_delayed_task_at(location, runnable, Duration::ZERO)
    }
}

/// Closure-taking conveniences that tag tasks with the caller's location
pub trait TaskRunnerExt: TaskRunner {
    /// Post `f`. Returns false if the scheduler is shutting down.
    #[track_caller]
    fn post_task<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_task_at(Location::caller(), Box::new(f))
    }

    /// Post `f` to run no sooner than `delay` from now
    #[track_caller]
    fn post_delayed_task<F>(&self, f: F, delay: Duration) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_delayed_task_at(Location::caller(), Box::new(f), delay)
    }

    /// Post `f`, returning why it was refused
    #[track_caller]
    fn try_post_task<F>(&self, f: F) -> SchedulerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.try_post_task_at(Location::caller(), Box::new(f))
    }
}

impl<T: TaskRunner + ?Sized> TaskRunnerExt for T {}

// ============================================================================
// Parallel
// ============================================================================

/// Runs each task independently on any worker of its pool
pub struct ParallelTaskRunner {
    id: RunnerId,
    traits: TaskTraits,
    executor: Arc<dyn Executor>,
    shared: Arc<SchedulerShared>,
}

impl ParallelTaskRunner {
    pub(crate) fn new(traits: TaskTraits, shared: Arc<SchedulerShared>) -> Self {
        Self {
            id: RunnerId::new(),
            traits,
            executor: shared.pool_for(traits),
            shared,
        }
    }
}

impl TaskRunner for ParallelTaskRunner {
    fn try_post_delayed_task_at(
        &self,
        location: Location,
        runnable: Runnable,
        delay: Duration,
    ) -> SchedulerResult<()> {
        let task = Task::new(location, self.traits, runnable)
            .with_delay(delay)
            .with_runner(self.id);
        let target = PostTarget::new(Arc::new(Sequence::new()), Arc::clone(&self.executor));
        self.shared.post(task, target)
    }

    fn runs_tasks_on_current_thread(&self) -> bool {
        RunnerId::current() == Some(self.id)
    }

    fn traits(&self) -> TaskTraits {
        self.traits
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Parallel
    }

    fn id(&self) -> RunnerId {
        self.id
    }
}

impl fmt::Debug for ParallelTaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelTaskRunner")
            .field("id", &self.id)
            .field("traits", &self.traits)
            .finish()
    }
}

// ============================================================================
// Sequenced
// ============================================================================

/// Runs tasks one at a time in post order, on whichever worker is free
pub struct SequencedTaskRunner {
    id: RunnerId,
    traits: TaskTraits,
    target: PostTarget,
    token: SequenceToken,
    shared: Arc<SchedulerShared>,
}

impl SequencedTaskRunner {
    pub(crate) fn new(traits: TaskTraits, shared: Arc<SchedulerShared>) -> Self {
        let sequence = Arc::new(Sequence::new());
        let token = sequence.token();
        Self {
            id: RunnerId::new(),
            traits,
            target: PostTarget::new(sequence, shared.pool_for(traits)),
            token,
            shared,
        }
    }

    /// Token of this runner's sequence
    pub fn sequence_token(&self) -> SequenceToken {
        self.token
    }
}

impl TaskRunner for SequencedTaskRunner {
    fn try_post_delayed_task_at(
        &self,
        location: Location,
        runnable: Runnable,
        delay: Duration,
    ) -> SchedulerResult<()> {
        let task = Task::new(location, self.traits, runnable)
            .with_delay(delay)
            .with_runner(self.id)
            .with_sequence_token(self.token);
        self.shared.post(task, self.target.clone())
    }

    fn runs_tasks_on_current_thread(&self) -> bool {
        SequenceToken::current() == Some(self.token)
    }

    fn traits(&self) -> TaskTraits {
        self.traits
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Sequenced
    }

    fn id(&self) -> RunnerId {
        self.id
    }
}

impl fmt::Debug for SequencedTaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequencedTaskRunner")
            .field("id", &self.id)
            .field("traits", &self.traits)
            .field("sequence", &self.token)
            .finish()
    }
}

// ============================================================================
// Single-threaded
// ============================================================================

/// Runs tasks one at a time in post order, always on the same thread
pub struct SingleThreadTaskRunner {
    id: RunnerId,
    traits: TaskTraits,
    target: PostTarget,
    token: SequenceToken,
    worker: Arc<DedicatedWorker>,
    shared: Arc<SchedulerShared>,
}

impl SingleThreadTaskRunner {
    pub(crate) fn new(
        traits: TaskTraits,
        worker: Arc<DedicatedWorker>,
        shared: Arc<SchedulerShared>,
    ) -> Self {
        let sequence = Arc::new(Sequence::new());
        let token = sequence.token();
        let executor: Arc<dyn Executor> = worker.clone();
        Self {
            id: RunnerId::new(),
            traits,
            target: PostTarget::new(sequence, executor),
            token,
            worker,
            shared,
        }
    }

    /// Token of this runner's sequence
    pub fn sequence_token(&self) -> SequenceToken {
        self.token
    }
}

impl TaskRunner for SingleThreadTaskRunner {
    fn try_post_delayed_task_at(
        &self,
        location: Location,
        runnable: Runnable,
        delay: Duration,
    ) -> SchedulerResult<()> {
        let task = Task::new(location, self.traits, runnable)
            .with_delay(delay)
            .with_runner(self.id)
            .with_sequence_token(self.token);
        self.shared.post(task, self.target.clone())
    }

    fn runs_tasks_on_current_thread(&self) -> bool {
        self.worker.is_current_thread()
    }

    fn traits(&self) -> TaskTraits {
        self.traits
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::SingleThreaded
    }

    fn id(&self) -> RunnerId {
        self.id
    }
}

impl fmt::Debug for SingleThreadTaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleThreadTaskRunner")
            .field("id", &self.id)
            .field("traits", &self.traits)
            .field("sequence", &self.token)
            .field("thread", &self.worker.label())
            .finish()
    }
}
