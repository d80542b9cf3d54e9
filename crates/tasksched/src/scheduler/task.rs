//! Task structure

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::location::Location;
use crate::scheduler::{SequenceToken, TaskTraits};

/// Work carried by a task
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a task runner
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RunnerId(u64);

static NEXT_RUNNER_ID: AtomicU64 = AtomicU64::new(1);

impl RunnerId {
    /// Generate a new unique RunnerId
    pub fn new() -> Self {
        RunnerId(NEXT_RUNNER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Runner of the task running on the current thread, if any
    pub fn current() -> Option<RunnerId> {
        crate::scheduler::tracker::current_task().and_then(|current| current.runner)
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for RunnerId {
    fn default() -> Self {
        Self::new()
    }
}

/// One unit of posted work plus its execution requirements.
///
/// Immutable once built; the runnable is consumed by `Task::into_runnable`
/// when a worker runs it.
pub struct Task {
    id: TaskId,
    runnable: Runnable,
    traits: TaskTraits,
    location: Location,
    runner: Option<RunnerId>,
    sequence_token: Option<SequenceToken>,
    posted_at: Instant,
    delay: Duration,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("traits", &self.traits)
            .field("location", &self.location)
            .field("runner", &self.runner)
            .field("sequence_token", &self.sequence_token)
            .field("delay", &self.delay)
            .finish()
    }
}

impl Task {
    /// Create a task posted now
    pub(crate) fn new(location: Location, traits: TaskTraits, runnable: Runnable) -> Self {
        Self {
            id: TaskId::new(),
            runnable,
            traits,
            location,
            runner: None,
            sequence_token: None,
            posted_at: Instant::now(),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_runner(mut self, runner: RunnerId) -> Self {
        self.runner = Some(runner);
        self
    }

    pub(crate) fn with_sequence_token(mut self, token: SequenceToken) -> Self {
        self.sequence_token = Some(token);
        self
    }

    /// Task ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Declared traits
    pub fn traits(&self) -> TaskTraits {
        self.traits
    }

    /// Posting site
    pub fn location(&self) -> Location {
        self.location
    }

    /// Runner the task was posted through
    pub fn runner(&self) -> Option<RunnerId> {
        self.runner
    }

    /// Sequence the task belongs to, for sequenced and single-threaded runners
    pub fn sequence_token(&self) -> Option<SequenceToken> {
        self.sequence_token
    }

    /// When the task was posted
    pub fn posted_at(&self) -> Instant {
        self.posted_at
    }

    /// Requested delay
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether the task must wait before becoming runnable
    pub fn is_delayed(&self) -> bool {
        !self.delay.is_zero()
    }

    /// Earliest instant the task may start, or None if the delay reaches
    /// past any representable instant and the task never becomes due
    pub fn run_at(&self) -> Option<Instant> {
        self.posted_at.checked_add(self.delay)
    }

    pub(crate) fn into_runnable(self) -> Runnable {
        self.runnable
    }
}
