//! Task traits and execution modes

use std::fmt;

use serde::Deserialize;

use crate::platform::ThreadPriority;

/// Priority tier of a task. Ordered: `Background` is the lowest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Work the user won't notice if it is delayed
    #[default]
    Background,
    /// Work whose result the user will eventually see
    UserVisible,
    /// Work the user is actively waiting on
    UserBlocking,
}

impl TaskPriority {
    /// Lowest priority tier
    pub const LOWEST: TaskPriority = TaskPriority::Background;

    /// Highest priority tier
    pub const HIGHEST: TaskPriority = TaskPriority::UserBlocking;

    /// All tiers, lowest first
    pub const ALL: [TaskPriority; 3] = [
        TaskPriority::Background,
        TaskPriority::UserVisible,
        TaskPriority::UserBlocking,
    ];

    /// Thread priority a worker must have to run tasks of this tier
    pub fn thread_priority(self) -> ThreadPriority {
        match self {
            TaskPriority::Background => ThreadPriority::Background,
            TaskPriority::UserVisible | TaskPriority::UserBlocking => ThreadPriority::Normal,
        }
    }

    /// Short label used in thread names and logs
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Background => "background",
            TaskPriority::UserVisible => "user-visible",
            TaskPriority::UserBlocking => "user-blocking",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution requirements of a task.
///
/// Built fluently; the default is the lowest priority with blocking I/O
/// disallowed.
///
/// ```rust,ignore
/// let traits = TaskTraits::new().with_priority(TaskPriority::UserBlocking).with_file_io();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TaskTraits {
    priority: TaskPriority,
    with_file_io: bool,
}

impl TaskTraits {
    /// Lowest priority, no blocking I/O
    pub const fn new() -> Self {
        Self {
            priority: TaskPriority::LOWEST,
            with_file_io: false,
        }
    }

    /// Set the priority tier
    pub const fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Allow blocking file I/O while the task runs
    pub const fn with_file_io(mut self) -> Self {
        self.with_file_io = true;
        self
    }

    /// Priority tier
    pub const fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Whether the task may block on I/O
    pub const fn allows_blocking_io(&self) -> bool {
        self.with_file_io
    }
}

impl fmt::Display for TaskTraits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.with_file_io {
            write!(f, "{}+io", self.priority)
        } else {
            write!(f, "{}", self.priority)
        }
    }
}

/// Concurrency and ordering contract of a task runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Tasks may run concurrently, in any order
    Parallel,
    /// Tasks run one at a time in post order, on any worker
    Sequenced,
    /// Tasks run one at a time in post order, always on the same thread
    SingleThreaded,
}

impl ExecutionMode {
    /// All modes
    pub const ALL: [ExecutionMode; 3] = [
        ExecutionMode::Parallel,
        ExecutionMode::Sequenced,
        ExecutionMode::SingleThreaded,
    ];
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Parallel => f.write_str("parallel"),
            ExecutionMode::Sequenced => f.write_str("sequenced"),
            ExecutionMode::SingleThreaded => f.write_str("single-threaded"),
        }
    }
}

/// Pool identity: (priority tier, I/O policy)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PoolKey {
    pub priority: TaskPriority,
    pub io_allowed: bool,
}

impl PoolKey {
    pub const COUNT: usize = 6;

    pub fn for_traits(traits: TaskTraits) -> Self {
        Self {
            priority: traits.priority(),
            io_allowed: traits.allows_blocking_io(),
        }
    }

    pub fn all() -> impl Iterator<Item = PoolKey> {
        TaskPriority::ALL.into_iter().flat_map(|priority| {
            [false, true].into_iter().map(move |io_allowed| PoolKey {
                priority,
                io_allowed,
            })
        })
    }

    /// Dense index into the scheduler's pool table, matching `all()` order
    pub fn index(self) -> usize {
        self.priority as usize * 2 + usize::from(self.io_allowed)
    }

    pub fn environment(self) -> ThreadEnvironment {
        ThreadEnvironment {
            priority: self.priority.thread_priority(),
            io_allowed: self.io_allowed,
        }
    }

    pub fn label(self) -> String {
        if self.io_allowed {
            format!("{}-io", self.priority)
        } else {
            self.priority.to_string()
        }
    }
}

/// Environment a worker thread establishes before running a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ThreadEnvironment {
    pub priority: ThreadPriority,
    pub io_allowed: bool,
}

impl ThreadEnvironment {
    pub fn matches(&self, traits: TaskTraits) -> bool {
        self.priority == traits.priority().thread_priority()
            && self.io_allowed == traits.allows_blocking_io()
    }
}
