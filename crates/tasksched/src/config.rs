//! Scheduler configuration
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! thread_name_prefix = "app"
//! background_nice = 10
//!
//! [pools.user_visible]
//! max_threads = 8
//!
//! [pools.background_io]
//! max_threads = 2
//! ```

use serde::Deserialize;

use crate::error::SchedulerResult;
use crate::scheduler::TaskPriority;

/// Bounds for one worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of worker threads (0 is treated as 1)
    pub max_threads: usize,
}

impl PoolConfig {
    /// Pool bounded at `max_threads`
    pub const fn new(max_threads: usize) -> Self {
        Self { max_threads }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

/// One [`PoolConfig`] per (priority tier, I/O policy) pair
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolsConfig {
    /// Background tasks without blocking I/O
    pub background: PoolConfig,
    /// Background tasks that may block on I/O
    pub background_io: PoolConfig,
    /// User-visible tasks without blocking I/O
    pub user_visible: PoolConfig,
    /// User-visible tasks that may block on I/O
    pub user_visible_io: PoolConfig,
    /// User-blocking tasks without blocking I/O
    pub user_blocking: PoolConfig,
    /// User-blocking tasks that may block on I/O
    pub user_blocking_io: PoolConfig,
}

impl PoolsConfig {
    /// Every pool bounded at `max_threads`
    pub fn uniform(max_threads: usize) -> Self {
        let pool = PoolConfig::new(max_threads);
        Self {
            background: pool,
            background_io: pool,
            user_visible: pool,
            user_visible_io: pool,
            user_blocking: pool,
            user_blocking_io: pool,
        }
    }

    /// Config of the pool serving `priority` with the given I/O policy
    pub fn get(&self, priority: TaskPriority, io_allowed: bool) -> PoolConfig {
        match (priority, io_allowed) {
            (TaskPriority::Background, false) => self.background,
            (TaskPriority::Background, true) => self.background_io,
            (TaskPriority::UserVisible, false) => self.user_visible,
            (TaskPriority::UserVisible, true) => self.user_visible_io,
            (TaskPriority::UserBlocking, false) => self.user_blocking,
            (TaskPriority::UserBlocking, true) => self.user_blocking_io,
        }
    }
}

impl Default for PoolsConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            background: PoolConfig::new(cpus.div_ceil(4).max(1)),
            background_io: PoolConfig::new(cpus.div_ceil(2).max(2)),
            user_visible: PoolConfig::new(cpus.max(2)),
            user_visible_io: PoolConfig::new((cpus * 2).max(4)),
            user_blocking: PoolConfig::new(cpus.max(2)),
            user_blocking_io: PoolConfig::new((cpus * 2).max(4)),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Prefix for worker thread names
    pub thread_name_prefix: String,
    /// Nice value applied to background threads (Linux)
    pub background_nice: i32,
    /// Per-pool thread bounds
    pub pools: PoolsConfig,
}

impl SchedulerConfig {
    /// Parse a config from TOML; missing fields take their defaults
    pub fn from_toml_str(source: &str) -> SchedulerResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Bound every pool at `max_threads`
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.pools = PoolsConfig::uniform(max_threads);
        self
    }

    /// Set the worker thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "tasksched".to_string(),
            background_nice: 10,
            pools: PoolsConfig::default(),
        }
    }
}
