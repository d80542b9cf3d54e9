//! Scheduler error types.

/// Errors surfaced by the scheduler.
///
/// Posting APIs that mirror the boolean "accepted" contract collapse
/// `ShutdownInProgress` into `false`; the `try_*` variants return it as is.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The scheduler has begun shutting down; the task was discarded
    #[error("scheduler is shutting down; task discarded")]
    ShutdownInProgress,

    /// A worker thread could not be created and the pool has no thread to
    /// fall back on
    #[error("failed to spawn worker thread for pool {pool}: {source}")]
    WorkerSpawn {
        /// Label of the pool that tried to grow
        pool: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The delayed-task timer thread could not be created
    #[error("failed to spawn delayed-task timer thread: {0}")]
    TimerSpawn(#[source] std::io::Error),

    /// Invalid scheduler configuration
    #[error("invalid scheduler configuration: {0}")]
    Config(#[from] toml::de::Error),
}

/// Scheduler result type
pub type SchedulerResult<T> = Result<T, SchedulerError>;
