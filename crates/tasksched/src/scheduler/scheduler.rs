//! Main task scheduler coordinating worker pools

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::location::Location;
use crate::platform::{self, PlatformThread};
use crate::scheduler::dedicated::{DedicatedWorker, RetiredThreads};
use crate::scheduler::pool::{Executor, PostTarget, WorkerPool};
use crate::scheduler::profile::LocationTally;
use crate::scheduler::runner::{
    ParallelTaskRunner, SequencedTaskRunner, SingleThreadTaskRunner, TaskRunner,
};
use crate::scheduler::sequence::Sequence;
use crate::scheduler::task::{Runnable, Task};
use crate::scheduler::timer::DelayedTaskManager;
use crate::scheduler::tracker::{self, TaskTracker};
use crate::scheduler::traits::{ExecutionMode, PoolKey, TaskTraits};

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks accepted
    pub tasks_posted: u64,

    /// Tasks that ran (including ones that panicked)
    pub tasks_run: u64,

    /// Tasks refused because shutdown had begun
    pub tasks_rejected: u64,

    /// Tasks whose body panicked
    pub tasks_panicked: u64,

    /// Undelayed or ripe tasks not yet run
    pub tasks_outstanding: usize,

    /// Delayed tasks waiting for their due time
    pub delayed_pending: usize,

    /// Live worker threads across all pools
    pub worker_threads: usize,
}

/// State shared between the scheduler handle and its runners
pub(crate) struct SchedulerShared {
    config: SchedulerConfig,
    platform: Arc<dyn PlatformThread>,
    tracker: Arc<TaskTracker>,
    timer: Arc<DelayedTaskManager>,
    /// Indexed by `PoolKey::index`
    pools: Vec<Arc<WorkerPool>>,
    dedicated: Mutex<Vec<Weak<DedicatedWorker>>>,
    retired: Arc<RetiredThreads>,
    next_dedicated: AtomicUsize,
    /// Set once every thread has been joined
    joined: Mutex<bool>,
}

impl SchedulerShared {
    /// Shared pool serving `traits`
    pub fn pool_for(&self, traits: TaskTraits) -> Arc<dyn Executor> {
        let pool: Arc<dyn Executor> = self.pools[PoolKey::for_traits(traits).index()].clone();
        pool
    }

    fn dedicated_worker(&self, traits: TaskTraits) -> Arc<DedicatedWorker> {
        let key = PoolKey::for_traits(traits);
        let index = self.next_dedicated.fetch_add(1, Ordering::Relaxed);
        let label = format!("{}-single", key.label());
        let worker = Arc::new(DedicatedWorker::new(
            label.clone(),
            format!("{}-{}-{}", self.config.thread_name_prefix, label, index),
            key.environment(),
            Arc::clone(&self.tracker),
            Arc::clone(&self.platform),
            Arc::clone(&self.retired),
        ));

        let mut dedicated = self.dedicated.lock();
        dedicated.retain(|weak| weak.strong_count() > 0);
        dedicated.push(Arc::downgrade(&worker));
        worker
    }

    /// Accept `task` and route it to `target`, directly or through the timer
    pub fn post(&self, task: Task, target: PostTarget) -> SchedulerResult<()> {
        if !self.tracker.will_post(&task) {
            return Err(SchedulerError::ShutdownInProgress);
        }
        if task.is_delayed() {
            self.timer.add(task, target);
            return Ok(());
        }
        // On error the task stays queued; a later successful spawn runs it
        target.schedule(task)
    }

    fn worker_threads(&self) -> usize {
        let pooled: usize = self.pools.iter().map(|pool| pool.thread_count()).sum();
        let dedicated: usize = self
            .dedicated
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|worker| worker.thread_count())
            .sum();
        pooled + dedicated + self.retired.live_count()
    }

    fn shutdown(&self) {
        let mut joined = self.joined.lock();
        if *joined {
            return;
        }

        if self.tracker.start_shutdown() {
            tracing::info!("task scheduler shutting down");
        }
        self.timer.stop();
        for pool in &self.pools {
            pool.join();
        }
        let dedicated = std::mem::take(&mut *self.dedicated.lock());
        for worker in dedicated.iter().filter_map(Weak::upgrade) {
            worker.join();
        }
        self.tracker.did_discard(self.retired.join_all());

        *joined = true;
        tracing::info!(
            tasks_run = self.tracker.tasks_run(),
            tasks_panicked = self.tracker.tasks_panicked(),
            "task scheduler joined"
        );
    }
}

/// Main task scheduler.
///
/// Owns one lazily grown worker pool per (priority, I/O) pair plus the
/// delayed-task timer thread. Dropping the scheduler shuts it down.
pub struct TaskScheduler {
    shared: Arc<SchedulerShared>,
}

impl TaskScheduler {
    /// Create a scheduler with the default configuration
    pub fn create() -> SchedulerResult<Self> {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with `config` and the platform for this target
    pub fn with_config(config: SchedulerConfig) -> SchedulerResult<Self> {
        let platform = platform::default_platform(&config);
        Self::with_platform(config, platform)
    }

    /// Create a scheduler with explicit platform services
    pub fn with_platform(
        config: SchedulerConfig,
        platform: Arc<dyn PlatformThread>,
    ) -> SchedulerResult<Self> {
        let tracker = Arc::new(TaskTracker::new());
        let pools = PoolKey::all()
            .map(|key| {
                let pool_config = config.pools.get(key.priority, key.io_allowed);
                Arc::new(WorkerPool::new(
                    key.label(),
                    &config.thread_name_prefix,
                    key.environment(),
                    pool_config.max_threads,
                    Arc::clone(&tracker),
                    Arc::clone(&platform),
                ))
            })
            .collect::<Vec<_>>();
        debug_assert_eq!(pools.len(), PoolKey::COUNT);

        let timer = DelayedTaskManager::new();
        timer.start(
            format!("{}-timer", config.thread_name_prefix),
            Arc::clone(&tracker),
        )?;

        tracing::info!(
            platform = platform.name(),
            pools = pools.len(),
            "task scheduler started"
        );
        for pool in &pools {
            tracing::debug!(pool = pool.label(), max_threads = pool.max_threads(), "pool configured");
        }

        Ok(Self {
            shared: Arc::new(SchedulerShared {
                config,
                platform,
                tracker,
                timer,
                pools,
                dedicated: Mutex::new(Vec::new()),
                retired: Arc::new(RetiredThreads::default()),
                next_dedicated: AtomicUsize::new(0),
                joined: Mutex::new(false),
            }),
        })
    }

    // ========================================================================
    // Runners
    // ========================================================================

    /// Create a runner posting tasks with `traits` under `mode`
    pub fn create_task_runner_with_traits(
        &self,
        traits: TaskTraits,
        mode: ExecutionMode,
    ) -> Arc<dyn TaskRunner> {
        match mode {
            ExecutionMode::Parallel => self.create_parallel_task_runner(traits),
            ExecutionMode::Sequenced => self.create_sequenced_task_runner(traits),
            ExecutionMode::SingleThreaded => self.create_single_thread_task_runner(traits),
        }
    }

    /// Create a runner whose tasks may run concurrently in any order
    pub fn create_parallel_task_runner(&self, traits: TaskTraits) -> Arc<ParallelTaskRunner> {
        Arc::new(ParallelTaskRunner::new(traits, Arc::clone(&self.shared)))
    }

    /// Create a runner whose tasks run one at a time in post order
    pub fn create_sequenced_task_runner(&self, traits: TaskTraits) -> Arc<SequencedTaskRunner> {
        Arc::new(SequencedTaskRunner::new(traits, Arc::clone(&self.shared)))
    }

    /// Create a runner whose tasks run in post order on one dedicated thread
    pub fn create_single_thread_task_runner(
        &self,
        traits: TaskTraits,
    ) -> Arc<SingleThreadTaskRunner> {
        let worker = self.shared.dedicated_worker(traits);
        Arc::new(SingleThreadTaskRunner::new(
            traits,
            worker,
            Arc::clone(&self.shared),
        ))
    }

    // ========================================================================
    // Fire-and-forget posting
    // ========================================================================

    /// Post one parallel task. Returns false if shutdown has begun.
    ///
    /// # Panics
    ///
    /// Panics if the task was accepted but no worker thread could be started
    /// for it.
    pub fn post_task_with_traits(
        &self,
        location: Location,
        traits: TaskTraits,
        runnable: Runnable,
    ) -> bool {
        self.post_delayed_task_with_traits(location, traits, runnable, Duration::ZERO)
    }

    /// Post one parallel task to run no sooner than `delay` from now
    pub fn post_delayed_task_with_traits(
        &self,
        location: Location,
        traits: TaskTraits,
        runnable: Runnable,
        delay: Duration,
    ) -> bool {
        match self.try_post_delayed_task_with_traits(location, traits, runnable, delay) {
            Ok(()) => true,
            Err(SchedulerError::ShutdownInProgress) => false,
            Err(e) => panic!("task posted from {} cannot run: {}", location, e),
        }
    }

    /// Fallible form of [`post_task_with_traits`](Self::post_task_with_traits)
    pub fn try_post_task_with_traits(
        &self,
        location: Location,
        traits: TaskTraits,
        runnable: Runnable,
    ) -> SchedulerResult<()> {
        self.try_post_delayed_task_with_traits(location, traits, runnable, Duration::ZERO)
    }

    /// Fallible form of
    /// [`post_delayed_task_with_traits`](Self::post_delayed_task_with_traits)
    pub fn try_post_delayed_task_with_traits(
        &self,
        location: Location,
        traits: TaskTraits,
        runnable: Runnable,
        delay: Duration,
    ) -> SchedulerResult<()> {
        let task = Task::new(location, traits, runnable).with_delay(delay);
        let target = PostTarget::new(Arc::new(Sequence::new()), self.shared.pool_for(traits));
        self.shared.post(task, target)
    }

    // ========================================================================
    // Draining and shutdown
    // ========================================================================

    /// Block until every accepted undelayed task (and every delayed task that
    /// already ripened) has run. Does not shut down.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a task.
    pub fn flush_for_testing(&self) {
        assert_not_in_task("flush_for_testing");
        self.shared.tracker.flush();
    }

    /// Like [`flush_for_testing`](Self::flush_for_testing) but gives up
    /// after `timeout`. Returns whether everything ran.
    pub fn flush_for_testing_timeout(&self, timeout: Duration) -> bool {
        assert_not_in_task("flush_for_testing_timeout");
        self.shared.tracker.flush_timeout(timeout)
    }

    /// Drain undelayed work, then shut down and join every thread.
    ///
    /// Delayed tasks that are not yet due never run.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a task.
    pub fn join_for_testing(&self) {
        assert_not_in_task("join_for_testing");
        self.shared.tracker.flush();
        self.shared.shutdown();
    }

    /// Stop accepting tasks, discard queued ones and join every thread.
    /// Idempotent.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a task.
    pub fn shutdown(&self) {
        assert_not_in_task("shutdown");
        self.shared.shutdown();
    }

    /// Whether shutdown has begun
    pub fn is_shutdown(&self) -> bool {
        self.shared.tracker.is_shutdown()
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let tracker = &self.shared.tracker;
        SchedulerStats {
            tasks_posted: tracker.tasks_posted(),
            tasks_run: tracker.tasks_run(),
            tasks_rejected: tracker.tasks_rejected(),
            tasks_panicked: tracker.tasks_panicked(),
            tasks_outstanding: tracker.outstanding(),
            delayed_pending: self.shared.timer.pending_count(),
            worker_threads: self.shared.worker_threads(),
        }
    }

    /// Per-location post and run tallies, most-run first
    pub fn profile_snapshot(&self) -> Vec<(Location, LocationTally)> {
        self.shared.tracker.profile_snapshot()
    }

    /// Configuration this scheduler was built with
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if tracker::current_task().is_some() {
            // Joining from a worker would wait on ourselves
            self.shared.tracker.start_shutdown();
            tracing::error!("task scheduler dropped from inside a task; threads left unjoined");
            return;
        }
        self.shared.shutdown();
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("platform", &self.shared.platform.name())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[track_caller]
fn assert_not_in_task(operation: &str) {
    assert!(
        tracker::current_task().is_none(),
        "TaskScheduler::{} must not be called from inside a task",
        operation
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PortableThreadPriority;
    use crate::scheduler::runner::TaskRunnerExt;
    use crate::scheduler::TaskPriority;

    fn scheduler() -> TaskScheduler {
        TaskScheduler::with_platform(
            SchedulerConfig::default()
                .with_max_threads(2)
                .with_thread_name_prefix("sched-test"),
            Arc::new(PortableThreadPriority),
        )
        .unwrap()
    }

    #[test]
    fn test_scheduler_creation() {
        let scheduler = scheduler();
        let stats = scheduler.stats();
        assert_eq!(stats.tasks_posted, 0);
        assert_eq!(stats.worker_threads, 0);
        assert!(!scheduler.is_shutdown());
    }

    #[test]
    fn test_pools_start_empty_and_grow_on_demand() {
        let scheduler = scheduler();
        let traits = TaskTraits::new().with_priority(TaskPriority::UserBlocking);
        assert!(scheduler.post_task_with_traits(Location::caller(), traits, Box::new(|| {})));
        scheduler.flush_for_testing();

        let grown: Vec<_> = scheduler
            .shared
            .pools
            .iter()
            .filter(|pool| pool.thread_count() > 0)
            .map(|pool| pool.label().to_string())
            .collect();
        assert_eq!(grown, vec!["user-blocking".to_string()]);
        scheduler.join_for_testing();
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let scheduler = scheduler();
        scheduler.shutdown();
        scheduler.shutdown();
        assert!(scheduler.is_shutdown());
        assert_eq!(scheduler.stats().worker_threads, 0);
    }

    #[test]
    fn test_try_post_after_shutdown() {
        let scheduler = scheduler();
        let runner = scheduler.create_sequenced_task_runner(TaskTraits::new());
        scheduler.shutdown();

        assert!(matches!(
            runner.try_post_task(|| {}),
            Err(SchedulerError::ShutdownInProgress)
        ));
        assert_eq!(scheduler.stats().tasks_rejected, 1);
    }

    #[test]
    fn test_dedicated_workers_are_joined() {
        let scheduler = scheduler();
        let kept = scheduler.create_single_thread_task_runner(TaskTraits::new());
        let dropped = scheduler.create_single_thread_task_runner(TaskTraits::new().with_file_io());
        assert!(kept.post_task(|| {}));
        assert!(dropped.post_task(|| {}));
        scheduler.flush_for_testing();
        drop(dropped);

        scheduler.join_for_testing();
        assert_eq!(scheduler.stats().worker_threads, 0);
        assert!(!kept.post_task(|| {}));
    }

    #[test]
    fn test_join_from_task_is_refused() {
        let tracker = TaskTracker::new();
        let task = Task::new(
            Location::caller(),
            TaskTraits::new(),
            Box::new(|| assert_not_in_task("join_for_testing")),
        );
        tracker.will_post(&task);
        tracker.run_task(task, PoolKey::for_traits(TaskTraits::new()).environment());
        assert_eq!(tracker.tasks_panicked(), 1);

        // Outside a task the check passes
        assert_not_in_task("join_for_testing");
    }
}
