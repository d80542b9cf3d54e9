//! Worker pools
//!
//! Two strategies sit behind [`Executor`]:
//! - [`WorkerPool`]: shared by parallel and sequenced runners of one
//!   (priority, I/O) pair; grows lazily up to its bound.
//! - [`DedicatedWorker`](crate::scheduler::dedicated::DedicatedWorker): one
//!   pinned thread owned by a single-threaded runner.
//!
//! Both feed their threads through a [`ReadyQueue`] of sequences.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};

use crate::error::{SchedulerError, SchedulerResult};
use crate::platform::PlatformThread;
use crate::scheduler::sequence::Sequence;
use crate::scheduler::task::Task;
use crate::scheduler::tracker::TaskTracker;
use crate::scheduler::traits::ThreadEnvironment;
use crate::scheduler::worker::WorkerThread;

/// Where ready sequences are sent for execution
pub(crate) trait Executor: Send + Sync {
    /// Queue a sequence that just became ready.
    ///
    /// The sequence is always queued. An error means no thread exists to run
    /// it and none could be started; it runs once a later call manages to
    /// start one.
    fn enqueue_sequence(&self, sequence: Arc<Sequence>) -> SchedulerResult<()>;

    /// Stop every thread and wait for them to exit. Queued work is dropped.
    fn join(&self);

    /// Live worker threads
    fn thread_count(&self) -> usize;

    /// Pool label for logs and thread names
    fn label(&self) -> &str;
}

/// A sequence paired with the executor that runs it
#[derive(Clone)]
pub(crate) struct PostTarget {
    sequence: Arc<Sequence>,
    executor: Arc<dyn Executor>,
}

impl PostTarget {
    pub fn new(sequence: Arc<Sequence>, executor: Arc<dyn Executor>) -> Self {
        Self { sequence, executor }
    }

    /// Push an accepted, due task into its sequence; queue the sequence if
    /// this push made it ready.
    pub fn schedule(&self, task: Task) -> SchedulerResult<()> {
        if self.sequence.push_task(task) {
            self.executor.enqueue_sequence(Arc::clone(&self.sequence))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Ready queue
// ============================================================================

struct QueueState {
    /// Threads blocked in `pop`
    idle: usize,
    /// Notifications sent but not yet consumed by a waking thread
    wakeups: usize,
    shutdown: bool,
    /// Exit once empty (dedicated worker whose runner is gone)
    retired: bool,
}

/// Multi-producer, multi-consumer queue of ready sequences
pub(crate) struct ReadyQueue {
    injector: Injector<Arc<Sequence>>,
    state: Mutex<QueueState>,
    available: Condvar,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            injector: Injector::new(),
            state: Mutex::new(QueueState {
                idle: 0,
                wakeups: 0,
                shutdown: false,
                retired: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Push a sequence. Returns true if an idle thread was woken for it.
    pub fn push(&self, sequence: Arc<Sequence>) -> bool {
        self.injector.push(sequence);
        // Taking the lock after pushing closes the race with a thread that
        // found the injector empty and is about to wait.
        let mut state = self.state.lock();
        if state.idle > state.wakeups {
            state.wakeups += 1;
            self.available.notify_one();
            true
        } else {
            false
        }
    }

    /// Block until a sequence is available. Returns None when the calling
    /// thread must exit.
    pub fn pop(&self) -> Option<Arc<Sequence>> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(sequence) = self.steal() {
                return Some(sequence);
            }
            if state.retired {
                return None;
            }

            state.idle += 1;
            self.available.wait(&mut state);
            state.idle -= 1;
            state.wakeups = state.wakeups.saturating_sub(1);
        }
    }

    fn steal(&self) -> Option<Arc<Sequence>> {
        loop {
            match self.injector.steal() {
                Steal::Success(sequence) => return Some(sequence),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Wake every thread and make them exit
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.available.notify_all();
    }

    /// Let threads exit once the queue is empty
    pub fn retire(&self) {
        let mut state = self.state.lock();
        state.retired = true;
        self.available.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Drop every queued sequence and its tasks. Returns the task count.
    ///
    /// Only called once no thread pops from this queue any more; tasks may
    /// hold runners that hold their sequence, so leaving them would leak.
    pub fn discard(&self) -> usize {
        let mut tasks = 0;
        while let Some(sequence) = self.steal() {
            tasks += sequence.clear();
        }
        tasks
    }

    /// Threads waiting for work that no pending notification targets
    #[cfg(test)]
    pub fn idle_threads(&self) -> usize {
        let state = self.state.lock();
        state.idle - state.wakeups.min(state.idle)
    }

    pub fn len(&self) -> usize {
        self.injector.len()
    }
}

// ============================================================================
// Shared worker pool
// ============================================================================

/// Lazily grown pool serving one (priority, I/O) pair
pub(crate) struct WorkerPool {
    label: String,
    thread_name_prefix: String,
    env: ThreadEnvironment,
    max_threads: usize,
    queue: Arc<ReadyQueue>,
    tracker: Arc<TaskTracker>,
    platform: Arc<dyn PlatformThread>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        label: String,
        thread_name_prefix: &str,
        env: ThreadEnvironment,
        max_threads: usize,
        tracker: Arc<TaskTracker>,
        platform: Arc<dyn PlatformThread>,
    ) -> Self {
        Self {
            label,
            thread_name_prefix: thread_name_prefix.to_string(),
            env,
            max_threads: max_threads.max(1),
            queue: Arc::new(ReadyQueue::new()),
            tracker,
            platform,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Start one more worker if the pool is below its bound
    fn maybe_grow(&self) -> SchedulerResult<()> {
        let mut workers = self.workers.lock();
        if workers.len() >= self.max_threads || self.queue.is_shutdown() {
            return Ok(());
        }

        let index = workers.len();
        let worker = WorkerThread::new(
            format!("{}-{}-{}", self.thread_name_prefix, self.label, index),
            self.env,
            Arc::clone(&self.queue),
            Arc::clone(&self.tracker),
            Arc::clone(&self.platform),
        );
        match worker.spawn() {
            Ok(handle) => {
                workers.push(handle);
                tracing::debug!(
                    pool = %self.label,
                    threads = workers.len(),
                    queued = self.queue.len(),
                    "worker pool grew"
                );
                Ok(())
            }
            Err(source) if workers.is_empty() => {
                tracing::error!(pool = %self.label, error = %source, "failed to spawn first worker");
                Err(SchedulerError::WorkerSpawn {
                    pool: self.label.clone(),
                    source,
                })
            }
            Err(source) => {
                tracing::warn!(
                    pool = %self.label,
                    threads = workers.len(),
                    error = %source,
                    "failed to grow worker pool; existing workers will drain the queue"
                );
                Ok(())
            }
        }
    }
}

impl Executor for WorkerPool {
    fn enqueue_sequence(&self, sequence: Arc<Sequence>) -> SchedulerResult<()> {
        if self.queue.push(sequence) {
            return Ok(());
        }
        self.maybe_grow()
    }

    fn join(&self) {
        self.queue.shutdown();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!(pool = %self.label, "worker thread panicked");
            }
        }

        let discarded = self.queue.discard();
        if discarded > 0 {
            tracing::debug!(pool = %self.label, discarded, "dropped queued tasks at shutdown");
        }
        self.tracker.did_discard(discarded);
    }

    fn thread_count(&self) -> usize {
        self.workers.lock().len()
    }

    fn label(&self) -> &str {
        &self.label
    }
}
