//! Dedicated single-thread workers
//!
//! Each single-threaded runner owns one `DedicatedWorker`. Its thread is
//! started on the first post and serves only that runner's sequence. When
//! the runner goes away the thread drains what is queued and exits; the
//! scheduler joins it at shutdown.

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::error::{SchedulerError, SchedulerResult};
use crate::platform::PlatformThread;
use crate::scheduler::pool::{Executor, ReadyQueue};
use crate::scheduler::sequence::Sequence;
use crate::scheduler::tracker::TaskTracker;
use crate::scheduler::traits::ThreadEnvironment;
use crate::scheduler::worker::WorkerThread;

/// Threads of dropped runners, kept until shutdown joins them
#[derive(Default)]
pub(crate) struct RetiredThreads {
    threads: Mutex<Vec<(Arc<ReadyQueue>, JoinHandle<()>)>>,
}

impl RetiredThreads {
    pub fn push(&self, queue: Arc<ReadyQueue>, handle: JoinHandle<()>) {
        let mut threads = self.threads.lock();
        threads.retain(|(_, handle)| !handle.is_finished());
        threads.push((queue, handle));
    }

    /// Stop and join every retired thread. Returns the count of queued tasks
    /// dropped unrun.
    pub fn join_all(&self) -> usize {
        let threads = std::mem::take(&mut *self.threads.lock());
        let mut discarded = 0;
        for (queue, handle) in threads {
            queue.shutdown();
            if handle.join().is_err() {
                tracing::error!("retired dedicated thread panicked");
            }
            discarded += queue.discard();
        }
        discarded
    }

    /// Retired threads still running
    pub fn live_count(&self) -> usize {
        self.threads
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }
}

/// One lazily started thread serving a single sequence
pub(crate) struct DedicatedWorker {
    label: String,
    thread_name: String,
    env: ThreadEnvironment,
    queue: Arc<ReadyQueue>,
    tracker: Arc<TaskTracker>,
    platform: Arc<dyn PlatformThread>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: OnceCell<ThreadId>,
    retired: Arc<RetiredThreads>,
}

impl DedicatedWorker {
    pub fn new(
        label: String,
        thread_name: String,
        env: ThreadEnvironment,
        tracker: Arc<TaskTracker>,
        platform: Arc<dyn PlatformThread>,
        retired: Arc<RetiredThreads>,
    ) -> Self {
        Self {
            label,
            thread_name,
            env,
            queue: Arc::new(ReadyQueue::new()),
            tracker,
            platform,
            thread: Mutex::new(None),
            thread_id: OnceCell::new(),
            retired,
        }
    }

    /// Whether the caller is running on this worker's thread
    pub fn is_current_thread(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }

    fn ensure_started(&self) -> SchedulerResult<()> {
        let mut thread = self.thread.lock();
        if self.thread_id.get().is_some() || self.queue.is_shutdown() {
            return Ok(());
        }

        let worker = WorkerThread::new(
            self.thread_name.clone(),
            self.env,
            Arc::clone(&self.queue),
            Arc::clone(&self.tracker),
            Arc::clone(&self.platform),
        );
        let handle = worker.spawn().map_err(|source| {
            tracing::error!(pool = %self.label, error = %source, "failed to spawn dedicated thread");
            SchedulerError::WorkerSpawn {
                pool: self.label.clone(),
                source,
            }
        })?;

        let first = self.thread_id.set(handle.thread().id());
        debug_assert!(first.is_ok(), "dedicated thread started twice");
        tracing::debug!(thread = %self.thread_name, "dedicated thread started");
        *thread = Some(handle);
        Ok(())
    }
}

impl Executor for DedicatedWorker {
    fn enqueue_sequence(&self, sequence: Arc<Sequence>) -> SchedulerResult<()> {
        self.queue.push(sequence);
        self.ensure_started()
    }

    fn join(&self) {
        self.queue.shutdown();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!(thread = %self.thread_name, "dedicated thread panicked");
            }
        }
        self.tracker.did_discard(self.queue.discard());
    }

    fn thread_count(&self) -> usize {
        match &*self.thread.lock() {
            Some(handle) if !handle.is_finished() => 1,
            _ => 0,
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for DedicatedWorker {
    fn drop(&mut self) {
        self.queue.retire();
        match self.thread.get_mut().take() {
            // May run on the worker's own thread; never join here
            Some(handle) => self.retired.push(Arc::clone(&self.queue), handle),
            // Never started: nothing will drain what is queued
            None => self.tracker.did_discard(self.queue.discard()),
        }
    }
}
