//! Worker thread that executes tasks
//!
//! A worker establishes its environment (priority and I/O permission) once at
//! startup, then pops ready sequences, runs exactly one task from each and
//! re-enqueues the sequence if it still has work.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::platform::{self, PlatformThread};
use crate::scheduler::pool::ReadyQueue;
use crate::scheduler::tracker::TaskTracker;
use crate::scheduler::traits::ThreadEnvironment;
use crate::thread_restrictions;

/// Everything a worker thread needs, moved onto the thread at spawn
pub(crate) struct WorkerThread {
    name: String,
    env: ThreadEnvironment,
    queue: Arc<ReadyQueue>,
    tracker: Arc<TaskTracker>,
    platform: Arc<dyn PlatformThread>,
}

impl WorkerThread {
    pub fn new(
        name: String,
        env: ThreadEnvironment,
        queue: Arc<ReadyQueue>,
        tracker: Arc<TaskTracker>,
        platform: Arc<dyn PlatformThread>,
    ) -> Self {
        Self {
            name,
            env,
            queue,
            tracker,
            platform,
        }
    }

    /// Start the OS thread through the platform
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        let platform = Arc::clone(&self.platform);
        platform.spawn_thread(self.name.clone(), Box::new(move || self.run_loop()))
    }

    /// Worker thread main loop
    fn run_loop(self) {
        self.establish_environment();
        tracing::debug!(
            worker = %self.name,
            priority = %self.env.priority,
            io_allowed = self.env.io_allowed,
            "worker started"
        );

        let mut tasks_run: u64 = 0;
        while let Some(sequence) = self.queue.pop() {
            let task = sequence
                .take_task()
                .unwrap_or_else(|| panic!("scheduled sequence {:?} has no task", sequence.token()));

            // A task may have changed the priority; restore it (no-op otherwise)
            platform::set_current_thread_priority(self.platform.as_ref(), self.env.priority);
            self.tracker.run_task(task, self.env);
            tasks_run += 1;

            if sequence.did_run_task() {
                self.queue.push(sequence);
            }
        }

        tracing::debug!(worker = %self.name, tasks_run, "worker exiting");
    }

    fn establish_environment(&self) {
        platform::set_current_thread_priority(self.platform.as_ref(), self.env.priority);
        thread_restrictions::set_io_allowed(self.env.io_allowed);
    }
}
