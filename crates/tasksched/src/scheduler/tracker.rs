//! Task bookkeeping shared by every pool
//!
//! The tracker decides whether a post is accepted, counts outstanding
//! undelayed tasks for drain/join, and wraps each task run: it installs the
//! per-task thread state, catches a panicking body so the worker survives,
//! and feeds the run profile.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::location::Location;
use crate::scheduler::profile::{LocationTally, RunProfile};
use crate::scheduler::task::{RunnerId, Task, TaskId};
use crate::scheduler::traits::ThreadEnvironment;
use crate::scheduler::SequenceToken;
use crate::thread_restrictions;

/// Identity of the task running on the current thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CurrentTask {
    pub task_id: TaskId,
    pub runner: Option<RunnerId>,
    pub sequence_token: Option<SequenceToken>,
}

thread_local! {
    static CURRENT_TASK: Cell<Option<CurrentTask>> = const { Cell::new(None) };
}

pub(crate) fn current_task() -> Option<CurrentTask> {
    CURRENT_TASK.with(Cell::get)
}

/// Marks the current thread as running a task until dropped
struct CurrentTaskScope {
    previous: Option<CurrentTask>,
}

impl CurrentTaskScope {
    fn enter(current: CurrentTask) -> Self {
        Self {
            previous: CURRENT_TASK.with(|cell| cell.replace(Some(current))),
        }
    }
}

impl Drop for CurrentTaskScope {
    fn drop(&mut self) {
        CURRENT_TASK.with(|cell| cell.set(self.previous));
    }
}

struct TrackerState {
    shutdown: bool,
    /// Accepted undelayed tasks (and ripe delayed ones) not yet run
    outstanding: usize,
}

pub(crate) struct TaskTracker {
    state: Mutex<TrackerState>,
    drained: Condvar,
    tasks_posted: AtomicU64,
    tasks_run: AtomicU64,
    tasks_rejected: AtomicU64,
    tasks_panicked: AtomicU64,
    profile: RunProfile,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                shutdown: false,
                outstanding: 0,
            }),
            drained: Condvar::new(),
            tasks_posted: AtomicU64::new(0),
            tasks_run: AtomicU64::new(0),
            tasks_rejected: AtomicU64::new(0),
            tasks_panicked: AtomicU64::new(0),
            profile: RunProfile::default(),
        }
    }

    /// Accept or reject a post. Undelayed tasks become outstanding here;
    /// delayed ones when they ripen.
    pub fn will_post(&self, task: &Task) -> bool {
        {
            let mut state = self.state.lock();
            if state.shutdown {
                drop(state);
                self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(location = %task.location(), "task rejected: shutdown in progress");
                return false;
            }
            if !task.is_delayed() {
                state.outstanding += 1;
            }
        }
        self.tasks_posted.fetch_add(1, Ordering::Relaxed);
        self.profile.record_post(task.location());
        true
    }

    /// A delayed task is due. Returns false if it must be dropped instead.
    pub fn will_schedule_delayed(&self) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            return false;
        }
        state.outstanding += 1;
        true
    }

    /// Run `task` on the current worker thread.
    ///
    /// # Panics
    ///
    /// Panics if `env` does not match the task's traits: the task was routed
    /// to the wrong pool.
    pub fn run_task(&self, task: Task, env: ThreadEnvironment) {
        let traits = task.traits();
        assert!(
            env.matches(traits),
            "task {} ({}) dispatched to a worker with {:?}",
            task.id().as_u64(),
            traits,
            env
        );

        let location = task.location();
        tracing::trace!(
            task = task.id().as_u64(),
            %location,
            delay = ?task.delay(),
            queued_for = ?task.posted_at().elapsed(),
            "running task"
        );
        let current = CurrentTask {
            task_id: task.id(),
            runner: task.runner(),
            sequence_token: task.sequence_token(),
        };

        let previous_io = thread_restrictions::set_io_allowed(traits.allows_blocking_io());
        let started = Instant::now();
        let outcome = {
            let _scope = CurrentTaskScope::enter(current);
            panic::catch_unwind(AssertUnwindSafe(task.into_runnable()))
        };
        let elapsed = started.elapsed();
        thread_restrictions::set_io_allowed(previous_io);

        self.tasks_run.fetch_add(1, Ordering::Relaxed);
        if let Err(payload) = outcome {
            self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                %location,
                task = current.task_id.as_u64(),
                panic = panic_message(payload.as_ref()),
                "task panicked"
            );
        }
        self.profile.record_run(location, elapsed);
        self.did_finish();
    }

    fn did_finish(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.outstanding > 0, "outstanding task count underflow");
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 {
            self.drained.notify_all();
        }
    }

    /// `count` outstanding tasks were dropped unrun at shutdown
    pub fn did_discard(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut state = self.state.lock();
        debug_assert!(state.outstanding >= count, "outstanding task count underflow");
        state.outstanding = state.outstanding.saturating_sub(count);
        if state.outstanding == 0 {
            self.drained.notify_all();
        }
    }

    /// Block until no undelayed task is outstanding or shutdown begins
    pub fn flush(&self) {
        let mut state = self.state.lock();
        while state.outstanding > 0 && !state.shutdown {
            self.drained.wait(&mut state);
        }
    }

    /// Block until drained or `timeout` elapses. Returns whether drained.
    pub fn flush_timeout(&self, timeout: Duration) -> bool {
        // None: too far out to represent, wait without a deadline
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while state.outstanding > 0 && !state.shutdown {
            match deadline {
                Some(deadline) => {
                    if self.drained.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.drained.wait(&mut state),
            }
        }
        state.outstanding == 0
    }

    /// Stop accepting tasks. Returns true the first time.
    pub fn start_shutdown(&self) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            return false;
        }
        state.shutdown = true;
        self.drained.notify_all();
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    pub fn tasks_posted(&self) -> u64 {
        self.tasks_posted.load(Ordering::Relaxed)
    }

    pub fn tasks_run(&self) -> u64 {
        self.tasks_run.load(Ordering::Relaxed)
    }

    pub fn tasks_rejected(&self) -> u64 {
        self.tasks_rejected.load(Ordering::Relaxed)
    }

    pub fn tasks_panicked(&self) -> u64 {
        self.tasks_panicked.load(Ordering::Relaxed)
    }

    pub fn profile_snapshot(&self) -> Vec<(Location, LocationTally)> {
        self.profile.snapshot()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
