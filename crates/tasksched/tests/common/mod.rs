//! Shared helpers for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tasksched::{
    current_thread_priority, thread_restrictions, ExecutionMode, SchedulerConfig, TaskRunner,
    TaskRunnerExt, TaskScheduler, TaskTraits,
};

/// Install a subscriber once so `RUST_LOG=tasksched=debug` shows scheduler logs
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scheduler with small pools so tests exercise reuse and migration
pub fn test_scheduler(max_threads: usize) -> TaskScheduler {
    init_tracing();
    TaskScheduler::with_config(
        SchedulerConfig::default()
            .with_max_threads(max_threads)
            .with_thread_name_prefix("tasksched-test"),
    )
    .expect("scheduler should start")
}

/// Whether the current thread's environment matches `traits`
pub fn environment_matches(traits: TaskTraits) -> bool {
    current_thread_priority() == traits.priority().thread_priority()
        && thread_restrictions::io_allowed() == traits.allows_blocking_io()
}

#[derive(Default)]
struct FactoryState {
    /// Index handed to the next posted task
    next_index: usize,
    ran: HashSet<usize>,
    /// Tasks currently inside their body
    in_flight: usize,
    /// Thread of the first task, for single-threaded runners
    thread: Option<ThreadId>,
    failures: Vec<String>,
}

struct Inner {
    runner: Arc<dyn TaskRunner>,
    mode: ExecutionMode,
    state: Mutex<FactoryState>,
    all_ran: Condvar,
}

/// Posts numbered tasks through a runner and checks, from inside each task,
/// that the runner's execution-mode contract holds.
///
/// Checks made on every run:
/// - the thread environment matches the runner's traits
/// - `runs_tasks_on_current_thread()` is true
/// - sequenced and single-threaded: tasks run in index order, never two at once
/// - single-threaded: every task runs on the same thread
#[derive(Clone)]
pub struct TestTaskFactory {
    inner: Arc<Inner>,
}

impl TestTaskFactory {
    pub fn new(runner: Arc<dyn TaskRunner>) -> Self {
        let mode = runner.execution_mode();
        Self {
            inner: Arc::new(Inner {
                runner,
                mode,
                state: Mutex::new(FactoryState::default()),
                all_ran: Condvar::new(),
            }),
        }
    }

    pub fn runner(&self) -> &Arc<dyn TaskRunner> {
        &self.inner.runner
    }

    /// Post one checked task. With `post_nested`, the task posts one more
    /// checked task from inside its body.
    pub fn post_task(&self, post_nested: bool) -> bool {
        // Indices must follow post order, so hand one out and post under
        // the same lock.
        let mut state = self.inner.state.lock();
        let index = state.next_index;
        let factory = self.clone();
        let posted = self
            .inner
            .runner
            .post_task(move || factory.run_task(index, post_nested));
        if posted {
            state.next_index += 1;
        }
        posted
    }

    fn run_task(&self, index: usize, post_nested: bool) {
        let mut failures = Vec::new();
        let traits = self.inner.runner.traits();
        if !environment_matches(traits) {
            failures.push(format!(
                "task {} ran with priority {} and io_allowed {} but requires {}",
                index,
                current_thread_priority(),
                thread_restrictions::io_allowed(),
                traits
            ));
        }
        if !self.inner.runner.runs_tasks_on_current_thread() {
            failures.push(format!("task {}: runs_tasks_on_current_thread() is false", index));
        }

        {
            let mut state = self.inner.state.lock();
            state.in_flight += 1;
            if self.inner.mode != ExecutionMode::Parallel {
                if state.in_flight > 1 {
                    failures.push(format!("task {} overlapped another task", index));
                }
                if state.ran.len() != index {
                    failures.push(format!(
                        "task {} ran after {} tasks; expected post order",
                        index,
                        state.ran.len()
                    ));
                }
            }
            if self.inner.mode == ExecutionMode::SingleThreaded {
                let current = thread::current().id();
                match state.thread {
                    Some(expected) if expected != current => {
                        failures.push(format!("task {} changed threads", index));
                    }
                    Some(_) => {}
                    None => state.thread = Some(current),
                }
            }
        }

        // Widen the window in which an overlap would be observed
        thread::yield_now();

        if post_nested {
            self.post_task(false);
        }

        let mut state = self.inner.state.lock();
        state.in_flight -= 1;
        if !state.ran.insert(index) {
            failures.push(format!("task {} ran twice", index));
        }
        state.failures.extend(failures);
        self.inner.all_ran.notify_all();
    }

    /// Block until every posted task ran, then assert no check failed
    pub fn wait_for_all_tasks_to_run(&self) {
        let mut state = self.inner.state.lock();
        while state.ran.len() < state.next_index {
            if self
                .inner
                .all_ran
                .wait_for(&mut state, Duration::from_secs(30))
                .timed_out()
            {
                panic!(
                    "timed out: {} of {} tasks ran",
                    state.ran.len(),
                    state.next_index
                );
            }
        }
        assert!(
            state.failures.is_empty(),
            "{} runner with {}: {:?}",
            self.inner.mode,
            self.inner.runner.traits(),
            state.failures
        );
    }

    pub fn tasks_posted(&self) -> usize {
        self.inner.state.lock().next_index
    }

    pub fn tasks_run(&self) -> usize {
        self.inner.state.lock().ran.len()
    }
}
