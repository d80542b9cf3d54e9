//! Timer thread for delayed tasks
//!
//! Delayed tasks wait in a min-heap keyed by their due time. The timer
//! thread sleeps on a condvar until the earliest entry is due (or a new,
//! earlier entry arrives), then hands ripe tasks to their sequence. Workers
//! never block on delayed work.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::pool::PostTarget;
use crate::scheduler::task::Task;
use crate::scheduler::tracker::TaskTracker;

/// Entry in the timer heap
struct DelayedEntry {
    /// When the task becomes runnable; None sorts last and never ripens
    run_at: Option<Instant>,
    /// Post order, to keep FIFO among entries due at the same instant
    seq: u64,
    task: Task,
    target: PostTarget,
}

/// Due-time order with "never" after every instant
fn cmp_due(a: Option<Instant>, b: Option<Instant>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// Reverse ordering for min-heap (earliest due first)
impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_due(other.run_at, self.run_at).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.seq == other.seq
    }
}

impl Eq for DelayedEntry {}

/// Holds delayed tasks until they are due
pub(crate) struct DelayedTaskManager {
    /// Pending entries, earliest first
    pending: Mutex<BinaryHeap<DelayedEntry>>,
    /// Wakes the timer thread on a new entry or shutdown
    notify: Condvar,
    shutdown: AtomicBool,
    next_seq: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DelayedTaskManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(BinaryHeap::new()),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            handle: Mutex::new(None),
        })
    }

    /// Start the timer thread
    pub fn start(self: &Arc<Self>, name: String, tracker: Arc<TaskTracker>) -> SchedulerResult<()> {
        let timer = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || timer.run_loop(&tracker))
            .map_err(SchedulerError::TimerSpawn)?;

        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Stop the timer thread and drop every pending task
    pub fn stop(&self) {
        {
            let _pending = self.pending.lock();
            self.shutdown.store(true, AtomicOrdering::Release);
            self.notify.notify_one();
        }

        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("delayed-task timer thread panicked");
            }
        }

        let dropped = std::mem::take(&mut *self.pending.lock());
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "discarded pending delayed tasks");
        }
    }

    /// Hold `task` until it is due, then schedule it on `target`
    pub fn add(&self, task: Task, target: PostTarget) {
        let run_at = task.run_at();
        if run_at.is_none() {
            tracing::debug!(
                task = task.id().as_u64(),
                location = %task.location(),
                delay = ?task.delay(),
                "delay exceeds the clock range; task held until shutdown"
            );
        }
        let entry = DelayedEntry {
            run_at,
            seq: self.next_seq.fetch_add(1, AtomicOrdering::Relaxed),
            task,
            target,
        };
        let mut pending = self.pending.lock();
        pending.push(entry);
        // The new entry may be due earlier than what the thread sleeps on
        self.notify.notify_one();
    }

    /// Number of tasks still waiting
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Timer thread main loop.
    ///
    /// A ripe task whose executor cannot start a thread stays queued in its
    /// sequence and runs once a later post manages to spawn one; the error is
    /// only logged here.
    fn run_loop(&self, tracker: &TaskTracker) {
        loop {
            let due = {
                let mut pending = self.pending.lock();
                loop {
                    // Checked under the lock: stop() notifies while holding it
                    if self.shutdown.load(AtomicOrdering::Acquire) {
                        tracing::debug!("delayed-task timer shutting down");
                        return;
                    }
                    match pending.peek().map(|entry| entry.run_at) {
                        Some(Some(run_at)) if run_at <= Instant::now() => break,
                        Some(Some(run_at)) => {
                            // Wakes early if a new entry is added
                            self.notify.wait_until(&mut pending, run_at);
                        }
                        // Empty, or only never-due entries left
                        Some(None) | None => self.notify.wait(&mut pending),
                    }
                }

                let now = Instant::now();
                let mut due = Vec::new();
                while pending
                    .peek()
                    .is_some_and(|entry| entry.run_at.is_some_and(|run_at| run_at <= now))
                {
                    if let Some(entry) = pending.pop() {
                        due.push(entry);
                    }
                }
                due
            };

            // Scheduling may spawn worker threads; done outside the heap lock
            for entry in due {
                if !tracker.will_schedule_delayed() {
                    continue;
                }
                tracing::trace!(
                    task = entry.task.id().as_u64(),
                    late_by = ?entry.run_at.map(|run_at| run_at.elapsed()),
                    "delayed task is due"
                );
                if let Err(e) = entry.target.schedule(entry.task) {
                    tracing::error!(error = %e, "failed to schedule delayed task");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;
    use crate::scheduler::pool::tests::RecordingExecutor;
    use crate::scheduler::sequence::Sequence;
    use crate::scheduler::TaskTraits;
    use std::time::Duration;

    fn delayed_task(delay: Duration) -> Task {
        Task::new(Location::caller(), TaskTraits::new(), Box::new(|| {})).with_delay(delay)
    }

    fn target(executor: &Arc<RecordingExecutor>) -> PostTarget {
        PostTarget::new(Arc::new(Sequence::new()), executor.clone())
    }

    #[test]
    fn test_timer_creation() {
        let timer = DelayedTaskManager::new();
        assert_eq!(timer.pending_count(), 0);
    }

    #[test]
    fn test_timer_add() {
        let timer = DelayedTaskManager::new();
        let executor = Arc::new(RecordingExecutor::default());
        timer.add(delayed_task(Duration::from_millis(100)), target(&executor));
        assert_eq!(timer.pending_count(), 1);
    }

    #[test]
    fn test_timer_schedules_due_tasks_in_order() {
        let timer = DelayedTaskManager::new();
        let tracker = Arc::new(TaskTracker::new());
        let executor = Arc::new(RecordingExecutor::default());
        timer.start("test-timer".to_string(), tracker.clone()).unwrap();

        let late = delayed_task(Duration::from_millis(60));
        let early = delayed_task(Duration::from_millis(20));
        let (late_id, early_id) = (late.id(), early.id());
        timer.add(late, target(&executor));
        timer.add(early, target(&executor));

        thread::sleep(Duration::from_millis(200));

        assert_eq!(timer.pending_count(), 0);
        assert_eq!(executor.take_task_ids(), vec![early_id, late_id]);
        assert_eq!(tracker.outstanding(), 2);

        timer.stop();
    }

    #[test]
    fn test_timer_not_before_due() {
        let timer = DelayedTaskManager::new();
        let tracker = Arc::new(TaskTracker::new());
        let executor = Arc::new(RecordingExecutor::default());
        timer.start("test-timer".to_string(), tracker).unwrap();

        timer.add(delayed_task(Duration::from_secs(60)), target(&executor));
        thread::sleep(Duration::from_millis(30));
        assert!(executor.take_task_ids().is_empty());
        assert_eq!(timer.pending_count(), 1);

        timer.stop();
    }

    #[test]
    fn test_timer_holds_unbounded_delay() {
        let timer = DelayedTaskManager::new();
        let tracker = Arc::new(TaskTracker::new());
        let executor = Arc::new(RecordingExecutor::default());
        timer.start("test-timer".to_string(), tracker).unwrap();

        let never = delayed_task(Duration::MAX);
        let soon = delayed_task(Duration::from_millis(10));
        let soon_id = soon.id();
        timer.add(never, target(&executor));
        timer.add(soon, target(&executor));

        thread::sleep(Duration::from_millis(100));
        assert_eq!(executor.take_task_ids(), vec![soon_id]);
        assert_eq!(timer.pending_count(), 1);

        timer.stop();
        assert_eq!(timer.pending_count(), 0);
    }

    #[test]
    fn test_timer_shutdown_discards_pending() {
        let timer = DelayedTaskManager::new();
        let tracker = Arc::new(TaskTracker::new());
        let executor = Arc::new(RecordingExecutor::default());
        timer.start("test-timer".to_string(), tracker).unwrap();

        timer.add(delayed_task(Duration::from_secs(60)), target(&executor));

        // Should be able to stop cleanly
        timer.stop();
        assert_eq!(timer.pending_count(), 0);
        assert!(executor.take_task_ids().is_empty());
    }
}
