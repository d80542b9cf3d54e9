//! Sequences: FIFO, mutually exclusive groups of tasks
//!
//! A sequence is in a ready queue only while it is "scheduled": from the
//! push that made it non-empty until a worker finishes its last task. Workers
//! take one task, run it without holding any lock, then ask the sequence
//! whether to re-enqueue it. Two tasks of the same sequence can therefore
//! never be dispatched at the same time, even though consecutive tasks may
//! land on different threads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::scheduler::task::Task;

/// Identity of a sequence
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SequenceToken(u64);

static NEXT_SEQUENCE_TOKEN: AtomicU64 = AtomicU64::new(1);

impl SequenceToken {
    /// Generate a new unique token
    pub fn new() -> Self {
        SequenceToken(NEXT_SEQUENCE_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Sequence of the task running on the current thread, if it has one
    pub fn current() -> Option<SequenceToken> {
        crate::scheduler::tracker::current_task().and_then(|current| current.sequence_token)
    }

    /// Get the numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for SequenceToken {
    fn default() -> Self {
        Self::new()
    }
}

struct SequenceState {
    tasks: VecDeque<Task>,
    /// In a ready queue or owned by a worker
    scheduled: bool,
}

/// FIFO queue of tasks that run one at a time
pub(crate) struct Sequence {
    token: SequenceToken,
    state: Mutex<SequenceState>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::with_token(SequenceToken::new())
    }

    pub fn with_token(token: SequenceToken) -> Self {
        Self {
            token,
            state: Mutex::new(SequenceState {
                tasks: VecDeque::new(),
                scheduled: false,
            }),
        }
    }

    pub fn token(&self) -> SequenceToken {
        self.token
    }

    /// Append a task.
    ///
    /// Returns true when the caller must put the sequence in a ready queue.
    pub fn push_task(&self, task: Task) -> bool {
        let mut state = self.state.lock();
        state.tasks.push_back(task);
        if state.scheduled {
            false
        } else {
            state.scheduled = true;
            true
        }
    }

    /// Take the front task for execution. Only the worker that dequeued the
    /// sequence calls this.
    pub fn take_task(&self) -> Option<Task> {
        let mut state = self.state.lock();
        debug_assert!(state.scheduled, "took a task from an unscheduled sequence");
        state.tasks.pop_front()
    }

    /// Called after the taken task finished.
    ///
    /// Returns true when the sequence still has tasks and must be
    /// re-enqueued; otherwise it leaves the scheduled state.
    pub fn did_run_task(&self) -> bool {
        let mut state = self.state.lock();
        debug_assert!(state.scheduled);
        if state.tasks.is_empty() {
            state.scheduled = false;
            false
        } else {
            true
        }
    }

    /// Drop every queued task. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let tasks = std::mem::take(&mut self.state.lock().tasks);
        tasks.len()
    }

    /// Number of queued tasks (excluding the one running, if any)
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    #[cfg(test)]
    pub fn is_scheduled(&self) -> bool {
        self.state.lock().scheduled
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Sequence")
            .field("token", &self.token)
            .field("queued", &state.tasks.len())
            .field("scheduled", &state.scheduled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;
    use crate::scheduler::TaskTraits;

    fn task() -> Task {
        Task::new(Location::caller(), TaskTraits::new(), Box::new(|| {}))
    }

    #[test]
    fn test_only_first_push_schedules() {
        let sequence = Sequence::new();
        assert!(!sequence.is_scheduled());

        assert!(sequence.push_task(task()));
        assert!(!sequence.push_task(task()));
        assert!(!sequence.push_task(task()));

        assert!(sequence.is_scheduled());
        assert_eq!(sequence.len(), 3);
    }

    #[test]
    fn test_fifo_and_reschedule() {
        let sequence = Sequence::new();
        let first = task();
        let second = task();
        let (first_id, second_id) = (first.id(), second.id());

        assert!(sequence.push_task(first));
        assert!(!sequence.push_task(second));

        assert_eq!(sequence.take_task().unwrap().id(), first_id);
        assert!(sequence.did_run_task());

        assert_eq!(sequence.take_task().unwrap().id(), second_id);
        assert!(!sequence.did_run_task());
        assert!(!sequence.is_scheduled());
    }

    #[test]
    fn test_push_while_running_does_not_reschedule() {
        let sequence = Sequence::new();
        assert!(sequence.push_task(task()));
        let _running = sequence.take_task().unwrap();

        // Queue is empty but a task is in flight: the worker will re-enqueue
        assert!(!sequence.push_task(task()));
        assert!(sequence.did_run_task());
        let _next = sequence.take_task().unwrap();
        assert!(!sequence.did_run_task());

        // Idle again: the next push must schedule
        assert!(sequence.push_task(task()));
    }

    #[test]
    fn test_clear_drops_queued_tasks() {
        let sequence = Sequence::new();
        sequence.push_task(task());
        sequence.push_task(task());
        assert_eq!(sequence.clear(), 2);
        assert_eq!(sequence.len(), 0);
    }

    #[test]
    fn test_tokens_are_distinct() {
        assert_ne!(Sequence::new().token(), Sequence::new().token());
        let token = SequenceToken::new();
        assert_eq!(Sequence::with_token(token).token(), token);
    }
}
