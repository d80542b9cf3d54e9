//! Per-thread blocking-I/O permission
//!
//! Worker threads flip this flag before each task according to the task's
//! `allows_blocking_io` trait. Threads the scheduler does not own keep the
//! default (allowed).

use std::cell::Cell;

thread_local! {
    static IO_ALLOWED: Cell<bool> = const { Cell::new(true) };
}

/// Set whether blocking I/O is allowed on the current thread.
///
/// Returns the previous value.
pub fn set_io_allowed(allowed: bool) -> bool {
    IO_ALLOWED.with(|cell| cell.replace(allowed))
}

/// Whether blocking I/O is allowed on the current thread
pub fn io_allowed() -> bool {
    IO_ALLOWED.with(Cell::get)
}

/// Panic if blocking I/O is not allowed on the current thread.
///
/// Call this at the top of functions that block on file or network I/O.
#[track_caller]
pub fn assert_io_allowed() {
    assert!(
        io_allowed(),
        "blocking I/O is not allowed on this thread; post the task with TaskTraits::with_file_io()"
    );
}

/// Allows blocking I/O on the current thread until dropped.
///
/// Restores the previous permission on drop. Not `Send`: the guard must be
/// dropped on the thread that created it.
#[must_use = "I/O is only allowed while the guard is alive"]
pub struct ScopedAllowIo {
    previous: bool,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ScopedAllowIo {
    /// Allow blocking I/O for the lifetime of the returned guard
    pub fn new() -> Self {
        Self {
            previous: set_io_allowed(true),
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Default for ScopedAllowIo {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopedAllowIo {
    fn drop(&mut self) {
        set_io_allowed(self.previous);
    }
}
