//! Platform services: thread priority
//!
//! The scheduler only talks to [`PlatformThread`]. One implementation exists
//! per target OS; [`default_platform`] picks the one for the build target.
//!
//! The priority the scheduler requested for the current thread is recorded
//! in a thread-local and is what [`current_thread_priority`] reports. The OS
//! call is best-effort: a sandbox may refuse it, in which case a warning is
//! logged and scheduling carries on.

use std::cell::Cell;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::SchedulerConfig;

#[cfg(target_os = "linux")]
mod linux;
mod portable;

#[cfg(target_os = "linux")]
pub use linux::LinuxThreadPriority;
pub use portable::PortableThreadPriority;

/// OS-level priority of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThreadPriority {
    /// Lowered priority for work the user does not wait on
    Background,
    /// Default priority
    #[default]
    Normal,
}

impl fmt::Display for ThreadPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadPriority::Background => f.write_str("background"),
            ThreadPriority::Normal => f.write_str("normal"),
        }
    }
}

/// Platform primitives the scheduler needs from the OS
pub trait PlatformThread: Send + Sync + fmt::Debug {
    /// Apply `priority` to the calling OS thread
    fn apply_current_thread_priority(&self, priority: ThreadPriority) -> io::Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Start a named OS thread running `body`
    fn spawn_thread(
        &self,
        name: String,
        body: Box<dyn FnOnce() + Send + 'static>,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(body)
    }
}

thread_local! {
    static CURRENT_PRIORITY: Cell<ThreadPriority> = const { Cell::new(ThreadPriority::Normal) };
}

/// Priority most recently requested for the current thread
pub fn current_thread_priority() -> ThreadPriority {
    CURRENT_PRIORITY.with(Cell::get)
}

/// Set the current thread's priority through `platform`.
///
/// Returns whether the OS accepted the change. The requested priority is
/// recorded either way.
pub fn set_current_thread_priority(platform: &dyn PlatformThread, priority: ThreadPriority) -> bool {
    if current_thread_priority() == priority {
        return true;
    }
    CURRENT_PRIORITY.with(|cell| cell.set(priority));
    match platform.apply_current_thread_priority(priority) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                platform = platform.name(),
                %priority,
                error = %e,
                "failed to apply thread priority"
            );
            false
        }
    }
}

/// Platform implementation for the build target
pub fn default_platform(config: &SchedulerConfig) -> Arc<dyn PlatformThread> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(LinuxThreadPriority::new(config.background_nice))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = config;
        Arc::new(PortableThreadPriority)
    }
}
