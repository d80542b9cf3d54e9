//! Fallback for targets without a priority implementation

use std::io;

use super::{PlatformThread, ThreadPriority};

/// Records priorities without touching the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortableThreadPriority;

impl PlatformThread for PortableThreadPriority {
    fn apply_current_thread_priority(&self, priority: ThreadPriority) -> io::Result<()> {
        tracing::trace!(%priority, "thread priority recorded only; no OS support");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "portable"
    }
}
