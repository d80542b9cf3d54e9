//! Linux thread priority via per-thread nice values

use std::io;

use super::{PlatformThread, ThreadPriority};

/// Applies priorities with `setpriority(PRIO_PROCESS, tid, nice)`.
///
/// On Linux the nice value is per thread when addressed by tid. Lowering
/// priority is always permitted; raising it back needs `CAP_SYS_NICE`.
#[derive(Debug, Clone, Copy)]
pub struct LinuxThreadPriority {
    background_nice: i32,
}

impl LinuxThreadPriority {
    /// Create with the nice value used for [`ThreadPriority::Background`]
    pub fn new(background_nice: i32) -> Self {
        Self {
            background_nice: background_nice.clamp(0, 19),
        }
    }

    fn nice_for(&self, priority: ThreadPriority) -> libc::c_int {
        match priority {
            ThreadPriority::Background => self.background_nice,
            ThreadPriority::Normal => 0,
        }
    }
}

impl PlatformThread for LinuxThreadPriority {
    fn apply_current_thread_priority(&self, priority: ThreadPriority) -> io::Result<()> {
        // SAFETY: gettid has no preconditions and cannot fail
        let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
        // SAFETY: setpriority only reads its integer arguments
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, self.nice_for(priority)) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn name(&self) -> &'static str {
        "linux"
    }
}
