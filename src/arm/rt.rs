//! Realtime scheduling helpers for the control thread.

use std::path::Path;

use crate::error::{HelixError, HelixResult};

/// Whether the control thread must run under realtime scheduling.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RealtimeMode {
    /// Fail session start unless SCHED_FIFO priority can be acquired.
    Enforce,
    /// Run with normal scheduling; acceptable for simulation and tests.
    Relaxed,
}

/// Determines whether the running kernel has realtime capabilities.
///
/// On Linux this checks for the existence of `/sys/kernel/realtime`.
pub fn has_realtime_kernel() -> bool {
    Path::new("/sys/kernel/realtime").exists()
}

/// Moves the current thread to SCHED_FIFO just below the maximum priority and
/// locks the process memory so the cyclic exchange cannot be stalled by
/// paging.
///
/// Requires an rtprio entry for the user in `/etc/security/limits.conf`.
pub fn elevate_current_thread() -> HelixResult<()> {
    unsafe {
        let max_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max_priority == -1 {
            return Err(HelixError::Realtime {
                message: "unable to query the maximum thread priority".to_string(),
            });
        }
        // One below the maximum leaves room for kernel housekeeping threads.
        let thread_param = libc::sched_param {
            sched_priority: max_priority - 1,
        };
        if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &thread_param) != 0 {
            return Err(HelixError::Realtime {
                message: "unable to set realtime scheduling for the control thread".to_string(),
            });
        }
        if libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) != 0 {
            return Err(HelixError::Realtime {
                message: "unable to lock process memory".to_string(),
            });
        }
    }
    Ok(())
}
