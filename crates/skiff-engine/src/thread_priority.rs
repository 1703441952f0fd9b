//! Real-time thread priority
//!
//! Platform-specific priority elevation for the worker threads (the
//! audio thread itself is promoted by the driver frontend that owns it).
//!
//! - **Linux**: SCHED_FIFO with elevated priority (requires CAP_SYS_NICE
//!   or root)
//! - **macOS**: USER_INTERACTIVE QoS class
//!
//! Failure is non-fatal: the thread keeps running at default priority.

use std::cell::Cell;

thread_local! {
    static RT_CONTEXT: Cell<bool> = const { Cell::new(false) };
}

/// True while the current thread is inside realtime processing
pub fn is_realtime_context() -> bool {
    RT_CONTEXT.with(Cell::get)
}

/// Marks the current thread as realtime for its lifetime
pub(crate) struct ThreadRtGuard;

impl ThreadRtGuard {
    pub(crate) fn new() -> Self {
        RT_CONTEXT.with(|flag| flag.set(true));
        Self
    }
}

impl Drop for ThreadRtGuard {
    fn drop(&mut self) {
        RT_CONTEXT.with(|flag| flag.set(false));
    }
}

/// Result of a priority elevation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityResult {
    Success,
    Failed,
    Unsupported,
}

/// Promote the current thread to real-time scheduling
pub fn promote_to_realtime() -> PriorityResult {
    let result = platform_set_priority();
    match result {
        PriorityResult::Success => {
            log::info!("Worker thread elevated to real-time priority");
        }
        PriorityResult::Failed => {
            log::warn!("Failed to set real-time thread priority (non-fatal)");
        }
        PriorityResult::Unsupported => {
            log::debug!("Real-time priority not supported on this platform");
        }
    }
    result
}

#[cfg(target_os = "linux")]
fn platform_set_priority() -> PriorityResult {
    const RT_PRIORITY: libc::c_int = 75;

    // SAFETY: plain libc scheduling calls on the current thread
    unsafe {
        let param = libc::sched_param { sched_priority: RT_PRIORITY };
        let ret = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param);
        if ret == 0 { PriorityResult::Success } else { PriorityResult::Failed }
    }
}

#[cfg(target_os = "macos")]
fn platform_set_priority() -> PriorityResult {
    // SAFETY: QoS promotion of the current thread only
    unsafe {
        let ret = libc::pthread_set_qos_class_self_np(libc::qos_class_t::QOS_CLASS_USER_INTERACTIVE, 0);
        if ret == 0 { PriorityResult::Success } else { PriorityResult::Failed }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn platform_set_priority() -> PriorityResult {
    PriorityResult::Unsupported
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_context_flag() {
        assert!(!is_realtime_context());
        {
            let _guard = ThreadRtGuard::new();
            assert!(is_realtime_context());
        }
        assert!(!is_realtime_context());
    }

    #[test]
    fn test_promotion_does_not_panic() {
        // Succeeds or fails depending on privileges; either way the
        // thread must keep running
        let result = promote_to_realtime();
        assert!(matches!(
            result,
            PriorityResult::Success | PriorityResult::Failed | PriorityResult::Unsupported
        ));
    }
}
