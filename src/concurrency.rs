//! Cooperative cancellation.
//!
//! Cancellation is two-layered: callers may carry their own [`StopFlag`]
//! handle, and there is additionally a process-wide flag that any thread can
//! raise to abort every in-flight approximation. The process-wide flag is
//! sticky: after a cancelled evaluation the embedder must call
//! [`clear_stop`] before new evaluations are attempted.
//!
//! Every unbounded loop in this crate (Taylor summation, Newton steps, the
//! AGM iteration, the monotone-inversion search) calls [`check_stop`] once
//! per iteration, so a cancellation request surfaces with bounded latency.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::CalcError;

/// Stop flag that can be raised to interrupt long-running approximations
/// and cleared again afterwards.
#[derive(Debug, Default)]
pub struct StopFlag {
    inner: AtomicBool,
}

impl StopFlag {
    pub const fn new() -> Self {
        Self {
            inner: AtomicBool::new(false),
        }
    }

    pub fn stop(&self) {
        self.inner.store(true, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.inner.store(false, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.load(Ordering::Relaxed)
    }
}

static GLOBAL_STOP: StopFlag = StopFlag::new();

/// Requests that every in-flight evaluation stop as soon as possible.
pub fn request_stop() {
    GLOBAL_STOP.stop();
}

/// Clears the process-wide stop flag. Must be called before retrying after
/// a cancelled evaluation.
pub fn clear_stop() {
    GLOBAL_STOP.clear();
}

/// Returns whether a process-wide stop has been requested.
pub fn stop_requested() -> bool {
    GLOBAL_STOP.is_stopped()
}

/// Returns `Err(CalcError::Cancelled)` when a stop has been requested.
pub fn check_stop() -> Result<(), CalcError> {
    if GLOBAL_STOP.is_stopped() {
        Err(CalcError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_flag_round_trip() {
        let flag = StopFlag::new();
        assert!(!flag.is_stopped());
        flag.stop();
        assert!(flag.is_stopped());
        flag.clear();
        assert!(!flag.is_stopped());
    }

    #[test]
    fn global_stop_surfaces_as_cancelled() {
        clear_stop();
        assert_eq!(check_stop(), Ok(()));
        request_stop();
        assert_eq!(check_stop(), Err(CalcError::Cancelled));
        clear_stop();
        assert_eq!(check_stop(), Ok(()));
    }
}
