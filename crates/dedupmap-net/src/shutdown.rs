//! Cooperative process shutdown.
//!
//! One atomic boolean, initially "running", threaded explicitly to every
//! loop in the system. The signal handler performs a single atomic store
//! and nothing else; all cleanup happens on the owning threads when they
//! observe the flag at their next iteration.

use crate::NetError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to the process-wide stop flag.
#[derive(Clone, Debug)]
pub struct StopFlag {
    running: Arc<AtomicBool>,
}

impl StopFlag {
    /// A flag in the running state.
    pub fn new() -> Self {
        Self { running: Arc::new(AtomicBool::new(true)) }
    }

    /// True until shutdown is requested. Every loop checks this once per
    /// iteration.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Requests shutdown. Idempotent, and the only write the signal
    /// handler performs.
    #[inline]
    pub fn trigger(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes SIGINT and SIGTERM to `flag`. No other signals are intercepted.
pub fn install_signal_handlers(flag: &StopFlag) -> Result<(), NetError> {
    let flag = flag.clone();
    ctrlc::set_handler(move || flag.trigger())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_running_and_latches_off() {
        let flag = StopFlag::new();
        assert!(flag.is_running());

        let observer = flag.clone();
        flag.trigger();
        assert!(!observer.is_running());

        flag.trigger(); // idempotent
        assert!(!observer.is_running());
    }
}
