//! Timer service for round timeouts
//!
//! Thin adapter over the tokio runtime. A scheduled timer runs its callback
//! once after the delay unless the handle is cancelled or dropped first, so
//! holders get cancel-on-destruction without extra bookkeeping.

use std::time::Duration;
use tokio::task::JoinHandle;

/// Schedules one-shot timers on the current tokio runtime.
#[derive(Debug, Default, Clone)]
pub struct TimerService;

impl TimerService {
    pub fn new() -> Self {
        Self
    }

    /// Arm a one-shot timer. Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        TimerHandle { task }
    }
}

/// Handle to an armed timer. Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Cancel the timer without waiting for it.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
