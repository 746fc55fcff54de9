//! Background work scheduling.
//!
//! Deferred work (snapshot cache writes, background prefetch) goes
//! through the [`BackgroundScheduler`] trait so the rest of the core
//! never assumes which backend is active: [`IdleScheduler`] runs tasks at
//! low priority with a bounded deferral, [`TimerScheduler`] runs them
//! after a fixed delay.

use std::time::Duration;

use medley_shared::constants::IDLE_TIMEOUT_MS;
use tokio::task::JoinHandle;

/// A deferred unit of work.
pub type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a scheduled task.  Cancelling a task that already ran is a
/// no-op.
#[derive(Debug)]
pub struct TaskHandle {
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

/// Abstract scheduler for deferred background work.
pub trait BackgroundScheduler: Send + Sync {
    /// Run `task` no sooner than `delay` from now.  The concrete backend
    /// decides how much later it actually runs.
    fn schedule(&self, delay: Duration, task: BoxedTask) -> TaskHandle;
}

/// Runs tasks after the delay plus a cooperative yield, giving other
/// ready tasks priority.  The deferral beyond the delay is bounded by
/// both the yield budget and [`IDLE_TIMEOUT_MS`], so work is never
/// postponed indefinitely.
#[derive(Debug, Clone)]
pub struct IdleScheduler {
    /// How many times to yield before running regardless of load.
    yield_budget: u32,
}

impl Default for IdleScheduler {
    fn default() -> Self {
        Self { yield_budget: 4 }
    }
}

impl IdleScheduler {
    pub fn new(yield_budget: u32) -> Self {
        Self { yield_budget }
    }
}

impl BackgroundScheduler for IdleScheduler {
    fn schedule(&self, delay: Duration, task: BoxedTask) -> TaskHandle {
        let budget = self.yield_budget;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let yields = async {
                for _ in 0..budget {
                    tokio::task::yield_now().await;
                }
            };
            // Stop being polite once the idle deadline passes.
            let _ = tokio::time::timeout(Duration::from_millis(IDLE_TIMEOUT_MS), yields).await;
            task();
        });
        TaskHandle { handle }
    }
}

/// Plain fixed-delay scheduler, used where the idle primitive is
/// unavailable or undesirable.
#[derive(Debug, Clone, Default)]
pub struct TimerScheduler;

impl BackgroundScheduler for TimerScheduler {
    fn schedule(&self, delay: Duration, task: BoxedTask) -> TaskHandle {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        TaskHandle { handle }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timer_scheduler_runs_after_delay() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        TimerScheduler.schedule(
            Duration::from_millis(100),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!ran.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn deferral_is_bounded_by_the_idle_deadline() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        // A yield budget that would otherwise outlast the test.
        IdleScheduler::new(u32::MAX).schedule(
            Duration::ZERO,
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );

        // Let the task arm its deadline, then push the clock past it.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(IDLE_TIMEOUT_MS + 1)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_a_pending_task() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let handle = IdleScheduler::default().schedule(
            Duration::from_millis(100),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert!(!ran.load(Ordering::SeqCst));
    }
}
