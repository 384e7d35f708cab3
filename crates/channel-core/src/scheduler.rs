//! Scheduler seam over the hosting event loop
//!
//! The channel layer never owns a thread. Periodic maintenance (keep-alive
//! probes, idle-channel reaping) and deferred continuations (cancellation
//! teardown) are handed to the hosting loop through this trait. The tokio
//! implementation is the production one; a deterministic manual scheduler
//! backs the tests.

#[cfg(any(test, feature = "testing"))]
use parking_lot::Mutex;
#[cfg(any(test, feature = "testing"))]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(any(test, feature = "testing"))]
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Cancels its timer when dropped.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    pub fn new(cancel: Box<dyn FnOnce() + Send>) -> Self {
        TimerHandle {
            cancel: Some(cancel),
        }
    }

    /// Explicitly cancels the timer.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Repeating-timer and deferred-call primitives of the hosting loop.
pub trait Scheduler: Send + Sync {
    /// Runs `callback` every `interval` until the handle is dropped. The
    /// first invocation happens one full interval after registration.
    fn schedule_repeating(
        &self,
        name: &str,
        interval: Duration,
        callback: Box<dyn FnMut() + Send>,
    ) -> TimerHandle;

    /// Runs `callback` once, from a later loop iteration, never from
    /// within the current call stack.
    fn do_later(&self, name: &str, callback: Box<dyn FnOnce() + Send>);
}

/// Tokio-backed scheduler.
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    /// Captures the current runtime.
    ///
    /// # Panics
    /// Panics outside a tokio runtime context; use
    /// [`TokioScheduler::with_handle`] there.
    pub fn new() -> Self {
        TokioScheduler {
            handle: tokio::runtime::Handle::current(),
        }
    }

    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        TokioScheduler { handle }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_repeating(
        &self,
        name: &str,
        interval: Duration,
        mut callback: Box<dyn FnMut() + Send>,
    ) -> TimerHandle {
        trace!(timer = name, ?interval, "scheduling repeating timer");
        let task = self.handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick of a tokio interval completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                callback();
            }
        });
        let abort = task.abort_handle();
        TimerHandle::new(Box::new(move || abort.abort()))
    }

    fn do_later(&self, name: &str, callback: Box<dyn FnOnce() + Send>) {
        trace!(task = name, "deferring call");
        self.handle.spawn(async move {
            callback();
        });
    }
}

/// Deterministic scheduler for tests: callbacks run only when the test
/// asks for them.
#[cfg(any(test, feature = "testing"))]
pub struct ManualScheduler {
    deferred: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    timers: Mutex<Vec<ManualTimer>>,
}

#[cfg(any(test, feature = "testing"))]
struct ManualTimer {
    cancelled: Arc<AtomicBool>,
    callback: Box<dyn FnMut() + Send>,
}

#[cfg(any(test, feature = "testing"))]
impl ManualScheduler {
    pub fn new() -> Self {
        ManualScheduler {
            deferred: Mutex::new(Vec::new()),
            timers: Mutex::new(Vec::new()),
        }
    }

    /// Runs deferred calls until none remain, including ones enqueued by
    /// the calls themselves. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch = std::mem::take(&mut *self.deferred.lock());
            if batch.is_empty() {
                return ran;
            }
            for callback in batch {
                callback();
                ran += 1;
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Fires every live repeating timer once.
    pub fn fire_timers(&self) {
        let mut taken = std::mem::take(&mut *self.timers.lock());
        taken.retain(|t| !t.cancelled.load(Ordering::Relaxed));
        for timer in taken.iter_mut() {
            (timer.callback)();
        }
        let mut timers = self.timers.lock();
        taken.extend(timers.drain(..));
        *timers = taken;
    }

    pub fn timer_count(&self) -> usize {
        self.timers
            .lock()
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::Relaxed))
            .count()
    }
}

#[cfg(any(test, feature = "testing"))]
impl Scheduler for ManualScheduler {
    fn schedule_repeating(
        &self,
        _name: &str,
        _interval: Duration,
        callback: Box<dyn FnMut() + Send>,
    ) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.timers.lock().push(ManualTimer {
            cancelled: cancelled.clone(),
            callback,
        });
        TimerHandle::new(Box::new(move || cancelled.store(true, Ordering::Relaxed)))
    }

    fn do_later(&self, _name: &str, callback: Box<dyn FnOnce() + Send>) {
        self.deferred.lock().push(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn manual_scheduler_defers_until_run() {
        let scheduler = ManualScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        scheduler.do_later("x", Box::new(move || {
            h.fetch_add(1, Ordering::Relaxed);
        }));
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn manual_timer_cancellation() {
        let scheduler = ManualScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = scheduler.schedule_repeating(
            "tick",
            Duration::from_secs(1),
            Box::new(move || {
                h.fetch_add(1, Ordering::Relaxed);
            }),
        );
        scheduler.fire_timers();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        handle.cancel();
        scheduler.fire_timers();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(scheduler.timer_count(), 0);
    }

    #[tokio::test]
    async fn tokio_scheduler_runs_deferred_calls() {
        let scheduler = TokioScheduler::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut tx = Some(tx);
        scheduler.do_later(
            "notify",
            Box::new(move || {
                let _ = tx.take().map(|tx| tx.send(()));
            }),
        );
        rx.await.expect("deferred call should run");
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_fires_repeating_timer() {
        let scheduler = TokioScheduler::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _handle = scheduler.schedule_repeating(
            "tick",
            Duration::from_millis(50),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        tokio::time::sleep(Duration::from_millis(120)).await;
        // Two intervals elapsed; the immediate first tick is skipped.
        rx.recv().await.expect("first tick");
        rx.recv().await.expect("second tick");
    }
}
