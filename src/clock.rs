use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Source of the timestamps the writer stamps onto records.
pub trait Clock: Send {
    fn now(&mut self) -> DateTime<Utc>;
}

/// Wall-clock time from [`Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&mut self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Cooperative cancellation shared by every worker of a run.
///
/// Workers poll [`should_stop`](Self::should_stop) at the top of each iteration; it
/// turns true once [`stop`](Self::stop) is called or the optional deadline passes.
#[derive(Debug, Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug)]
struct StopInner {
    stopped: AtomicBool,
    deadline: Option<Instant>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    /// A signal that only fires when [`stop`](Self::stop) is called.
    pub fn new() -> Self {
        Self::with_deadline(None)
    }

    /// A signal that also fires `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self::with_deadline(Instant::now().checked_add(duration))
    }

    pub fn with_deadline(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                deadline,
            }),
        }
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
    }

    pub fn should_stop(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
            || self
                .inner
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_stop_is_shared_between_clones() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!clone.should_stop());
        signal.stop();
        assert!(clone.should_stop());
    }

    #[test]
    fn deadline_fires_without_stop() {
        let signal = StopSignal::after(Duration::from_millis(200));
        assert!(!signal.should_stop());
        std::thread::sleep(Duration::from_millis(250));
        assert!(signal.should_stop());
    }

    #[test]
    fn past_deadline_is_already_stopped() {
        let signal = StopSignal::with_deadline(Some(Instant::now()));
        assert!(signal.should_stop());
    }
}
