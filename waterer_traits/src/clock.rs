use std::thread;
use std::time::{Duration, Instant};

/// Time source for schedule holds, serial polling and retry pauses.
///
/// Everything in the rig that waits or measures elapsed time goes through
/// this trait, never through `Instant::now()` or `thread::sleep` directly.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `epoch`, 0 if `epoch` lies in the future.
    fn ms_since(&self, epoch: Instant) -> u64 {
        u64::try_from(self.now().saturating_duration_since(epoch).as_millis()).unwrap_or(u64::MAX)
    }
}

/// Wall-clock implementation used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            thread::sleep(d);
        }
    }
}

#[cfg(any(test, feature = "test-clock"))]
pub mod test_clock {
    use super::{Clock, Duration, Instant};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Manually driven clock with nanosecond resolution.
    ///
    /// `sleep` returns immediately after moving time forward, so a
    /// multi-hour schedule hold runs in microseconds. Clones share time.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        origin: Instant,
        elapsed_ns: Arc<AtomicU64>,
        sleeps: Arc<AtomicU64>,
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                elapsed_ns: Arc::new(AtomicU64::new(0)),
                sleeps: Arc::new(AtomicU64::new(0)),
            }
        }

        pub fn advance(&self, d: Duration) {
            let ns = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
            let _ = self
                .elapsed_ns
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                    Some(t.saturating_add(ns))
                });
        }

        /// Total simulated time since construction.
        pub fn elapsed(&self) -> Duration {
            Duration::from_nanos(self.elapsed_ns.load(Ordering::SeqCst))
        }

        /// How many times `sleep` was called.
        pub fn sleep_count(&self) -> u64 {
            self.sleeps.load(Ordering::SeqCst)
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            self.origin + self.elapsed()
        }

        fn sleep(&self, d: Duration) {
            self.sleeps.fetch_add(1, Ordering::SeqCst);
            self.advance(d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_clock::TestClock;
    use super::*;

    #[test]
    fn test_clock_sleep_advances_without_blocking() {
        let clock = TestClock::new();
        let t0 = clock.now();
        clock.sleep(Duration::from_secs(3600));
        assert_eq!(clock.ms_since(t0), 3_600_000);
        assert_eq!(clock.sleep_count(), 1);
    }

    #[test]
    fn clones_share_time() {
        let a = TestClock::new();
        let b = a.clone();
        b.advance(Duration::from_millis(250));
        assert_eq!(a.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn ms_since_is_zero_for_future_epoch() {
        let clock = TestClock::new();
        let future = clock.now() + Duration::from_secs(1);
        assert_eq!(clock.ms_since(future), 0);
    }
}
