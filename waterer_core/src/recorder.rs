//! Shared recording state for all rigs.
//!
//! One camera serves every rig, so whether it is recording is tracked here
//! rather than per rig. Start is refused while a recording is running or
//! still waiting for its scheduled stop.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use waterer_traits::{BoxError, Clock, Recorder};

enum Phase {
    Idle,
    Recording,
    Stopping { until: Instant },
}

struct Inner {
    recorder: Box<dyn Recorder + Send>,
    phase: Phase,
}

pub struct RecorderGuard {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl core::fmt::Debug for RecorderGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecorderGuard")
            .field("recording", &self.is_recording())
            .finish()
    }
}

impl RecorderGuard {
    pub fn new(recorder: Box<dyn Recorder + Send>, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                recorder,
                phase: Phase::Idle,
            }),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn busy(&self, phase: &Phase) -> bool {
        match phase {
            Phase::Idle => false,
            Phase::Recording => true,
            Phase::Stopping { until } => self.clock.now() < *until,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.busy(&self.lock().phase)
    }

    /// Start recording unless another recording is active. Returns whether
    /// a recording was started.
    pub fn try_start(&self) -> bool {
        let mut g = self.lock();
        if self.busy(&g.phase) {
            tracing::debug!("recording already active, not starting another");
            return false;
        }
        match g.recorder.start_recording() {
            Ok(()) => {
                g.phase = Phase::Recording;
                tracing::debug!("recording started");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to start recording");
                false
            }
        }
    }

    /// Ask the recorder to stop after `delay`. No-op when not recording.
    pub fn schedule_stop(&self, delay: Duration) {
        let mut g = self.lock();
        if !matches!(g.phase, Phase::Recording) {
            return;
        }
        if let Err(e) = g.recorder.schedule_stop_recording(delay) {
            tracing::warn!(error = %e, "failed to schedule recording stop");
        }
        g.phase = Phase::Stopping {
            until: self.clock.now() + delay,
        };
    }
}

/// Recorder for rigs without a camera: only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecorder;

impl Recorder for LogRecorder {
    fn start_recording(&mut self) -> Result<(), BoxError> {
        tracing::info!("recording start requested");
        Ok(())
    }

    fn schedule_stop_recording(&mut self, delay: Duration) -> Result<(), BoxError> {
        tracing::info!(delay_s = delay.as_secs_f64(), "recording stop scheduled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::CountingRecorder;
    use waterer_traits::clock::test_clock::TestClock;

    #[test]
    fn refuses_overlapping_recordings() {
        let clock = TestClock::new();
        let rec = CountingRecorder::default();
        let guard = RecorderGuard::new(Box::new(rec.clone()), Arc::new(clock.clone()));

        assert!(guard.try_start());
        assert!(!guard.try_start());
        guard.schedule_stop(Duration::from_secs(5));
        assert!(guard.is_recording());
        assert!(!guard.try_start());
        clock.advance(Duration::from_secs(5));
        assert!(!guard.is_recording());
        assert!(guard.try_start());

        assert_eq!(*rec.starts.lock().unwrap(), 2);
        assert_eq!(*rec.stops.lock().unwrap(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn stop_without_start_is_ignored() {
        let rec = CountingRecorder::default();
        let guard = RecorderGuard::new(Box::new(rec.clone()), Arc::new(TestClock::new()));
        guard.schedule_stop(Duration::from_secs(1));
        assert!(rec.stops.lock().unwrap().is_empty());
    }
}
