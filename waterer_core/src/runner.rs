//! Round-robin service loop over one or more rigs.
//!
//! Rigs are ticked one after another, never concurrently. Between ticks the
//! loop looks at two flags: `halt` (held by the maintenance trigger) pauses
//! watering without exiting, `shutdown` (Ctrl-C) ends the loop. Neither
//! interrupts a tick in progress.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use waterer_traits::{Clock, Maintenance, Transport};

use crate::controller::Rig;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    /// Pause between passes over all rigs.
    pub tick_interval: Duration,
    /// Sleep granularity while waiting; bounds flag reaction time.
    pub halt_poll: Duration,
    /// Stop after this many passes. `None` runs until shutdown.
    pub max_passes: Option<u64>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            halt_poll: Duration::from_millis(100),
            max_passes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passes: u64,
    pub ticks: u64,
    pub waterings: u64,
}

/// Wire a maintenance trigger to the shared halt flag.
pub fn attach_maintenance(m: &mut dyn Maintenance, halt: &Arc<AtomicBool>) {
    let on = Arc::clone(halt);
    m.on_halt_begin(Box::new(move || {
        on.store(true, Ordering::SeqCst);
        tracing::warn!("maintenance halt requested");
    }));
    let off = Arc::clone(halt);
    m.on_halt_end(Box::new(move || {
        off.store(false, Ordering::SeqCst);
        tracing::info!("maintenance halt released");
    }));
}

fn wait(clock: &dyn Clock, total: Duration, poll: Duration, shutdown: &AtomicBool) {
    let poll = poll.max(Duration::from_millis(1));
    let start = clock.now();
    while !shutdown.load(Ordering::SeqCst) {
        let elapsed = clock.now().saturating_duration_since(start);
        if elapsed >= total {
            break;
        }
        clock.sleep(poll.min(total - elapsed));
    }
}

/// Service `rigs` until shutdown or `max_passes`.
///
/// A tick error (missing calibration) ends the loop; read and actuation
/// failures are handled inside the tick.
pub fn run_rigs<T: Transport>(
    rigs: &mut [Rig<T>],
    settings: RunnerSettings,
    halt: &AtomicBool,
    shutdown: &AtomicBool,
    clock: &dyn Clock,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let mut was_halted = false;
    tracing::info!(rigs = rigs.len(), interval_ms = settings.tick_interval.as_millis(), "runner started");

    while !shutdown.load(Ordering::SeqCst) {
        if halt.load(Ordering::SeqCst) {
            if !was_halted {
                tracing::warn!("runner halted");
                was_halted = true;
            }
            clock.sleep(settings.halt_poll);
            continue;
        }
        if was_halted {
            tracing::info!("runner resumed");
            was_halted = false;
        }

        for rig in rigs.iter_mut() {
            if shutdown.load(Ordering::SeqCst) || halt.load(Ordering::SeqCst) {
                break;
            }
            let outcome = rig.tick()?;
            summary.ticks += 1;
            summary.waterings += outcome.watered.len() as u64;
        }
        summary.passes += 1;
        if settings.max_passes.is_some_and(|m| summary.passes >= m) {
            break;
        }
        wait(clock, settings.tick_interval, settings.halt_poll, shutdown);
    }
    tracing::info!(passes = summary.passes, ticks = summary.ticks, "runner stopped");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ManualMaintenance;
    use waterer_traits::clock::test_clock::TestClock;

    #[test]
    fn maintenance_toggles_halt() {
        let halt = Arc::new(AtomicBool::new(false));
        let mut m = ManualMaintenance::default();
        attach_maintenance(&mut m, &halt);
        m.press();
        assert!(halt.load(Ordering::SeqCst));
        m.release();
        assert!(!halt.load(Ordering::SeqCst));
    }

    #[test]
    fn wait_stops_early_on_shutdown() {
        let clock = TestClock::new();
        let shutdown = AtomicBool::new(true);
        let t0 = clock.now();
        wait(&clock, Duration::from_secs(10), Duration::from_millis(100), &shutdown);
        assert_eq!(clock.ms_since(t0), 0);

        let shutdown = AtomicBool::new(false);
        wait(&clock, Duration::from_millis(250), Duration::from_millis(100), &shutdown);
        assert_eq!(clock.ms_since(t0), 250);
    }
}
