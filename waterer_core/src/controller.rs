//! One watering rig: scale, schedules, safety and actuation behind a single
//! serial link.
//!
//! A [`Rig`] is assembled with the type-state [`RigBuilder`]; `build()` is
//! only available once a transport and the channel layout are set. After
//! [`Rig::begin`] the rig is driven by repeated [`Rig::tick`] calls:
//!
//! 1. read filtered weights (retried until a batch succeeds)
//! 2. feed each channel's schedule
//! 3. record history and run the safety check
//! 4. water the pending channels in planner order
//! 5. auto-tune intensities from the previous tick's watering
//! 6. log one data row
//!
//! The persisted stepper position is written before every move and rolled
//! back if the move command fails. A failed move may still have moved the
//! motor; the record then disagrees with the hardware until `go_home`.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use waterer_traits::{Clock, MonotonicClock, Transport};

use crate::datalog::{CsvDataLog, DataSink, TickRecord};
use crate::error::{BuildError, Result, WatererError};
use crate::intensity::IntensityConfig;
use crate::link::{LinkCfg, SerialLink};
use crate::planner;
use crate::recorder::RecorderGuard;
use crate::safety::{SafetyLimits, SafetyMonitor, Verdict};
use crate::scale::{CalibratedScale, ScaleSettings, WeightReading};
use crate::schedule::{ScheduleStep, WateringSchedule};
use crate::store::StateStore;
use crate::uncertain::Uncertain;

/// Servo angle used while the stepper travels.
pub const NEUTRAL_SERVO: u8 = 90;
const HANDSHAKE_PAUSE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub stepper: i64,
    pub servo: u8,
}

#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub position: Position,
    pub pump_duration: IntensityConfig,
    pub pump_power: IntensityConfig,
    pub steps: Vec<ScheduleStep>,
    pub cyclic: bool,
}

impl ChannelSpec {
    /// Pump `(ms, percent)` for an intensity level.
    pub fn pump_for(&self, intensity: u32) -> (u64, u8) {
        let ms = u64::try_from(self.pump_duration.eval(intensity)).unwrap_or(0);
        let pct = u8::try_from(self.pump_power.eval(intensity).clamp(0, 100)).unwrap_or(100);
        (ms, pct)
    }
}

/// Intensity auto-tuning thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningCfg {
    /// A watering that raised the weight by less than this had no effect.
    pub low_threshold_g: f64,
    /// A watering that raised the weight by more than this was too much.
    pub high_threshold_g: f64,
    pub max_low_repeats: u32,
    pub lowering_rate: u32,
}

impl Default for TuningCfg {
    fn default() -> Self {
        Self {
            low_threshold_g: 1.0,
            high_threshold_g: 4.0,
            max_low_repeats: 2,
            lowering_rate: 2,
        }
    }
}

impl TuningCfg {
    pub fn validate(&self) -> eyre::Result<()> {
        if self.low_threshold_g.is_nan()
            || self.high_threshold_g.is_nan()
            || self.low_threshold_g >= self.high_threshold_g
        {
            eyre::bail!(
                "tuning low_threshold_g ({}) must be < high_threshold_g ({})",
                self.low_threshold_g,
                self.high_threshold_g
            );
        }
        Ok(())
    }
}

/// Scale acquisition parameters.
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionCfg {
    pub n_statistics: usize,
    pub n_arduino_samples: u32,
    pub err_limit: f64,
    /// Pause between failed read batches.
    pub read_retry: Duration,
}

impl Default for AcquisitionCfg {
    fn default() -> Self {
        Self {
            n_statistics: 50,
            n_arduino_samples: 10,
            err_limit: 1.0,
            read_retry: Duration::from_secs(1),
        }
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub weights: Vec<Uncertain>,
    pub needs_water: Vec<bool>,
    pub verdicts: Vec<Verdict>,
    /// Channels watered, in the order they were visited.
    pub watered: Vec<usize>,
    /// Channels whose watering sequence failed.
    pub failed: Vec<usize>,
    pub halted: bool,
}

pub struct Rig<T: Transport> {
    name: String,
    link: SerialLink<T>,
    scale: CalibratedScale,
    acquisition: AcquisitionCfg,
    channels: Vec<ChannelSpec>,
    schedules: Vec<WateringSchedule>,
    safety: SafetyMonitor,
    tuning: TuningCfg,
    intensities: Vec<u32>,
    low_repeats: Vec<u32>,
    previous: Option<(Vec<f64>, Vec<bool>)>,
    stepper_pos: i64,
    store: StateStore,
    calibration_path: PathBuf,
    sink: Box<dyn DataSink + Send>,
    recorder: Option<Arc<RecorderGuard>>,
    recorder_stop_delay: Duration,
    settle: Duration,
    handshake_attempts: u32,
    clock: Arc<dyn Clock + Send + Sync>,
    halt: Arc<AtomicBool>,
}

impl<T: Transport> core::fmt::Debug for Rig<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Rig")
            .field("name", &self.name)
            .field("channels", &self.channels.len())
            .field("stepper_pos", &self.stepper_pos)
            .field("intensities", &self.intensities)
            .field("disabled", &self.safety.disabled())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Rig<T> {
    pub fn builder() -> RigBuilder<T, Missing, Missing> {
        RigBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[ChannelSpec] {
        &self.channels
    }

    pub fn schedules(&self) -> &[WateringSchedule] {
        &self.schedules
    }

    pub fn safety(&self) -> &SafetyMonitor {
        &self.safety
    }

    pub fn intensities(&self) -> &[u32] {
        &self.intensities
    }

    pub fn stepper_position(&self) -> i64 {
        self.stepper_pos
    }

    pub fn scale(&self) -> &CalibratedScale {
        &self.scale
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn link(&self) -> &SerialLink<T> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut SerialLink<T> {
        &mut self.link
    }

    pub fn halt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halt)
    }

    pub fn is_halted(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    /// Load persisted state, handshake with the board and check that it
    /// reports the configured number of load cells.
    pub fn begin(&mut self) -> Result<()> {
        self.load_state();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.link.cmd_ok() {
                Ok(()) => break,
                Err(e) if attempt >= self.handshake_attempts => {
                    tracing::error!(rig = %self.name, attempts = attempt, "board did not answer handshake");
                    return Err(eyre::Report::new(WatererError::Link(e)));
                }
                Err(e) => {
                    tracing::debug!(rig = %self.name, attempt, error = %e, "waiting for board");
                    self.clock.sleep(HANDSHAKE_PAUSE);
                }
            }
        }
        if let Err(e) = self.link.stepper_attach(false) {
            tracing::warn!(rig = %self.name, error = %e, "could not detach stepper");
        }

        let reported = self.link.cmd_hx_n().map_err(WatererError::Link)?;
        if reported != self.n_channels() {
            return Err(eyre::Report::new(WatererError::ChannelMismatch {
                expected: self.n_channels(),
                actual: reported,
            }));
        }
        tracing::info!(
            rig = %self.name,
            channels = reported,
            stepper = self.stepper_pos,
            calibrated = self.scale.is_calibrated(),
            "rig ready"
        );
        Ok(())
    }

    fn load_state(&mut self) {
        let rig = self.name.clone();
        let n = self.n_channels();
        let warn = |what: &str, e: &dyn std::fmt::Display| {
            tracing::warn!(rig = %rig, error = %e, "ignoring saved {what}");
        };

        if let Err(e) = self.scale.load(&self.calibration_path) {
            warn("calibration", &e);
        }
        match self.store.load_stepper() {
            Ok(Some(pos)) => self.stepper_pos = pos,
            Ok(None) => {}
            Err(e) => warn("stepper position", &e),
        }
        match self.store.load_disabled() {
            Ok(Some(flags)) => {
                if let Err(e) = self.safety.set_disabled(flags) {
                    warn("disabled channels", &e);
                }
            }
            Ok(None) => {}
            Err(e) => warn("disabled channels", &e),
        }
        match self.store.load_intensities() {
            Ok(Some(levels)) if levels.len() == n => self.intensities = levels,
            Ok(Some(levels)) => tracing::error!(
                rig = %rig,
                expected = n,
                got = levels.len(),
                "saved intensities have the wrong length, starting from zero"
            ),
            Ok(None) => {}
            Err(e) => warn("intensities", &e),
        }
        match self.store.load_history() {
            Ok(Some(snap)) => {
                if let Err(e) = self.safety.restore(snap) {
                    warn("history", &e);
                }
            }
            Ok(None) => {}
            Err(e) => warn("history", &e),
        }
        match self.store.load_schedules() {
            Ok(Some(progress)) if progress.len() == n => {
                for (i, (s, p)) in self.schedules.iter_mut().zip(&progress).enumerate() {
                    if let Err(e) = s.restore(p) {
                        tracing::warn!(rig = %rig, channel = i, error = %e, "ignoring saved schedule progress");
                    }
                }
            }
            Ok(Some(_)) => tracing::warn!(rig = %rig, "saved schedules have the wrong length, ignored"),
            Ok(None) => {}
            Err(e) => warn("schedules", &e),
        }
    }

    /// Filtered weights, retrying failed batches until one succeeds.
    ///
    /// Only a missing calibration is returned as an error.
    fn read_until_ok(&mut self) -> Result<WeightReading> {
        loop {
            if let Some(r) = self
                .scale
                .read_stats(&mut self.link, self.acquisition.n_statistics)?
            {
                return Ok(r);
            }
            tracing::warn!(rig = %self.name, "could not read scales, retrying");
            self.clock.sleep(self.acquisition.read_retry);
        }
    }

    pub fn read_weights(&mut self, n: usize) -> Result<Option<WeightReading>> {
        self.scale.read_stats(&mut self.link, n)
    }

    pub fn tick(&mut self) -> Result<TickOutcome> {
        let reading = self.read_until_ok()?;
        let weights = reading.values();
        let n = self.n_channels();

        for (s, w) in self.schedules.iter_mut().zip(&weights) {
            s.update(*w);
        }
        let needs_water: Vec<bool> = self
            .schedules
            .iter()
            .zip(&weights)
            .map(|(s, w)| s.should_water(*w))
            .collect();
        let goals: Vec<f64> = self.schedules.iter().map(WateringSchedule::current_goal).collect();

        let now = Local::now();
        self.safety
            .record_tick(now, &weights, &needs_water, &self.intensities);
        let verdicts: Vec<Verdict> = (0..n)
            .map(|i| {
                let v = self.safety.check(i);
                self.safety.mark_result(i, v.passed());
                v
            })
            .collect();
        if self.safety.take_disabled_dirty()
            && let Err(e) = self.store.save_disabled(self.safety.disabled())
        {
            tracing::error!(rig = %self.name, error = %e, "could not persist disabled channels");
        }
        tracing::debug!(
            rig = %self.name,
            weights = ?weights,
            needs_water = ?needs_water,
            intensities = ?self.intensities,
            "tick measurements"
        );

        let pending: Vec<usize> = (0..n)
            .filter(|&i| needs_water[i] && verdicts[i].passed())
            .collect();
        let halted = self.is_halted();
        let mut watered = Vec::new();
        let mut failed = Vec::new();
        if halted && !pending.is_empty() {
            tracing::info!(rig = %self.name, pending = ?pending, "rig halted, watering deferred");
        } else if !pending.is_empty() {
            let recording = self.recorder.as_ref().is_some_and(|r| r.try_start());
            let positions: Vec<i64> = pending
                .iter()
                .map(|&i| self.channels[i].position.stepper)
                .collect();
            for k in planner::plan(&positions, self.stepper_pos) {
                let i = pending[k];
                let intensity = self.intensities[i];
                match self.water(i, intensity) {
                    Ok(()) => {
                        tracing::info!(
                            rig = %self.name,
                            channel = i,
                            weight = %reading.weights[i],
                            goal = goals[i],
                            intensity,
                            "watered"
                        );
                        watered.push(i);
                    }
                    Err(e) => {
                        tracing::error!(rig = %self.name, channel = i, critical = true, error = %e, "watering failed");
                        failed.push(i);
                    }
                }
            }
            if recording && let Some(r) = &self.recorder {
                r.schedule_stop(self.recorder_stop_delay);
            }
        }

        let mut watered_mask = vec![false; n];
        for &i in &watered {
            watered_mask[i] = true;
        }
        if self.update_intensities(&weights)
            && let Err(e) = self.store.save_intensities(&self.intensities)
        {
            tracing::error!(rig = %self.name, error = %e, "could not persist intensities");
        }
        self.previous = Some((weights.clone(), watered_mask));
        self.persist_progress();

        let (humidity, temperature) = match self.link.cmd_dht() {
            Ok(d) => (Some(d.humidity), Some(d.temperature)),
            Err(e) => {
                tracing::warn!(rig = %self.name, error = %e, "ambient read failed");
                (None, None)
            }
        };
        let record = TickRecord {
            time: now,
            weights: reading.weights.clone(),
            watered: needs_water.clone(),
            n_filtered: reading.n_filtered.clone(),
            goals,
            n_unsuccessful: reading.n_unsuccessful,
            humidity,
            temperature,
        };
        if let Err(e) = self.sink.add_entry(&record) {
            tracing::error!(rig = %self.name, error = %e, "could not log data row");
        }

        Ok(TickOutcome {
            weights: reading.weights,
            needs_water,
            verdicts,
            watered,
            failed,
            halted,
        })
    }

    fn persist_progress(&self) {
        if let Err(e) = self.store.save_history(&self.safety.snapshot()) {
            tracing::warn!(rig = %self.name, error = %e, "could not persist history");
        }
        let progress: Vec<_> = self.schedules.iter().map(WateringSchedule::snapshot).collect();
        if let Err(e) = self.store.save_schedules(&progress) {
            tracing::warn!(rig = %self.name, error = %e, "could not persist schedules");
        }
    }

    /// Adjust intensities of channels watered on the previous tick from how
    /// much their weight changed since. Returns whether any level changed.
    fn update_intensities(&mut self, weights: &[f64]) -> bool {
        let Some((prev_weights, prev_watered)) = &self.previous else {
            return false;
        };
        let t = self.tuning;
        let mut changed = false;
        for i in 0..self.intensities.len() {
            if !prev_watered.get(i).copied().unwrap_or(false) {
                continue;
            }
            let (Some(now), Some(before)) = (weights.get(i), prev_weights.get(i)) else {
                continue;
            };
            let delta = now - before;
            if delta < t.low_threshold_g {
                if self.low_repeats[i] >= t.max_low_repeats {
                    self.intensities[i] += 1;
                    self.low_repeats[i] = 0;
                    changed = true;
                    tracing::info!(rig = %self.name, channel = i, intensity = self.intensities[i], delta, "intensity raised");
                } else {
                    self.low_repeats[i] += 1;
                }
            } else if delta > t.high_threshold_g {
                let lowered = self.intensities[i].saturating_sub(t.lowering_rate);
                changed |= lowered != self.intensities[i];
                self.intensities[i] = lowered;
                self.low_repeats[i] = 0;
                tracing::info!(rig = %self.name, channel = i, intensity = lowered, delta, "intensity lowered");
            }
        }
        changed
    }

    /// Move the stepper to an absolute position, persisting the target first.
    pub fn move_stepper_safe(&mut self, target: i64, detach: bool) -> Result<()> {
        let start = self.stepper_pos;
        if start == target {
            return Ok(());
        }
        self.store.save_stepper(target)?;
        self.stepper_pos = target;
        if let Err(e) = self.link.cmd_stepper(target - start, detach) {
            self.stepper_pos = start;
            if let Err(se) = self.store.save_stepper(start) {
                tracing::error!(rig = %self.name, error = %se, "could not restore stepper record");
            }
            tracing::error!(
                rig = %self.name,
                from = start,
                to = target,
                critical = true,
                error = %e,
                "stepper move failed, presuming it never moved"
            );
            return Err(eyre::Report::new(WatererError::Link(e)));
        }
        Ok(())
    }

    /// Position the nozzle over `channel` and run the pump at `intensity`.
    pub fn water(&mut self, channel: usize, intensity: u32) -> Result<()> {
        let ch = self
            .channels
            .get(channel)
            .cloned()
            .ok_or_else(|| eyre::Report::new(WatererError::NoSuchChannel(channel)))?;
        self.move_stepper_safe(ch.position.stepper, true)?;
        self.clock.sleep(self.settle);
        self.link
            .cmd_servo(ch.position.servo)
            .map_err(WatererError::Link)?;
        let (ms, pct) = ch.pump_for(intensity);
        self.link.cmd_pump(ms, pct).map_err(WatererError::Link)?;
        if let Err(e) = self.link.servo_attach(false) {
            tracing::warn!(rig = %self.name, error = %e, "could not detach servo");
        }
        Ok(())
    }

    /// Water one channel by hand, recording it if a recorder is attached.
    pub fn water_test(&mut self, channel: usize, intensity: u32) -> Result<()> {
        let recording = self.recorder.as_ref().is_some_and(|r| r.try_start());
        let res = self.water(channel, intensity);
        if recording && let Some(r) = &self.recorder {
            r.schedule_stop(self.recorder_stop_delay);
        }
        res
    }

    /// Visit every channel position. `at_position` is called with the
    /// nozzle in place.
    pub fn show_positions(&mut self, mut at_position: impl FnMut(usize, Position)) -> Result<()> {
        for i in 0..self.n_channels() {
            let pos = self.channels[i].position;
            self.link
                .cmd_servo(NEUTRAL_SERVO)
                .map_err(WatererError::Link)?;
            self.move_stepper_safe(pos.stepper, true)?;
            self.link.cmd_servo(pos.servo).map_err(WatererError::Link)?;
            at_position(i, pos);
        }
        self.link.servo_attach(false).map_err(WatererError::Link)?;
        Ok(())
    }

    /// Return the stepper to position 0.
    pub fn go_home(&mut self) -> Result<()> {
        self.link
            .cmd_servo(NEUTRAL_SERVO)
            .map_err(WatererError::Link)?;
        self.move_stepper_safe(0, true)?;
        self.link.servo_attach(false).map_err(WatererError::Link)?;
        Ok(())
    }

    /// Clear a disabled channel and persist the change.
    pub fn enable_channel(&mut self, channel: usize) -> Result<()> {
        if channel >= self.n_channels() {
            return Err(eyre::Report::new(WatererError::NoSuchChannel(channel)));
        }
        self.safety.enable(channel);
        if self.safety.take_disabled_dirty() {
            self.store.save_disabled(self.safety.disabled())?;
        }
        Ok(())
    }

    fn release_motors(&mut self) {
        if let Err(e) = self.link.stepper_attach(false) {
            tracing::warn!(rig = %self.name, error = %e, "could not detach stepper");
        }
        if let Err(e) = self.link.servo_attach(false) {
            tracing::warn!(rig = %self.name, error = %e, "could not detach servo");
        }
    }

    /// First calibration phase: measure the empty scale. The offsets are
    /// also cached so the second phase can be resumed later.
    pub fn calibrate_offset(&mut self, n: usize) -> Result<()> {
        self.release_motors();
        self.scale
            .calibrate_offset(&mut self.link, n, self.acquisition.err_limit)?;
        if let Some(cache) = self.scale.offset_cache() {
            self.store.save_offset_cache(&cache)?;
        }
        Ok(())
    }

    /// Reuse offsets from an interrupted calibration. Returns whether any
    /// were found.
    pub fn resume_offset(&mut self) -> Result<bool> {
        match self.store.load_offset_cache()? {
            Some(cache) => {
                self.scale.apply_offset_cache(&cache)?;
                tracing::info!(rig = %self.name, "resumed cached offsets");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Second calibration phase: measure known loads, then save the full
    /// calibration and drop the offset cache.
    pub fn calibrate_slope(&mut self, known: &[Uncertain], n: usize) -> Result<()> {
        self.release_motors();
        self.scale
            .calibrate_slope(&mut self.link, known, n, self.acquisition.err_limit)?;
        self.scale.save(&self.calibration_path)?;
        self.store.clear_offset_cache()?;
        tracing::info!(rig = %self.name, path = %self.calibration_path.display(), "calibration saved");
        Ok(())
    }
}

/// Type-state marker: mandatory component not provided yet.
pub struct Missing;
/// Type-state marker: mandatory component provided.
pub struct Set;

struct RigOptions {
    name: Option<String>,
    link: LinkCfg,
    acquisition: AcquisitionCfg,
    tuning: TuningCfg,
    safety: SafetyLimits,
    store: Option<StateStore>,
    calibration_path: Option<PathBuf>,
    sink: Option<Box<dyn DataSink + Send>>,
    recorder: Option<Arc<RecorderGuard>>,
    recorder_stop_delay: Duration,
    settle: Duration,
    handshake_attempts: u32,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    halt: Option<Arc<AtomicBool>>,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            name: None,
            link: LinkCfg::default(),
            acquisition: AcquisitionCfg::default(),
            tuning: TuningCfg::default(),
            safety: SafetyLimits::default(),
            store: None,
            calibration_path: None,
            sink: None,
            recorder: None,
            recorder_stop_delay: Duration::from_secs(5),
            settle: Duration::from_millis(500),
            handshake_attempts: 20,
            clock: None,
            halt: None,
        }
    }
}

/// Builder for [`Rig`]; `T` is the transport type, `TS`/`CS` track whether
/// the transport and the channels were provided.
pub struct RigBuilder<T, TS, CS> {
    transport: Option<T>,
    channels: Option<Vec<ChannelSpec>>,
    opts: RigOptions,
    _ts: PhantomData<TS>,
    _cs: PhantomData<CS>,
}

impl<T> Default for RigBuilder<T, Missing, Missing> {
    fn default() -> Self {
        Self {
            transport: None,
            channels: None,
            opts: RigOptions::default(),
            _ts: PhantomData,
            _cs: PhantomData,
        }
    }
}

impl<T, TS, CS> RigBuilder<T, TS, CS> {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.opts.name = Some(name.into());
        self
    }

    pub fn with_link(mut self, link: LinkCfg) -> Self {
        self.opts.link = link;
        self
    }

    pub fn with_acquisition(mut self, acquisition: AcquisitionCfg) -> Self {
        self.opts.acquisition = acquisition;
        self
    }

    pub fn with_tuning(mut self, tuning: TuningCfg) -> Self {
        self.opts.tuning = tuning;
        self
    }

    pub fn with_safety(mut self, safety: SafetyLimits) -> Self {
        self.opts.safety = safety;
        self
    }

    pub fn with_store(mut self, store: StateStore) -> Self {
        self.opts.store = Some(store);
        self
    }

    /// Calibration file; relative paths are resolved inside the store.
    pub fn with_calibration_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.opts.calibration_path = Some(path.into());
        self
    }

    pub fn with_data_sink(mut self, sink: Box<dyn DataSink + Send>) -> Self {
        self.opts.sink = Some(sink);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<RecorderGuard>, stop_delay: Duration) -> Self {
        self.opts.recorder = Some(recorder);
        self.opts.recorder_stop_delay = stop_delay;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.opts.settle = settle;
        self
    }

    pub fn with_handshake_attempts(mut self, n: u32) -> Self {
        self.opts.handshake_attempts = n.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.opts.clock = Some(clock);
        self
    }

    /// Share a halt flag, e.g. with the maintenance trigger.
    pub fn with_halt_flag(mut self, halt: Arc<AtomicBool>) -> Self {
        self.opts.halt = Some(halt);
        self
    }
}

impl<T, CS> RigBuilder<T, Missing, CS> {
    pub fn with_transport(self, transport: T) -> RigBuilder<T, Set, CS> {
        RigBuilder {
            transport: Some(transport),
            channels: self.channels,
            opts: self.opts,
            _ts: PhantomData,
            _cs: PhantomData,
        }
    }
}

impl<T, TS> RigBuilder<T, TS, Missing> {
    pub fn with_channels(self, channels: Vec<ChannelSpec>) -> RigBuilder<T, TS, Set> {
        RigBuilder {
            transport: self.transport,
            channels: Some(channels),
            opts: self.opts,
            _ts: PhantomData,
            _cs: PhantomData,
        }
    }
}

impl<T: Transport, TS, CS> RigBuilder<T, TS, CS> {
    /// Fallible build available in any type-state.
    pub fn try_build(self) -> Result<Rig<T>> {
        let RigBuilder {
            transport,
            channels,
            opts,
            _ts: _,
            _cs: _,
        } = self;
        let transport = transport.ok_or_else(|| eyre::Report::new(BuildError::MissingTransport))?;
        let channels = channels
            .filter(|c| !c.is_empty())
            .ok_or_else(|| eyre::Report::new(BuildError::MissingChannels))?;
        opts.tuning.validate()?;
        opts.safety.validate()?;
        if opts.acquisition.n_statistics == 0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "n_statistics must be > 0".into(),
            )));
        }
        if let Some(i) = channels
            .iter()
            .position(|c| !crate::link::SERVO_RANGE.contains(&c.position.servo))
        {
            return Err(eyre::Report::new(BuildError::InvalidConfig(format!(
                "channel {i} servo angle must be in [1, 179]"
            ))));
        }

        let clock: Arc<dyn Clock + Send + Sync> = opts
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let name = opts.name.unwrap_or_else(|| "rig".to_owned());
        let n = channels.len();
        let schedules = channels
            .iter()
            .map(|c| WateringSchedule::new(c.steps.clone(), c.cyclic, Arc::clone(&clock)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let store = opts
            .store
            .unwrap_or_else(|| StateStore::new(PathBuf::from("data").join(&name)));
        let calibration_path = store.dir().join(
            opts.calibration_path
                .unwrap_or_else(|| PathBuf::from("calibration.json")),
        );
        let sink = opts
            .sink
            .unwrap_or_else(|| Box::new(CsvDataLog::new(store.path("data.csv"), n)));
        let scale = CalibratedScale::new(ScaleSettings {
            n_channels: n,
            n_statistics: opts.acquisition.n_statistics,
            n_arduino_samples: opts.acquisition.n_arduino_samples,
            err_limit: opts.acquisition.err_limit,
        });

        Ok(Rig {
            link: SerialLink::new(transport, opts.link, Arc::clone(&clock)),
            scale,
            acquisition: opts.acquisition,
            schedules,
            safety: SafetyMonitor::new(n, opts.safety)?,
            tuning: opts.tuning,
            intensities: vec![0; n],
            low_repeats: vec![0; n],
            previous: None,
            stepper_pos: 0,
            store,
            calibration_path,
            sink,
            recorder: opts.recorder,
            recorder_stop_delay: opts.recorder_stop_delay,
            settle: opts.settle,
            handshake_attempts: opts.handshake_attempts,
            halt: opts.halt.unwrap_or_default(),
            clock,
            channels,
            name,
        })
    }
}

impl<T: Transport> RigBuilder<T, Set, Set> {
    /// Validate and build. Only available once transport and channels are set.
    pub fn build(self) -> Result<Rig<T>> {
        self.try_build()
    }
}
