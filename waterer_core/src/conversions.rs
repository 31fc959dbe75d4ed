//! Bridges from `waterer_config` types to core types.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use waterer_traits::Clock;

use crate::controller::{AcquisitionCfg, ChannelSpec, Missing, Position, RigBuilder, Set, TuningCfg};
use crate::error::BuildError;
use crate::intensity::IntensityConfig;
use crate::link::LinkCfg;
use crate::runner::RunnerSettings;
use crate::safety::SafetyLimits;
use crate::schedule::ScheduleStep;
use crate::store::StateStore;

// ── Link ─────────────────────────────────────────────────────────────────────

impl From<&waterer_config::SerialCfg> for LinkCfg {
    fn from(c: &waterer_config::SerialCfg) -> Self {
        Self {
            delay: Duration::from_millis(c.delay_ms),
            long_timeout: Duration::from_millis(c.long_timeout_ms),
            n_retries: c.n_retries,
            hx_n_ttl: Duration::from_secs(c.hx_n_ttl_s),
        }
    }
}

// ── Acquisition / tuning / safety ────────────────────────────────────────────

impl From<&waterer_config::ScaleCfg> for AcquisitionCfg {
    fn from(c: &waterer_config::ScaleCfg) -> Self {
        Self {
            n_statistics: c.n_statistics,
            n_arduino_samples: c.n_arduino_samples,
            err_limit: c.err_limit,
            read_retry: Duration::from_millis(c.read_retry_ms),
        }
    }
}

impl From<&waterer_config::TuningCfg> for TuningCfg {
    fn from(c: &waterer_config::TuningCfg) -> Self {
        Self {
            low_threshold_g: c.low_threshold_g,
            high_threshold_g: c.high_threshold_g,
            max_low_repeats: c.max_low_repeats,
            lowering_rate: c.lowering_rate,
        }
    }
}

impl From<&waterer_config::SafetyCfg> for SafetyLimits {
    fn from(c: &waterer_config::SafetyCfg) -> Self {
        Self {
            history_len: c.history_len,
            intense_level: c.intense_level,
            max_negative: c.max_negative,
            no_pot_g: c.no_pot_g,
        }
    }
}

impl From<&waterer_config::RunnerCfg> for RunnerSettings {
    fn from(c: &waterer_config::RunnerCfg) -> Self {
        Self {
            tick_interval: Duration::from_millis(c.tick_interval_ms),
            halt_poll: Duration::from_millis(c.halt_poll_ms),
            max_passes: None,
        }
    }
}

// ── Channels ─────────────────────────────────────────────────────────────────

impl TryFrom<&waterer_config::RampCfg> for IntensityConfig {
    type Error = BuildError;

    fn try_from(c: &waterer_config::RampCfg) -> Result<Self, Self::Error> {
        Self::new(
            c.initial_value,
            c.final_value,
            c.n_steps,
            c.n_steps_not_incrementing,
        )
    }
}

impl TryFrom<&waterer_config::StepCfg> for ScheduleStep {
    type Error = BuildError;

    fn try_from(c: &waterer_config::StepCfg) -> Result<Self, Self::Error> {
        Self::new(
            c.target_weight,
            Duration::from_secs(c.hold_s),
            c.weight_threshold,
            c.max_weight_deviation,
        )
    }
}

impl TryFrom<&waterer_config::ChannelCfg> for ChannelSpec {
    type Error = BuildError;

    fn try_from(c: &waterer_config::ChannelCfg) -> Result<Self, Self::Error> {
        Ok(Self {
            position: Position {
                stepper: c.stepper,
                servo: c.servo,
            },
            pump_duration: (&c.pump_duration).try_into()?,
            pump_power: (&c.pump_power).try_into()?,
            steps: c
                .schedule
                .steps
                .iter()
                .map(ScheduleStep::try_from)
                .collect::<Result<_, _>>()?,
            cyclic: c.schedule.cyclic,
        })
    }
}

/// Builder preloaded from a rig section; only the transport is left to set.
///
/// State lives in `storage_dir/<name>/`.
pub fn rig_builder_from_config<T>(
    cfg: &waterer_config::RigCfg,
    clock: Arc<dyn Clock + Send + Sync>,
    halt: Arc<AtomicBool>,
) -> Result<RigBuilder<T, Missing, Set>, BuildError> {
    let channels = cfg
        .channels
        .iter()
        .map(ChannelSpec::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RigBuilder::default()
        .with_name(cfg.name.clone())
        .with_channels(channels)
        .with_link((&cfg.serial).into())
        .with_acquisition((&cfg.scale).into())
        .with_tuning((&cfg.tuning).into())
        .with_safety((&cfg.safety).into())
        .with_store(StateStore::new(cfg.storage_dir.join(&cfg.name)))
        .with_calibration_file(&cfg.scale.calibration_file)
        .with_clock(clock)
        .with_halt_flag(halt))
}
