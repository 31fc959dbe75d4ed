//! Shared fixtures for waterer_core integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use waterer_core::scale::{CalibratedScale, Calibration, ScaleSettings};
use waterer_core::{ChannelSpec, IntensityConfig, LinkCfg, Position, ScheduleStep, Uncertain};
use waterer_hardware::sim::{SIM_BASE_COUNTS, SIM_COUNTS_PER_GRAM};

pub fn fast_link() -> LinkCfg {
    LinkCfg {
        delay: Duration::ZERO,
        long_timeout: Duration::from_millis(50),
        n_retries: 2,
        hx_n_ttl: Duration::from_secs(300),
    }
}

pub fn channel(stepper: i64, servo: u8, target: f64) -> ChannelSpec {
    ChannelSpec {
        position: Position { stepper, servo },
        pump_duration: IntensityConfig::new(1000, 3000, 4, 0).unwrap(),
        pump_power: IntensityConfig::new(60, 100, 4, 0).unwrap(),
        steps: vec![ScheduleStep::new(target, Duration::ZERO, 5.0, None).unwrap()],
        cyclic: false,
    }
}

/// Channel whose every watering pours `ms` at full power.
pub fn constant_channel(stepper: i64, target: f64, ms: i64) -> ChannelSpec {
    ChannelSpec {
        pump_duration: IntensityConfig::constant(ms),
        pump_power: IntensityConfig::constant(100),
        ..channel(stepper, 45, target)
    }
}

fn save(dir: &Path, offsets: Vec<Uncertain>, slopes: Vec<Uncertain>) {
    let mut scale = CalibratedScale::new(ScaleSettings {
        n_channels: offsets.len(),
        n_statistics: 1,
        n_arduino_samples: 10,
        err_limit: 1.0,
    });
    scale.set_calibration(Calibration { offsets, slopes }).unwrap();
    scale.save(&dir.join("calibration.json")).unwrap();
}

/// Calibration where raw counts equal grams.
pub fn write_identity_calibration(dir: &Path, n: usize) {
    save(dir, vec![Uncertain::exact(0.0); n], vec![Uncertain::exact(1.0); n]);
}

/// Calibration matching the simulator's load cells.
pub fn write_sim_calibration(dir: &Path, n: usize) {
    let offsets = (0..n)
        .map(|i| Uncertain::exact(SIM_BASE_COUNTS + 100.0 * i as f64))
        .collect();
    save(dir, offsets, vec![Uncertain::exact(SIM_COUNTS_PER_GRAM); n]);
}
