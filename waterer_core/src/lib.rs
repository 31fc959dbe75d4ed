#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Control core of the plant-watering rig (hardware-agnostic).
//!
//! All board I/O goes through `waterer_traits::Transport`; time through
//! `waterer_traits::Clock`.
//!
//! ## Architecture
//!
//! - **Link**: line protocol with `rcv` sentinel and retries (`link`)
//! - **Scale**: batch reads, IQR filtering, offset/slope calibration with
//!   propagated uncertainty (`scale`, `stats`, `uncertain`)
//! - **Schedule**: per-channel multi-step watering program (`schedule`)
//! - **Planner**: stepper visiting order (`planner`)
//! - **Safety**: history-based veto and channel disablement (`safety`)
//! - **Controller**: the per-rig tick (`controller`), driven by `runner`
//!
//! Small state records (stepper position, disabled flags, intensities,
//! history, schedule progress) are JSON files managed by `store`.

pub mod controller;
pub mod conversions;
pub mod datalog;
pub mod error;
pub mod hw_error;
pub mod intensity;
pub mod link;
pub mod mocks;
pub mod planner;
pub mod recorder;
pub mod runner;
pub mod safety;
pub mod scale;
pub mod schedule;
pub mod stats;
pub mod store;
pub mod uncertain;

pub use controller::{
    AcquisitionCfg, ChannelSpec, Missing, Position, Rig, RigBuilder, Set, TickOutcome, TuningCfg,
};
pub use conversions::rig_builder_from_config;
pub use datalog::{CsvDataLog, DataSink, TickRecord};
pub use error::{BuildError, LinkError, Result, WatererError};
pub use intensity::IntensityConfig;
pub use link::{Dht, LinkCfg, SerialLink};
pub use recorder::{LogRecorder, RecorderGuard};
pub use runner::{RunSummary, RunnerSettings, attach_maintenance, run_rigs};
pub use safety::{SafetyLimits, SafetyMonitor, Verdict};
pub use scale::{CalibratedScale, Calibration, WeightReading, parse_known_weights};
pub use schedule::{ScheduleProgress, ScheduleStep, WateringSchedule};
pub use store::StateStore;
pub use uncertain::Uncertain;
