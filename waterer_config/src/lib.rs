#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the watering controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - One `[[rigs]]` table per controller board; each rig lists its pots as
//!   `[[rigs.channels]]` with a position, two pump ramps and a schedule.
//! - `validate()` rejects anything that would otherwise fail at runtime, so a
//!   bad file never touches hardware.
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunnerCfg {
    /// Pause between full round-robin passes over all rigs.
    pub tick_interval_ms: u64,
    /// Poll interval while the maintenance halt is active.
    pub halt_poll_ms: u64,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10_000,
            halt_poll_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SerialCfg {
    pub port: String,
    pub baud_rate: u32,
    /// Per-read timeout of the port itself.
    pub timeout_ms: u64,
    /// Fixed wait between writing a command and reading its reply.
    pub delay_ms: u64,
    /// Upper bound on waiting for the payload that follows an `rcv` sentinel.
    pub long_timeout_ms: u64,
    pub n_retries: u32,
    /// How long a cached `hx_n` answer stays valid.
    pub hx_n_ttl_s: u64,
}

impl Default for SerialCfg {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_owned(),
            baud_rate: 9600,
            timeout_ms: 3000,
            delay_ms: 500,
            long_timeout_ms: 30_000,
            n_retries: 3,
            hx_n_ttl_s: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScaleCfg {
    /// Raw reads per statistics batch.
    pub n_statistics: usize,
    /// Samples the board averages per `hx` call.
    pub n_arduino_samples: u32,
    /// Largest acceptable calibration uncertainty, per channel.
    pub err_limit: f64,
    /// Sleep before retrying a failed tick read.
    pub read_retry_ms: u64,
    /// Where calibration is stored, relative to the rig storage dir when not absolute.
    pub calibration_file: String,
}

impl Default for ScaleCfg {
    fn default() -> Self {
        Self {
            n_statistics: 50,
            n_arduino_samples: 10,
            err_limit: 1.0,
            read_retry_ms: 1000,
            calibration_file: "calibration.json".to_owned(),
        }
    }
}

/// Auto-tuning of per-pot watering intensity.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TuningCfg {
    /// A watering that raised the weight by less than this counts as "low".
    pub low_threshold_g: f64,
    /// A watering that raised the weight by more than this lowers intensity.
    pub high_threshold_g: f64,
    /// Consecutive low waterings tolerated before intensity goes up.
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SafetyCfg {
    /// Entries kept per channel history ring.
    pub history_len: usize,
    /// Intensity at or above which a watering counts as "intense".
    pub intense_level: u32,
    /// Negative readings tolerated across history before a channel is disabled.
    pub max_negative: usize,
    /// Below this weight a pot is presumed missing (warning only).
    pub no_pot_g: f64,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            history_len: 30,
            intense_level: 10,
            max_negative: 5,
            no_pot_g: 50.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RecorderCfg {
    pub enabled: bool,
    pub stop_delay_s: u64,
}

impl Default for RecorderCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            stop_delay_s: 5,
        }
    }
}

/// Parameters of the simulated board used when built without `hardware`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimCfg {
    pub initial_weight_g: f64,
    pub flow_g_per_s: f64,
    pub evaporation_g: f64,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            initial_weight_g: 300.0,
            flow_g_per_s: 10.0,
            evaporation_g: 0.0,
        }
    }
}

/// Clamped linear ramp: `initial_value` up to `n_steps_not_incrementing`,
/// `final_value` from `n_steps` on.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RampCfg {
    pub initial_value: i64,
    pub final_value: i64,
    pub n_steps: u32,
    #[serde(default)]
    pub n_steps_not_incrementing: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StepCfg {
    pub target_weight: f64,
    #[serde(default)]
    pub hold_s: u64,
    #[serde(default)]
    pub weight_threshold: f64,
    #[serde(default)]
    pub max_weight_deviation: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleCfg {
    #[serde(default)]
    pub cyclic: bool,
    pub steps: Vec<StepCfg>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelCfg {
    pub stepper: i64,
    pub servo: u8,
    pub pump_duration: RampCfg,
    pub pump_power: RampCfg,
    pub schedule: ScheduleCfg,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RigCfg {
    pub name: String,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    #[serde(default)]
    pub serial: SerialCfg,
    #[serde(default)]
    pub scale: ScaleCfg,
    #[serde(default)]
    pub tuning: TuningCfg,
    #[serde(default)]
    pub safety: SafetyCfg,
    #[serde(default)]
    pub recorder: RecorderCfg,
    #[serde(default)]
    pub sim: SimCfg,
    pub channels: Vec<ChannelCfg>,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub runner: RunnerCfg,
    pub rigs: Vec<RigCfg>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl RampCfg {
    fn validate(&self, at: &str) -> eyre::Result<()> {
        if self.initial_value > self.final_value {
            eyre::bail!("{at}.initial_value must be <= final_value");
        }
        if self.n_steps < self.n_steps_not_incrementing {
            eyre::bail!("{at}.n_steps must be >= n_steps_not_incrementing");
        }
        Ok(())
    }
}

impl StepCfg {
    fn validate(&self, at: &str) -> eyre::Result<()> {
        if !self.target_weight.is_finite() {
            eyre::bail!("{at}.target_weight must be finite");
        }
        if self.weight_threshold.is_nan() || self.weight_threshold < 0.0 {
            eyre::bail!("{at}.weight_threshold must be >= 0");
        }
        if let Some(dev) = self.max_weight_deviation {
            if dev.is_nan() || dev < 0.0 {
                eyre::bail!("{at}.max_weight_deviation must be >= 0");
            }
            if self.weight_threshold - 1.0 >= dev {
                eyre::bail!("{at}.max_weight_deviation must be > weight_threshold - 1");
            }
        }
        Ok(())
    }
}

impl RigCfg {
    pub fn validate(&self, at: &str) -> eyre::Result<()> {
        if self.name.trim().is_empty() {
            eyre::bail!("{at}.name must not be empty");
        }
        if self.channels.is_empty() {
            eyre::bail!("{at}.channels must list at least one channel");
        }

        // Serial
        if self.serial.port.is_empty() {
            eyre::bail!("{at}.serial.port must not be empty");
        }
        if self.serial.baud_rate == 0 {
            eyre::bail!("{at}.serial.baud_rate must be > 0");
        }
        if self.serial.n_retries == 0 {
            eyre::bail!("{at}.serial.n_retries must be >= 1");
        }
        if self.serial.timeout_ms == 0 {
            eyre::bail!("{at}.serial.timeout_ms must be >= 1");
        }

        // Scale
        if self.scale.n_statistics == 0 {
            eyre::bail!("{at}.scale.n_statistics must be >= 1");
        }
        if self.scale.n_arduino_samples == 0 {
            eyre::bail!("{at}.scale.n_arduino_samples must be >= 1");
        }
        if self.scale.err_limit.is_nan() || self.scale.err_limit <= 0.0 {
            eyre::bail!("{at}.scale.err_limit must be > 0");
        }

        // Tuning
        let (low, high) = (self.tuning.low_threshold_g, self.tuning.high_threshold_g);
        if low.is_nan() || high.is_nan() || low >= high {
            eyre::bail!("{at}.tuning.low_threshold_g must be < high_threshold_g");
        }

        // Safety
        if self.safety.history_len <= 15 {
            eyre::bail!("{at}.safety.history_len must be > 15");
        }

        for (i, ch) in self.channels.iter().enumerate() {
            let c = format!("{at}.channels[{i}]");
            if !(1..=179).contains(&ch.servo) {
                eyre::bail!("{c}.servo must be in [1, 179]");
            }
            ch.pump_duration.validate(&format!("{c}.pump_duration"))?;
            ch.pump_power.validate(&format!("{c}.pump_power"))?;
            if ch.pump_duration.initial_value < 0 {
                eyre::bail!("{c}.pump_duration values must be >= 0");
            }
            if ch.pump_power.initial_value < 0 || ch.pump_power.final_value > 100 {
                eyre::bail!("{c}.pump_power values must be in [0, 100]");
            }
            if ch.schedule.steps.is_empty() {
                eyre::bail!("{c}.schedule.steps must not be empty");
            }
            for (j, step) in ch.schedule.steps.iter().enumerate() {
                step.validate(&format!("{c}.schedule.steps[{j}]"))?;
            }
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        if self.rigs.is_empty() {
            eyre::bail!("at least one [[rigs]] entry is required");
        }
        let mut names = HashSet::new();
        for (i, rig) in self.rigs.iter().enumerate() {
            rig.validate(&format!("rigs[{i}]"))?;
            if !names.insert(rig.name.as_str()) {
                eyre::bail!("rigs[{i}].name '{}' is used by more than one rig", rig.name);
            }
        }

        // Runner
        if self.runner.halt_poll_ms == 0 {
            eyre::bail!("runner.halt_poll_ms must be >= 1");
        }

        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }

    /// Look up a rig by name.
    pub fn rig(&self, name: &str) -> Option<&RigCfg> {
        self.rigs.iter().find(|r| r.name == name)
    }
}
