//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "waterer", version, about = "Plant-watering rig controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/waterer.toml")]
    pub config: PathBuf,

    /// Rig to operate on (by name); `run` services every rig when omitted
    #[arg(long, value_name = "NAME", global = true)]
    pub rig: Option<String>,

    /// Log as JSON lines instead of pretty, and print results as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides [logging].level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Service the rigs until Ctrl-C
    Run {
        /// Stop after this many passes over all rigs
        #[arg(long, value_name = "N")]
        max_passes: Option<u64>,
    },
    /// Calibrate the load cells of one rig
    Calibrate {
        #[command(subcommand)]
        step: CalibrateStep,
    },
    /// Print calibrated weights
    Weights {
        /// Raw reads to aggregate (defaults to [rigs.scale].n_statistics)
        #[arg(long, value_name = "N")]
        samples: Option<usize>,
    },
    /// Water one channel by hand
    WaterTest {
        /// Channel index (0-based)
        #[arg(long)]
        channel: usize,
        /// Intensity level fed to the pump ramps
        #[arg(long, default_value_t = 0)]
        intensity: u32,
    },
    /// Visit every channel position in turn
    Positions {
        /// How long to stay at each position
        #[arg(long, value_name = "MS", default_value_t = 2000)]
        pause_ms: u64,
    },
    /// Return the stepper to position 0
    Home,
    /// Re-enable a channel disabled by the safety monitor
    EnableChannel {
        /// Channel index (0-based)
        #[arg(long)]
        channel: usize,
    },
    /// Quick health check (handshake and load-cell count)
    SelfCheck,
}

#[derive(Subcommand, Debug)]
pub enum CalibrateStep {
    /// Measure the empty scale; offsets are cached for `slope`
    Offset {
        #[arg(long, value_name = "N", default_value_t = 100)]
        samples: usize,
    },
    /// Measure known loads and save the calibration
    Slope {
        /// Known loads as `(w1,w2,...)-err`, one weight per channel
        #[arg(long, value_name = "WEIGHTS")]
        known: String,
        #[arg(long, value_name = "N", default_value_t = 100)]
        samples: usize,
    },
    /// Both phases, prompting on the terminal in between
    Interactive {
        #[arg(long, value_name = "N", default_value_t = 100)]
        samples: usize,
        /// Reuse offsets cached by an interrupted run instead of measuring
        #[arg(long, action = ArgAction::SetTrue)]
        resume: bool,
    },
}
