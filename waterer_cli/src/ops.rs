//! Command implementations: rig assembly from config and the operator commands.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use eyre::{Result, WrapErr};
use serde_json::json;
use waterer_config::{Config, RigCfg};
use waterer_core::{
    LogRecorder, RecorderGuard, Rig, RunnerSettings, WatererError, parse_known_weights,
    rig_builder_from_config, run_rigs,
};
use waterer_traits::{Clock, MonotonicClock};

#[cfg(feature = "hardware")]
pub type Backend = waterer_hardware::SerialPortTransport;
#[cfg(not(feature = "hardware"))]
pub type Backend = waterer_hardware::SimulatedRig;

#[cfg(feature = "hardware")]
fn open_backend(cfg: &RigCfg) -> Result<Backend> {
    let port = waterer_hardware::SerialPortTransport::open(
        &cfg.serial.port,
        cfg.serial.baud_rate,
        Duration::from_millis(cfg.serial.timeout_ms),
    )
    .wrap_err_with(|| format!("open serial port {}", cfg.serial.port))?;
    Ok(port)
}

#[cfg(not(feature = "hardware"))]
fn open_backend(cfg: &RigCfg) -> Result<Backend> {
    let n = cfg.channels.len();
    tracing::info!(rig = %cfg.name, channels = n, "using simulated board");
    Ok(
        waterer_hardware::SimulatedRig::new(vec![cfg.sim.initial_weight_g; n])
            .with_positions(cfg.channels.iter().map(|c| c.stepper).collect())
            .with_flow(cfg.sim.flow_g_per_s)
            .with_evaporation(cfg.sim.evaporation_g),
    )
}

/// Shared pieces every rig of one process is built with.
pub struct Session {
    clock: Arc<dyn Clock + Send + Sync>,
    halt: Arc<AtomicBool>,
    recorder: Option<Arc<RecorderGuard>>,
    json: bool,
}

impl Session {
    pub fn new(json: bool) -> Self {
        Self {
            clock: Arc::new(MonotonicClock::new()),
            halt: Arc::new(AtomicBool::new(false)),
            recorder: None,
            json,
        }
    }

    /// Build and bring up one rig. All rigs with a recorder share one guard.
    fn open(&mut self, cfg: &RigCfg) -> Result<Rig<Backend>> {
        let mut builder = rig_builder_from_config::<Backend>(
            cfg,
            Arc::clone(&self.clock),
            Arc::clone(&self.halt),
        )?
        .with_transport(open_backend(cfg)?);
        if cfg.recorder.enabled {
            let clock = Arc::clone(&self.clock);
            let guard = self
                .recorder
                .get_or_insert_with(|| Arc::new(RecorderGuard::new(Box::new(LogRecorder), clock)));
            builder = builder.with_recorder(
                Arc::clone(guard),
                Duration::from_secs(cfg.recorder.stop_delay_s),
            );
        }
        let mut rig = builder.build()?;
        rig.begin()
            .wrap_err_with(|| format!("bring-up of rig '{}' failed", cfg.name))?;
        Ok(rig)
    }

    fn print(&self, value: &serde_json::Value, text: impl FnOnce() -> String) {
        if self.json {
            println!("{value}");
        } else {
            println!("{}", text());
        }
    }
}

fn no_such_rig(name: &str) -> eyre::Report {
    eyre::eyre!("no rig named '{name}' in the configuration")
}

/// Rigs selected by `--rig`, or every rig.
fn select_rigs<'a>(cfg: &'a Config, name: Option<&str>) -> Result<Vec<&'a RigCfg>> {
    match name {
        Some(n) => Ok(vec![cfg.rig(n).ok_or_else(|| no_such_rig(n))?]),
        None => Ok(cfg.rigs.iter().collect()),
    }
}

/// The single rig a maintenance command acts on.
pub fn single_rig<'a>(cfg: &'a Config, name: Option<&str>) -> Result<&'a RigCfg> {
    match (name, cfg.rigs.as_slice()) {
        (Some(n), _) => cfg.rig(n).ok_or_else(|| no_such_rig(n)),
        (None, [only]) => Ok(only),
        (None, _) => eyre::bail!("several rigs are configured; pick one with --rig"),
    }
}

pub fn run(
    session: &mut Session,
    cfg: &Config,
    rig: Option<&str>,
    max_passes: Option<u64>,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mut rigs = select_rigs(cfg, rig)?
        .into_iter()
        .map(|r| session.open(r))
        .collect::<Result<Vec<_>>>()?;
    let mut settings = RunnerSettings::from(&cfg.runner);
    settings.max_passes = max_passes;

    let halt = Arc::clone(&session.halt);
    let clock = Arc::clone(&session.clock);
    let summary = run_rigs(&mut rigs, settings, &halt, shutdown, clock.as_ref())?;
    session.print(
        &json!({
            "passes": summary.passes,
            "ticks": summary.ticks,
            "waterings": summary.waterings,
        }),
        || {
            format!(
                "run finished: {} passes, {} ticks, {} waterings",
                summary.passes, summary.ticks, summary.waterings
            )
        },
    );
    Ok(())
}

pub fn weights(session: &mut Session, cfg: &RigCfg, samples: Option<usize>) -> Result<()> {
    let mut rig = session.open(cfg)?;
    let n = samples.unwrap_or(cfg.scale.n_statistics);
    let reading = rig
        .read_weights(n)?
        .ok_or_else(|| eyre::Report::new(WatererError::NoSamples))?;
    session.print(
        &json!({
            "rig": cfg.name,
            "weights": reading.weights,
            "n_filtered": reading.n_filtered,
            "n_unsuccessful": reading.n_unsuccessful,
        }),
        || {
            reading
                .weights
                .iter()
                .zip(&reading.n_filtered)
                .enumerate()
                .map(|(i, (w, f))| {
                    format!("channel {i}: {:.1} ± {:.2} g ({f} filtered)", w.value, w.stderr)
                })
                .collect::<Vec<_>>()
                .join("\n")
        },
    );
    Ok(())
}

pub fn water_test(session: &mut Session, cfg: &RigCfg, channel: usize, intensity: u32) -> Result<()> {
    let mut rig = session.open(cfg)?;
    rig.water_test(channel, intensity)?;
    session.print(
        &json!({ "rig": cfg.name, "channel": channel, "intensity": intensity }),
        || format!("watered channel {channel} at intensity {intensity}"),
    );
    Ok(())
}

pub fn positions(session: &mut Session, cfg: &RigCfg, pause: Duration) -> Result<()> {
    let mut rig = session.open(cfg)?;
    let clock = Arc::clone(&session.clock);
    let json = session.json;
    rig.show_positions(|i, pos| {
        if json {
            println!(
                "{}",
                json!({ "channel": i, "stepper": pos.stepper, "servo": pos.servo })
            );
        } else {
            println!("channel {i}: stepper {} servo {}", pos.stepper, pos.servo);
        }
        clock.sleep(pause);
    })?;
    Ok(())
}

pub fn home(session: &mut Session, cfg: &RigCfg) -> Result<()> {
    let mut rig = session.open(cfg)?;
    rig.go_home()?;
    session.print(&json!({ "rig": cfg.name, "stepper": 0 }), || {
        "stepper at 0".to_owned()
    });
    Ok(())
}

pub fn enable_channel(session: &mut Session, cfg: &RigCfg, channel: usize) -> Result<()> {
    let mut rig = session.open(cfg)?;
    rig.enable_channel(channel)?;
    session.print(&json!({ "rig": cfg.name, "enabled": channel }), || {
        format!("channel {channel} enabled")
    });
    Ok(())
}

pub fn self_check(session: &mut Session, cfg: &RigCfg) -> Result<()> {
    let rig = session.open(cfg)?;
    let disabled: Vec<usize> = rig
        .safety()
        .disabled()
        .iter()
        .enumerate()
        .filter_map(|(i, d)| d.then_some(i))
        .collect();
    session.print(
        &json!({
            "status": "ok",
            "rig": rig.name(),
            "channels": rig.n_channels(),
            "calibrated": rig.scale().is_calibrated(),
            "stepper": rig.stepper_position(),
            "disabled": disabled,
        }),
        || {
            format!(
                "ok: rig '{}' answers with {} load cells (calibrated: {}, stepper at {}, disabled: {disabled:?})",
                rig.name(),
                rig.n_channels(),
                rig.scale().is_calibrated(),
                rig.stepper_position()
            )
        },
    );
    Ok(())
}

pub fn calibrate_offset(session: &mut Session, cfg: &RigCfg, samples: usize) -> Result<()> {
    let mut rig = session.open(cfg)?;
    rig.calibrate_offset(samples)?;
    session.print(&json!({ "rig": cfg.name, "phase": "offset" }), || {
        "offsets measured and cached; place the known loads and run `calibrate slope`".to_owned()
    });
    Ok(())
}

pub fn calibrate_slope(
    session: &mut Session,
    cfg: &RigCfg,
    known: &str,
    samples: usize,
) -> Result<()> {
    let mut rig = session.open(cfg)?;
    let known = parse_known_weights(known, rig.n_channels())?;
    if !rig.resume_offset()? {
        return Err(eyre::Report::new(WatererError::CalibrationRejected(
            "no cached offsets; run `calibrate offset` first".into(),
        )));
    }
    rig.calibrate_slope(&known, samples)?;
    session.print(&json!({ "rig": cfg.name, "phase": "slope" }), || {
        "calibration saved".to_owned()
    });
    Ok(())
}

fn prompt(message: &str) -> Result<String> {
    let mut out = std::io::stdout().lock();
    write!(out, "{message}")?;
    out.flush()?;
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line)? == 0 {
        eyre::bail!("input closed while waiting for the operator");
    }
    Ok(line.trim().to_owned())
}

pub fn calibrate_interactive(
    session: &mut Session,
    cfg: &RigCfg,
    samples: usize,
    resume: bool,
) -> Result<()> {
    let mut rig = session.open(cfg)?;
    if resume && rig.resume_offset()? {
        println!("using cached offsets");
    } else {
        prompt("Empty all scales, then press Enter ")?;
        rig.calibrate_offset(samples)?;
    }
    let known = loop {
        let input = prompt("Place the known loads and enter them as (w1,w2,...)-err: ")?;
        match parse_known_weights(&input, rig.n_channels()) {
            Ok(k) => break k,
            Err(e) => println!("{e}"),
        }
    };
    rig.calibrate_slope(&known, samples)?;
    println!("calibration saved");
    Ok(())
}
