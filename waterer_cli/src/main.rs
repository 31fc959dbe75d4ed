#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `waterer` command line: run the watering loop or operate a rig by hand.
//!
//! Built without the `hardware` feature, every rig talks to an in-process
//! simulated board configured by `[rigs.sim]`.

mod cli;
mod error_fmt;
mod ops;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use eyre::WrapErr;
use waterer_config::{Config, Logging};

use crate::cli::{CalibrateStep, Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::ops::Session;

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = real_main(cli) {
        tracing::error!(error = %e, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", error_fmt::format_error_json(&e));
        } else {
            eprintln!("{}", error_fmt::humanize(&e));
        }
        std::process::exit(error_fmt::exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(&cli.config)?;
    init_tracing(&cfg.logging, cli.json, cli.log_level.as_deref())?;
    tracing::debug!(config = %cli.config.display(), rigs = cfg.rigs.len(), "config loaded");

    let mut session = Session::new(cli.json);
    let rig = cli.rig.as_deref();
    match cli.cmd {
        Commands::Run { max_passes } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&shutdown);
            ctrlc::set_handler(move || {
                flag.store(true, Ordering::SeqCst);
                tracing::warn!("shutdown requested, finishing current tick");
            })
            .wrap_err("failed to install Ctrl-C handler")?;
            ops::run(&mut session, &cfg, rig, max_passes, &shutdown)
        }
        Commands::Calibrate { step } => {
            let rig_cfg = ops::single_rig(&cfg, rig)?;
            match step {
                CalibrateStep::Offset { samples } => {
                    ops::calibrate_offset(&mut session, rig_cfg, samples)
                }
                CalibrateStep::Slope { known, samples } => {
                    ops::calibrate_slope(&mut session, rig_cfg, &known, samples)
                }
                CalibrateStep::Interactive { samples, resume } => {
                    ops::calibrate_interactive(&mut session, rig_cfg, samples, resume)
                }
            }
        }
        Commands::Weights { samples } => {
            ops::weights(&mut session, ops::single_rig(&cfg, rig)?, samples)
        }
        Commands::WaterTest { channel, intensity } => ops::water_test(
            &mut session,
            ops::single_rig(&cfg, rig)?,
            channel,
            intensity,
        ),
        Commands::Positions { pause_ms } => ops::positions(
            &mut session,
            ops::single_rig(&cfg, rig)?,
            Duration::from_millis(pause_ms),
        ),
        Commands::Home => ops::home(&mut session, ops::single_rig(&cfg, rig)?),
        Commands::EnableChannel { channel } => {
            ops::enable_channel(&mut session, ops::single_rig(&cfg, rig)?, channel)
        }
        Commands::SelfCheck => ops::self_check(&mut session, ops::single_rig(&cfg, rig)?),
    }
}

fn load_config(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
    let cfg = waterer_config::load_toml(&text)?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

/// Console logs go to stderr so `--json` results on stdout stay parseable.
/// `[logging].file` adds a JSON-lines file sink with optional rotation.
fn init_tracing(logging: &Logging, json: bool, cli_level: Option<&str>) -> eyre::Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = match cli_level {
        Some(level) => EnvFilter::try_new(level)
            .wrap_err_with(|| format!("invalid --log-level '{level}'"))?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(logging.level.as_deref().unwrap_or("info")))
            .wrap_err("invalid logging.level")?,
    };

    let console = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    };

    let file = match logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file '{file}' has no file name"))?;
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("failed to install tracing subscriber")?;
    Ok(())
}
