//! Human-readable error descriptions and structured JSON error formatting.

use waterer_core::error::{BuildError, LinkError, WatererError};

fn link_hint(le: &LinkError) -> String {
    match le {
        LinkError::NoResponse { command } => format!(
            "What happened: The rig did not answer '{command}'.\nLikely causes: Board unplugged or still resetting, wrong serial port, or baud rate mismatch.\nHow to fix: Check the USB cable and [rigs.serial] port/baud_rate; raise serial.timeout_ms or long_timeout_ms if the board is slow."
        ),
        LinkError::Device { command, response } => format!(
            "What happened: The rig rejected '{command}' ({response}).\nLikely causes: Firmware does not support the command or an argument is out of range.\nHow to fix: Check channel positions and pump ramps in the config against the firmware limits."
        ),
        LinkError::Transport { command, reason } => format!(
            "What happened: Serial I/O failed during '{command}' ({reason}).\nLikely causes: Port closed by the OS, cable unplugged, or missing permissions.\nHow to fix: Reconnect the board and make sure the user may open the port (dialout group on Linux)."
        ),
        other => format!(
            "What happened: {other}.\nLikely causes: Line noise or a firmware/version mismatch.\nHow to fix: Re-run with --log-level=trace to see the raw serial traffic."
        ),
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingTransport => {
                "What happened: No transport was provided to the rig.\nLikely causes: The serial port or simulator failed to open.\nHow to fix: Check [rigs.serial] and that the board is connected.".to_string()
            }
            BuildError::MissingChannels => {
                "What happened: The rig has no channels.\nLikely causes: No [[rigs.channels]] entries for this rig.\nHow to fix: Add at least one channel to the config.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/waterer.toml for a sample."
            ),
        };
    }

    if let Some(we) = err.downcast_ref::<WatererError>() {
        return match we {
            WatererError::NotCalibrated => {
                "What happened: The scales are not calibrated.\nLikely causes: No calibration file in the rig's storage directory yet.\nHow to fix: Run `waterer calibrate interactive` (or `calibrate offset` then `calibrate slope`).".to_string()
            }
            WatererError::ChannelMismatch { expected, actual } => format!(
                "What happened: Expected {expected} load cells but the rig reports {actual}.\nLikely causes: Config lists a different number of [[rigs.channels]], the wrong board is on this port, or the known-weights list has the wrong length.\nHow to fix: Make the channel list match the board wiring."
            ),
            WatererError::Link(le) => link_hint(le),
            WatererError::NoSamples => {
                "What happened: Every scale read failed.\nLikely causes: Load cell wiring or an HX711 not answering.\nHow to fix: Check the load cell connectors, then run `waterer weights`.".to_string()
            }
            WatererError::CalibrationRejected(msg) => format!(
                "What happened: Calibration rejected ({msg}).\nLikely causes: Scales moved or were touched while measuring.\nHow to fix: Keep the rig still and repeat the calibration, or raise scale.err_limit."
            ),
            WatererError::NoSuchChannel(ch) => format!(
                "What happened: Channel {ch} does not exist.\nLikely causes: Channel indices are 0-based.\nHow to fix: Pick a channel listed by `waterer positions`."
            ),
            WatererError::Io(msg) => format!(
                "What happened: Reading or writing rig storage failed ({msg}).\nLikely causes: storage_dir missing, read-only, or the disk is full.\nHow to fix: Check [[rigs]].storage_dir and its permissions."
            ),
        };
    }

    if let Some(le) = err.downcast_ref::<LinkError>() {
        return link_hint(le);
    }

    if let Some(te) = err.downcast_ref::<toml::de::Error>() {
        return format!(
            "What happened: The config file is not valid TOML.\nDetails: {}\nHow to fix: Fix the syntax at the reported position and rerun.",
            te.message()
        );
    }

    if let Some(he) = err.downcast_ref::<waterer_hardware::HwError>() {
        return format!(
            "What happened: {he}.\nLikely causes: Wrong serial port or the board is not connected.\nHow to fix: Check [rigs.serial].port and the USB connection."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("invalid configuration") {
        let cause = err.root_cause();
        return format!(
            "What happened: Configuration is invalid or incomplete ({cause}).\nLikely causes: Missing [[rigs]]/[[rigs.channels]] entries, duplicate rig names, or out-of-range values.\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.contains("failed to read config") {
        return format!(
            "What happened: {msg}.\nLikely causes: Wrong --config path.\nHow to fix: Pass --config with the path to your waterer.toml."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn is_config_error(err: &eyre::Report) -> bool {
    err.downcast_ref::<BuildError>().is_some()
        || err.downcast_ref::<toml::de::Error>().is_some()
        || err.to_string().to_ascii_lowercase().contains("invalid configuration")
}

/// Stable exit codes per failure class; anything unclassified returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if is_config_error(err) {
        return 2;
    }
    if let Some(we) = err.downcast_ref::<WatererError>() {
        return match we {
            WatererError::NotCalibrated => 3,
            WatererError::ChannelMismatch { .. } => 4,
            WatererError::Link(_) => 5,
            WatererError::NoSamples => 6,
            WatererError::CalibrationRejected(_)
            | WatererError::NoSuchChannel(_)
            | WatererError::Io(_) => 1,
        };
    }
    if err.downcast_ref::<LinkError>().is_some()
        || err.downcast_ref::<waterer_hardware::HwError>().is_some()
    {
        return 5;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if is_config_error(err) {
        return "InvalidConfig";
    }
    match err.downcast_ref::<WatererError>() {
        Some(WatererError::NotCalibrated) => "NotCalibrated",
        Some(WatererError::ChannelMismatch { .. }) => "ChannelMismatch",
        Some(WatererError::Link(_)) => "Link",
        Some(WatererError::NoSamples) => "NoSamples",
        Some(WatererError::NoSuchChannel(_)) => "NoSuchChannel",
        Some(WatererError::CalibrationRejected(_)) => "CalibrationRejected",
        Some(WatererError::Io(_)) => "Io",
        _ if err.downcast_ref::<LinkError>().is_some() => "Link",
        _ => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let msg = humanize(err);
    let reason = reason_name(err);
    let code = exit_code_for_error(err);

    if let Some(WatererError::ChannelMismatch { expected, actual }) =
        err.downcast_ref::<WatererError>()
    {
        return json!({
            "reason": reason,
            "code": code,
            "details": { "expected": expected, "actual": actual },
            "message": msg,
        })
        .to_string();
    }

    json!({ "reason": reason, "code": code, "message": msg }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;
    use rstest::rstest;

    #[rstest]
    #[case(eyre::Report::new(WatererError::NotCalibrated), 3, "not calibrated")]
    #[case(eyre::Report::new(WatererError::ChannelMismatch { expected: 2, actual: 3 }), 4, "Expected 2 load cells")]
    #[case(eyre::Report::new(LinkError::NoResponse { command: "ok".into() }), 5, "did not answer 'ok'")]
    #[case(eyre::Report::new(BuildError::InvalidConfig("x".into())), 2, "Invalid configuration (x)")]
    #[case(eyre::eyre!("boom"), 1, "Something went wrong")]
    fn codes_and_messages(#[case] err: eyre::Report, #[case] code: i32, #[case] needle: &str) {
        assert_eq!(exit_code_for_error(&err), code);
        assert!(humanize(&err).contains(needle), "{}", humanize(&err));
    }

    #[test]
    fn wrapped_errors_keep_their_class() {
        let err: eyre::Result<()> = Err(eyre::Report::new(WatererError::NotCalibrated));
        let err = err.wrap_err("bring-up of rig 'a' failed").unwrap_err();
        assert_eq!(exit_code_for_error(&err), 3);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "NotCalibrated");
        assert_eq!(v["code"], 3);
    }

    #[rstest]
    #[case(WatererError::NotCalibrated, 3, "NotCalibrated")]
    #[case(WatererError::ChannelMismatch { expected: 2, actual: 3 }, 4, "ChannelMismatch")]
    #[case(WatererError::Link(LinkError::Device { command: "pump 100 50".into(), response: "ERROR".into() }), 5, "Link")]
    #[case(WatererError::NoSamples, 6, "NoSamples")]
    #[case(WatererError::CalibrationRejected("drift".into()), 1, "CalibrationRejected")]
    #[case(WatererError::NoSuchChannel(7), 1, "NoSuchChannel")]
    #[case(WatererError::Io("disk full".into()), 1, "Io")]
    fn every_rig_error_has_a_class(
        #[case] err: WatererError,
        #[case] code: i32,
        #[case] reason: &str,
    ) {
        let err = eyre::Report::new(err);
        assert_eq!(exit_code_for_error(&err), code);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], reason);
        assert_eq!(v["code"], code);
        assert!(!humanize(&err).starts_with("Something went wrong"));
    }

    #[test]
    fn mismatch_json_has_details() {
        let err = eyre::Report::new(WatererError::ChannelMismatch { expected: 2, actual: 1 });
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["details"]["expected"], 2);
        assert_eq!(v["details"]["actual"], 1);
    }
}
