use rstest::rstest;
use waterer_config::load_toml;

const BASE: &str = r#"
[[rigs]]
name = "a"

[[rigs.channels]]
stepper = 0
servo = 90
pump_duration = { initial_value = 500, final_value = 2000, n_steps = 10, n_steps_not_incrementing = 2 }
pump_power = { initial_value = 50, final_value = 100, n_steps = 10 }
[rigs.channels.schedule]
steps = [{ target_weight = 400.0, weight_threshold = 2.0 }]
"#;

fn with(extra_rig: &str, channel_patch: Option<(&str, &str)>) -> String {
    let mut s = BASE.to_owned();
    if let Some((from, to)) = channel_patch {
        s = s.replace(from, to);
    }
    // Rig-level tables go after the channel so TOML nesting stays valid.
    s.push_str(extra_rig);
    s
}

#[test]
fn minimal_config_uses_defaults() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    let rig = &cfg.rigs[0];
    assert_eq!(rig.serial.n_retries, 3);
    assert_eq!(rig.serial.long_timeout_ms, 30_000);
    assert_eq!(rig.safety.history_len, 30);
    assert_eq!(rig.tuning.max_low_repeats, 2);
    assert_eq!(rig.channels[0].pump_power.n_steps_not_incrementing, 0);
    assert!(!rig.channels[0].schedule.cyclic);
    assert_eq!(cfg.runner.tick_interval_ms, 10_000);
}

#[test]
fn shipped_config_is_valid() {
    let text = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/../etc/waterer.toml"))
        .expect("read etc/waterer.toml");
    let cfg = load_toml(&text).expect("parse TOML");
    cfg.validate().expect("shipped config should validate");
    assert!(cfg.rig("bench-a").is_some());
}

#[rstest]
#[case(("servo = 90", "servo = 0"), "servo must be in [1, 179]")]
#[case(("servo = 90", "servo = 180"), "servo must be in [1, 179]")]
#[case(("initial_value = 500, final_value = 2000", "initial_value = 3000, final_value = 2000"), "initial_value must be <= final_value")]
#[case(("n_steps = 10, n_steps_not_incrementing = 2", "n_steps = 1, n_steps_not_incrementing = 2"), "n_steps must be >= n_steps_not_incrementing")]
#[case(("initial_value = 50, final_value = 100", "initial_value = 50, final_value = 120"), "pump_power values must be in [0, 100]")]
#[case(("weight_threshold = 2.0 }", "weight_threshold = -1.0 }"), "weight_threshold must be >= 0")]
#[case(("weight_threshold = 2.0 }", "weight_threshold = 5.0, max_weight_deviation = 4.0 }"), "max_weight_deviation must be > weight_threshold - 1")]
#[case(("steps = [{ target_weight = 400.0, weight_threshold = 2.0 }]", "steps = []"), "schedule.steps must not be empty")]
fn rejects_bad_channels(#[case] patch: (&str, &str), #[case] needle: &str) {
    let cfg = load_toml(&with("", Some(patch))).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(format!("{err}").contains(needle), "{err} !~ {needle}");
}

#[rstest]
#[case("[rigs.tuning]\nlow_threshold_g = 4.0\nhigh_threshold_g = 4.0\n", "low_threshold_g must be < high_threshold_g")]
#[case("[rigs.safety]\nhistory_len = 15\n", "history_len must be > 15")]
#[case("[rigs.serial]\nn_retries = 0\n", "n_retries must be >= 1")]
#[case("[rigs.scale]\nn_statistics = 0\n", "n_statistics must be >= 1")]
fn rejects_bad_rig_tables(#[case] extra: &str, #[case] needle: &str) {
    let cfg = load_toml(&with(extra, None)).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(format!("{err}").contains(needle), "{err} !~ {needle}");
}

#[test]
fn rejects_duplicate_rig_names() {
    let twice = format!("{BASE}{BASE}");
    let cfg = load_toml(&twice).expect("parse TOML");
    let err = cfg.validate().expect_err("duplicate names");
    assert!(format!("{err}").contains("used by more than one rig"));
}

#[test]
fn rejects_empty_rig_list() {
    let cfg = load_toml("rigs = []").expect("parse TOML");
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_unknown_rotation() {
    let text = format!("[logging]\nrotation = \"weekly\"\n{BASE}");
    let cfg = load_toml(&text).expect("parse TOML");
    let err = cfg.validate().expect_err("bad rotation");
    assert!(format!("{err}").contains("logging.rotation"));
}
