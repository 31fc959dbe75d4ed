use rstest::rstest;
use waterer_hardware::SimulatedRig;
use waterer_traits::Transport;

fn reply(rig: &mut SimulatedRig, cmd: &str) -> Vec<String> {
    rig.write_line(cmd).expect("write");
    std::iter::from_fn(|| rig.read_line().expect("read")).collect()
}

#[rstest]
#[case("ok", "OK")]
#[case("hx_n", "3")]
#[case("stepper_attach 0", "OK")]
#[case("servo_attach 1", "OK")]
#[case("pump 100 100", "OK")]
#[case("stepper -50", "OK")]
fn single_line_replies(#[case] cmd: &str, #[case] expected: &str) {
    let mut rig = SimulatedRig::new(vec![10.0, 20.0, 30.0]);
    assert_eq!(reply(&mut rig, cmd), vec![expected.to_owned()]);
}

#[rstest]
#[case("pump 100 101")]
#[case("servo 0")]
#[case("hx")]
#[case("frobnicate")]
fn bad_commands_answer_error(#[case] cmd: &str) {
    let mut rig = SimulatedRig::new(vec![10.0]);
    let lines = reply(&mut rig, cmd);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("ERROR"), "{cmd} -> {lines:?}");
}

#[test]
fn dht_payload_is_json_object() {
    let mut rig = SimulatedRig::new(vec![10.0]);
    let lines = reply(&mut rig, "dht");
    assert_eq!(lines[0], "rcv");
    let v: serde_json::Value = serde_json::from_str(&lines[1]).expect("json");
    assert!(v["hum"].is_number() && v["temp"].is_number());
}

#[test]
fn clear_drops_unread_replies() {
    let mut rig = SimulatedRig::new(vec![10.0]);
    rig.write_line("hx 5").expect("write");
    assert!(rig.bytes_waiting().expect("waiting") > 0);
    rig.clear().expect("clear");
    assert_eq!(rig.bytes_waiting().expect("waiting"), 0);
}

#[test]
fn stepper_moves_are_relative() {
    let mut rig = SimulatedRig::new(vec![10.0]);
    let h = rig.handle();
    reply(&mut rig, "stepper 300 1");
    reply(&mut rig, "stepper -100");
    assert_eq!(h.stepper_position(), 200);
    assert_eq!(reply(&mut rig, "stepper"), vec!["200".to_owned()]);
}
