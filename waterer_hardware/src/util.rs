/// Line terminator used by the rig firmware.
pub const LINE_END: u8 = b'\n';

/// Remove and return the first complete line in `buf`, without its terminator
/// and any trailing `\r`. Returns `None` while no terminator has arrived.
pub fn take_line(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let idx = buf.iter().position(|b| *b == LINE_END)?;
    let mut line: Vec<u8> = buf.drain(..=idx).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(line)
}

/// Append the terminator unless the command already carries one.
pub fn terminated(cmd: &str) -> String {
    let mut s = cmd.to_owned();
    if !s.ends_with(LINE_END as char) {
        s.push(LINE_END as char);
    }
    s
}
