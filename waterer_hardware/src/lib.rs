//! Transports to the rig controller board.
//!
//! - [`sim::SimulatedRig`]: in-memory board model, always available.
//! - `serial::SerialPortTransport`: real serial port, behind the `hardware` feature.
pub mod error;
#[cfg(feature = "hardware")]
pub mod serial;
pub mod sim;
pub mod util;

pub use error::HwError;
#[cfg(feature = "hardware")]
pub use serial::SerialPortTransport;
pub use sim::{SimHandle, SimulatedRig};

#[cfg(test)]
mod tests {
    use super::util::{take_line, terminated};

    #[test]
    fn take_line_waits_for_terminator() {
        let mut buf = b"OK\r\n12".to_vec();
        assert_eq!(take_line(&mut buf), Some(b"OK".to_vec()));
        assert_eq!(take_line(&mut buf), None);
        buf.extend_from_slice(b"3\n");
        assert_eq!(take_line(&mut buf), Some(b"123".to_vec()));
        assert!(buf.is_empty());
    }

    #[test]
    fn terminated_is_idempotent() {
        assert_eq!(terminated("ok"), "ok\n");
        assert_eq!(terminated("ok\n"), "ok\n");
    }
}
