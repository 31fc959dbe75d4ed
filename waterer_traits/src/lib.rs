//! Hardware and collaborator seams shared across the waterer stack.
//!
//! Everything that touches the outside world (the serial line to the rig's
//! microcontroller, the camera, the maintenance button) is reached through a
//! trait defined here so the control core can run against fakes in tests.
pub mod clock;

pub use clock::{Clock, MonotonicClock};

use std::time::Duration;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Line-oriented byte transport to a rig controller.
pub trait Transport {
    /// Write one command line. Implementations append the terminator.
    fn write_line(&mut self, line: &str) -> Result<(), BoxError>;

    /// Read one line, blocking for at most the transport's read timeout.
    /// `Ok(None)` means nothing arrived in time.
    fn read_line(&mut self) -> Result<Option<String>, BoxError>;

    /// Discard anything buffered in either direction.
    fn clear(&mut self) -> Result<(), BoxError>;

    /// Number of bytes ready to be read without blocking.
    fn bytes_waiting(&mut self) -> Result<usize, BoxError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_line(&mut self, line: &str) -> Result<(), BoxError> {
        (**self).write_line(line)
    }
    fn read_line(&mut self) -> Result<Option<String>, BoxError> {
        (**self).read_line()
    }
    fn clear(&mut self) -> Result<(), BoxError> {
        (**self).clear()
    }
    fn bytes_waiting(&mut self) -> Result<usize, BoxError> {
        (**self).bytes_waiting()
    }
}

/// Video recorder driven around watering moves.
pub trait Recorder {
    fn start_recording(&mut self) -> Result<(), BoxError>;
    /// Stop the current recording once `delay` has elapsed.
    fn schedule_stop_recording(&mut self, delay: Duration) -> Result<(), BoxError>;
}

pub type HaltCallback = Box<dyn Fn() + Send + Sync>;

/// Physical maintenance trigger (a push button) that pauses the control loop.
pub trait Maintenance {
    fn on_halt_begin(&mut self, callback: HaltCallback);
    fn on_halt_end(&mut self, callback: HaltCallback);
}
