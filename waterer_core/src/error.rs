use thiserror::Error;

/// Failure of a single logical command on the serial link.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    #[error("transport error on '{command}': {reason}")]
    Transport { command: String, reason: String },
    #[error("no response to '{command}'")]
    NoResponse { command: String },
    #[error("rig answered '{command}' with an error: {response}")]
    Device { command: String, response: String },
    #[error("unexpected reply to '{command}': {response}")]
    Unexpected { command: String, response: String },
    #[error("bad argument for '{command}': {reason}")]
    BadArgument { command: String, reason: String },
}

#[derive(Debug, Error, Clone)]
pub enum WatererError {
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    #[error("scale is not calibrated")]
    NotCalibrated,
    #[error("channel count mismatch: expected {expected}, rig reports {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("calibration rejected: {0}")]
    CalibrationRejected(String),
    #[error("no usable scale samples")]
    NoSamples,
    #[error("channel {0} does not exist")]
    NoSuchChannel(usize),
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing transport")]
    MissingTransport,
    #[error("missing channels")]
    MissingChannels,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
