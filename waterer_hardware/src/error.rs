use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("serial port error: {0}")]
    Serial(String),
    #[error("serial port {0} not found")]
    NoSuchPort(String),
    #[error("serial read timeout")]
    Timeout,
    #[error("response is not valid text: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "hardware")]
impl From<serialport::Error> for HwError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => HwError::NoSuchPort(e.description),
            _ => HwError::Serial(e.description),
        }
    }
}

pub type Result<T> = std::result::Result<T, HwError>;
