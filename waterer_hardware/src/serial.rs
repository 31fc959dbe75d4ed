//! Real serial port transport (feature `hardware`).

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use waterer_traits::{BoxError, Transport};

use crate::error::{HwError, Result};
use crate::util::{take_line, terminated};

pub struct SerialPortTransport {
    port: Box<dyn SerialPort>,
    pending: Vec<u8>,
}

impl SerialPortTransport {
    /// Open `path` as 8N1 without flow control. `timeout` bounds every read.
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let known = serialport::available_ports()?;
        if !known.iter().any(|p| p.port_name == path) {
            tracing::warn!(port = path, "port not listed by the OS, trying to open anyway");
        }
        let port = serialport::new(path, baud_rate)
            .timeout(timeout)
            .data_bits(DataBits::Eight)
            .flow_control(FlowControl::None)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open()?;
        tracing::info!(port = path, baud_rate, "serial port open");
        Ok(Self {
            port,
            pending: Vec::new(),
        })
    }
}

impl Transport for SerialPortTransport {
    fn write_line(&mut self, line: &str) -> std::result::Result<(), BoxError> {
        self.port.write_all(terminated(line).as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> std::result::Result<Option<String>, BoxError> {
        let mut chunk = [0u8; 256];
        loop {
            if let Some(line) = take_line(&mut self.pending) {
                return Ok(Some(String::from_utf8(line).map_err(HwError::from)?));
            }
            match self.port.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(Box::new(HwError::Io(e))),
            }
        }
    }

    fn clear(&mut self) -> std::result::Result<(), BoxError> {
        self.pending.clear();
        self.port.clear(ClearBuffer::All).map_err(HwError::from)?;
        Ok(())
    }

    fn bytes_waiting(&mut self) -> std::result::Result<usize, BoxError> {
        let in_port = self.port.bytes_to_read().map_err(HwError::from)?;
        Ok(self.pending.len() + in_port as usize)
    }
}
