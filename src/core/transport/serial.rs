//! Serial port transport implementation

use super::{RegisterTransport, TransportError, TransportStats};
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., /dev/ttyUSB0, COM3)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
    /// Return a read early once the line stays idle this long after data
    ///
    /// `None` keeps reading until the buffer is full or the deadline passes.
    pub frame_gap_ms: Option<u64>,
}

impl SerialConfig {
    /// Create a new serial configuration with 8N1 and no flow control
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
            frame_gap_ms: None,
        }
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set the idle gap that ends a response early
    #[must_use]
    pub fn frame_gap(mut self, gap_ms: u64) -> Self {
        self.frame_gap_ms = Some(gap_ms);
        self
    }

    /// Human readable summary, e.g. `/dev/ttyUSB0 @ 9600 baud (8N1 No FC)`
    pub fn connection_info(&self) -> String {
        format!(
            "{} @ {} baud ({}{}{} {})",
            self.port,
            self.baud_rate,
            self.data_bits,
            match self.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.stop_bits,
            match self.flow_control {
                SerialFlowControl::None => "No FC",
                SerialFlowControl::Hardware => "HW FC",
                SerialFlowControl::Software => "SW FC",
            }
        )
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", 9600)
    }
}

/// Serial port transport
pub struct SerialTransport {
    config: SerialConfig,
    port: Box<dyn SerialPort>,
    stats: TransportStats,
}

impl SerialTransport {
    /// Open the configured port
    pub fn open(config: SerialConfig) -> Result<Self, TransportError> {
        let data_bits = match config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                return Err(TransportError::InvalidConfiguration(format!(
                    "unsupported data bits: {other}"
                )))
            }
        };

        let stop_bits = match config.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match config.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let flow_control = match config.flow_control {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        };

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(config.port.clone()),
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(config.port.clone())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        debug!("Opened {}", config.connection_info());

        Ok(Self {
            config,
            port,
            stats: TransportStats::default(),
        })
    }

    /// Get connection info string
    pub fn connection_info(&self) -> String {
        self.config.connection_info()
    }

    /// Get statistics
    pub fn stats(&self) -> TransportStats {
        self.stats
    }
}

fn serial_to_io(e: serialport::Error) -> TransportError {
    TransportError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e))
}

impl RegisterTransport for SerialTransport {
    fn flush(&mut self) -> Result<(), TransportError> {
        self.port.clear(ClearBuffer::Input).map_err(serial_to_io)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(data)?;
        self.port.flush()?;

        self.stats.bytes_sent += data.len() as u64;
        self.stats.requests += 1;
        trace!("TX {}", hex::encode_upper(data));

        Ok(())
    }

    fn read_up_to(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let gap = self.config.frame_gap_ms.map(Duration::from_millis);
        let mut buffer = vec![0u8; max_bytes];
        let mut filled = 0;

        while filled < max_bytes {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let mut wait = deadline - now;
            if let (Some(gap), true) = (gap, filled > 0) {
                wait = wait.min(gap);
            }
            self.port.set_timeout(wait).map_err(serial_to_io)?;

            match self.port.read(&mut buffer[filled..]) {
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    if gap.is_some() && filled > 0 {
                        break;
                    }
                }
                Err(e) => return Err(TransportError::IoError(e)),
            }
        }

        buffer.truncate(filled);
        self.stats.bytes_received += filled as u64;
        if filled == 0 {
            self.stats.silent_reads += 1;
        }
        trace!("RX {}", hex::encode_upper(&buffer));

        Ok(buffer)
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(serial_to_io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults_to_8n1() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.data_bits, 8);
        assert_eq!(config.stop_bits, 1);
        assert_eq!(config.parity, SerialParity::None);
        assert_eq!(config.flow_control, SerialFlowControl::None);
        assert_eq!(config.frame_gap_ms, None);
    }

    #[test]
    fn test_connection_info() {
        let config = SerialConfig::new("/dev/ttyS1", 19200).parity(SerialParity::Even);
        assert_eq!(config.connection_info(), "/dev/ttyS1 @ 19200 baud (8E1 No FC)");
    }

    #[test]
    fn test_serial_config_from_toml() {
        let config: SerialConfig = toml::from_str(
            r#"
            port = "/dev/ttyAMA0"
            baud_rate = 4800
            parity = "odd"
            frame_gap_ms = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.port, "/dev/ttyAMA0");
        assert_eq!(config.baud_rate, 4800);
        assert_eq!(config.parity, SerialParity::Odd);
        assert_eq!(config.data_bits, 8);
        assert_eq!(config.frame_gap_ms, Some(5));
    }

    #[test]
    fn test_open_missing_port_fails() {
        let result = SerialTransport::open(SerialConfig::new("/dev/meternode-does-not-exist", 9600));
        assert!(result.is_err());
    }
}
