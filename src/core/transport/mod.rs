//! Register transport
//!
//! A synchronous, half-duplex byte channel to the metering slave:
//! - Serial ports (RS-485 adapters, on-board UARTs)
//! - Simulated meter for running without hardware
//!
//! One exchange is always flush, write, bounded read. Callers must not start
//! a new write before the previous read has returned.

mod serial;
mod simulated;

pub use serial::{list_ports, SerialConfig, SerialFlowControl, SerialParity, SerialTransport};
pub use simulated::{FaultConfig, MeterValues, SimulatedMeter};

use std::time::Duration;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Port could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Transport statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Requests written
    pub requests: u64,
    /// Reads that returned nothing before the deadline
    pub silent_reads: u64,
}

/// Byte channel used by the Modbus master
#[cfg_attr(test, mockall::automock)]
pub trait RegisterTransport {
    /// Discard any pending input
    fn flush(&mut self) -> Result<(), TransportError>;

    /// Write a complete request
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read at most `max_bytes`, waiting no longer than `timeout`
    ///
    /// An empty vector means nothing arrived in time.
    fn read_up_to(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    fn flush(&mut self) -> Result<(), TransportError> {
        (**self).flush()
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(data)
    }

    fn read_up_to(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).read_up_to(max_bytes, timeout)
    }
}
