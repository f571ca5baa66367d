//! Modbus RTU master
//!
//! Composes framing, transport and float decoding into one operation: read
//! the float held in a register pair. Every call is a complete, independent
//! exchange; nothing is cached or batched.

use crate::core::protocol::float::registers_to_f32;
use crate::core::protocol::modbus::{self, register, ModbusError, RegisterAddress};
use crate::core::transport::RegisterTransport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Value carried by a measurement that could not be read
pub const INVALID_SENTINEL: f32 = -1.0;

/// Electrical quantity served by the meter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Line voltage
    Voltage,
    /// Line current
    Current,
    /// Active power
    Power,
    /// Panel temperature
    Temperature,
}

impl MetricKind {
    /// All metrics in polling order
    pub const ALL: [MetricKind; 4] = [Self::Voltage, Self::Current, Self::Power, Self::Temperature];

    /// Start address of the register pair
    pub fn address(self) -> RegisterAddress {
        match self {
            Self::Voltage => register::VOLTAGE,
            Self::Current => register::CURRENT,
            Self::Power => register::POWER,
            Self::Temperature => register::TEMPERATURE,
        }
    }

    /// Get name of metric
    pub fn name(self) -> &'static str {
        match self {
            Self::Voltage => "voltage",
            Self::Current => "current",
            Self::Power => "power",
            Self::Temperature => "temperature",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "voltage" | "v" => Ok(Self::Voltage),
            "current" | "i" => Ok(Self::Current),
            "power" | "pa" | "p" => Ok(Self::Power),
            "temperature" | "temp" | "t" => Ok(Self::Temperature),
            other => Err(format!("unknown metric: {other}")),
        }
    }
}

/// A decoded meter value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// What was measured
    pub kind: MetricKind,
    /// Decoded value, [`INVALID_SENTINEL`] when the read failed
    pub value: f32,
    valid: bool,
}

impl Measurement {
    /// A successfully decoded value
    pub fn valid(kind: MetricKind, value: f32) -> Self {
        Self { kind, value, valid: true }
    }

    /// A failed read
    pub fn invalid(kind: MetricKind) -> Self {
        Self {
            kind,
            value: INVALID_SENTINEL,
            valid: false,
        }
    }

    /// Whether the exchange produced a value
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether the value may be acted on or published
    ///
    /// Negative and non-finite values are rejected along with failed reads.
    pub fn is_usable(&self) -> bool {
        self.valid && self.value.is_finite() && self.value >= 0.0
    }
}

/// One complete, usable set of meter values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Voltage (V)
    pub voltage: f32,
    /// Current (A)
    pub current: f32,
    /// Power
    pub power: f32,
    /// Temperature (°C)
    pub temperature: f32,
}

impl Reading {
    /// Combine the four per-cycle measurements
    ///
    /// Fails with the kinds that are not usable; a partial reading is never
    /// produced.
    pub fn from_measurements(measurements: &[Measurement; 4]) -> Result<Self, Vec<MetricKind>> {
        let rejected: Vec<MetricKind> = measurements
            .iter()
            .filter(|m| !m.is_usable())
            .map(|m| m.kind)
            .collect();
        if !rejected.is_empty() {
            return Err(rejected);
        }

        let value_of = |kind: MetricKind| {
            measurements
                .iter()
                .find(|m| m.kind == kind)
                .map_or(INVALID_SENTINEL, |m| m.value)
        };

        Ok(Self {
            voltage: value_of(MetricKind::Voltage),
            current: value_of(MetricKind::Current),
            power: value_of(MetricKind::Power),
            temperature: value_of(MetricKind::Temperature),
        })
    }
}

/// Master settings for one slave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterConfig {
    /// Address of the polled slave
    pub slave_id: u8,
    /// Bounded wait for a response
    pub response_timeout: Duration,
    /// Read buffer size
    pub max_response_bytes: usize,
    /// Reject responses whose trailing CRC does not match
    pub verify_crc: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            slave_id: 1,
            response_timeout: Duration::from_millis(100),
            max_response_bytes: 256,
            verify_crc: true,
        }
    }
}

/// Exchange counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MasterStats {
    /// Exchanges that produced a value
    pub completed: u64,
    /// Exchanges that timed out (no bytes)
    pub timeouts: u64,
    /// Exchanges that failed any other way
    pub failed: u64,
}

/// Modbus RTU master bound to one transport
pub struct ModbusMaster<T> {
    transport: T,
    config: MasterConfig,
    stats: MasterStats,
}

impl<T: RegisterTransport> ModbusMaster<T> {
    /// Create a master over `transport`
    pub fn new(transport: T, config: MasterConfig) -> Self {
        Self {
            transport,
            config,
            stats: MasterStats::default(),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Get statistics
    pub fn stats(&self) -> MasterStats {
        self.stats
    }

    /// Borrow the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Release the transport
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Read the register pair at `address`: flush, write, bounded read
    pub fn read_registers(&mut self, address: RegisterAddress) -> Result<(u16, u16), ModbusError> {
        let request = modbus::build_read_request(self.config.slave_id, address);

        self.transport.flush()?;
        self.transport.write(&request)?;
        let response = self
            .transport
            .read_up_to(self.config.max_response_bytes, self.config.response_timeout)?;

        debug!("{} -> {}", modbus::format_frame(&request), hex::encode_upper(&response));

        if response.is_empty() {
            let waited = u64::try_from(self.config.response_timeout.as_millis()).unwrap_or(u64::MAX);
            return Err(ModbusError::Timeout(waited));
        }

        let registers = modbus::parse_read_response(&response, self.config.slave_id)?;
        if self.config.verify_crc {
            modbus::verify_response_crc(&response)?;
        }

        Ok(registers)
    }

    /// Read the float held at `address`
    pub fn read_float(&mut self, address: RegisterAddress) -> Result<f32, ModbusError> {
        let (high, low) = self.read_registers(address)?;
        Ok(registers_to_f32(high, low))
    }

    /// Read one metric; failures become an invalid measurement
    pub fn read_float_register(&mut self, kind: MetricKind) -> Measurement {
        match self.read_float(kind.address()) {
            Ok(value) => {
                self.stats.completed += 1;
                Measurement::valid(kind, value)
            }
            Err(e) => {
                if matches!(e, ModbusError::Timeout(_)) {
                    self.stats.timeouts += 1;
                } else {
                    self.stats.failed += 1;
                }
                warn!("Modbus read of {} (0x{:04X}) failed: {}", kind, kind.address(), e);
                Measurement::invalid(kind)
            }
        }
    }
}
