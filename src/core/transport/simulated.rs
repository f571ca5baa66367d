//! Simulated power meter
//!
//! Answers read-holding-register requests for the four meter registers from
//! configured values. Faults (dropped or truncated responses) and value
//! jitter can be injected to exercise the degraded paths without hardware.

use super::{RegisterTransport, TransportError, TransportStats};
use crate::core::protocol::float::f32_to_registers;
use crate::core::protocol::modbus::{self, register, RegisterAddress};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

/// Values served by the simulated meter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterValues {
    /// Voltage (V)
    pub voltage: f32,
    /// Current (A)
    pub current: f32,
    /// Power
    pub power: f32,
    /// Temperature (°C)
    pub temperature: f32,
}

impl Default for MeterValues {
    fn default() -> Self {
        Self {
            voltage: 220.0,
            current: 1.5,
            power: 330.0,
            temperature: 24.5,
        }
    }
}

impl MeterValues {
    fn at(&self, address: RegisterAddress) -> Option<f32> {
        match address {
            register::VOLTAGE => Some(self.voltage),
            register::CURRENT => Some(self.current),
            register::POWER => Some(self.power),
            register::TEMPERATURE => Some(self.temperature),
            _ => None,
        }
    }
}

/// Fault injection settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Probability of not answering at all (0.0 - 1.0)
    pub drop_probability: f64,
    /// Probability of cutting the response to 5 bytes (0.0 - 1.0)
    pub truncate_probability: f64,
    /// Uniform noise added to every value (±jitter)
    pub jitter: f32,
    /// Sleep for the full read timeout when no answer is sent
    pub realtime: bool,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            drop_probability: 0.0,
            truncate_probability: 0.0,
            jitter: 0.0,
            realtime: true,
        }
    }
}

/// In-process meter speaking Modbus RTU
pub struct SimulatedMeter {
    slave_id: u8,
    values: MeterValues,
    faults: FaultConfig,
    rng: StdRng,
    pending: Option<Vec<u8>>,
    stats: TransportStats,
}

impl SimulatedMeter {
    /// Create a meter answering as `slave_id`
    pub fn new(slave_id: u8, values: MeterValues) -> Self {
        Self {
            slave_id,
            values,
            faults: FaultConfig::default(),
            rng: StdRng::from_entropy(),
            pending: None,
            stats: TransportStats::default(),
        }
    }

    /// Enable fault injection
    #[must_use]
    pub fn with_faults(mut self, faults: FaultConfig) -> Self {
        self.faults = faults;
        self
    }

    /// Use a fixed seed for reproducible faults and jitter
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Current values
    pub fn values(&self) -> MeterValues {
        self.values
    }

    /// Replace the served values
    pub fn set_values(&mut self, values: MeterValues) {
        self.values = values;
    }

    /// Get statistics
    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    fn roll(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.gen_bool(probability.min(1.0))
    }

    fn respond(&mut self, address: RegisterAddress) -> Option<Vec<u8>> {
        let mut value = self.values.at(address)?;
        if self.faults.jitter > 0.0 {
            let jitter = self.faults.jitter;
            value += self.rng.gen_range(-jitter..=jitter);
        }

        if self.roll(self.faults.drop_probability) {
            trace!("Simulated meter dropping response for 0x{:04X}", address);
            return None;
        }

        let (high, low) = f32_to_registers(value);
        let mut frame = modbus::build_read_response(self.slave_id, high, low);
        if self.roll(self.faults.truncate_probability) {
            frame.truncate(5);
        }
        Some(frame)
    }
}

impl RegisterTransport for SimulatedMeter {
    fn flush(&mut self) -> Result<(), TransportError> {
        self.pending = None;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.stats.bytes_sent += data.len() as u64;
        self.stats.requests += 1;

        // Requests for other slaves or unknown registers stay unanswered,
        // the same as on a real bus.
        self.pending = match modbus::parse_read_request(data) {
            Some((slave_id, address)) if slave_id == self.slave_id => self.respond(address),
            _ => None,
        };

        Ok(())
    }

    fn read_up_to(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        match self.pending.take() {
            Some(mut frame) => {
                frame.truncate(max_bytes);
                self.stats.bytes_received += frame.len() as u64;
                Ok(frame)
            }
            None => {
                self.stats.silent_reads += 1;
                if self.faults.realtime {
                    std::thread::sleep(timeout);
                }
                Ok(Vec::new())
            }
        }
    }
}
