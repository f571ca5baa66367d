//! # Meternode Core Library
//!
//! A Modbus RTU master for panel power meters with support for:
//! - Reading float values from holding register pairs (function 0x03)
//! - Serial ports (RS-485 adapters, on-board UARTs)
//! - A simulated meter for running without hardware
//!
//! ## Features
//!
//! - CRC-16/MODBUS framing with response validation
//! - Temperature driven cooling fan control
//! - JSON telemetry publishing gated on sink connectivity
//! - Panel health classification and lifetime estimate
//! - CLI with exit codes and JSON output
//!
//! ## Example
//!
//! ```rust,no_run
//! use meternode_core::core::acquisition::{AcquisitionLoop, SystemClock};
//! use meternode_core::core::actuator::{ActuatorController, LogOutput};
//! use meternode_core::core::connectivity::{event_channel, AlwaysUp};
//! use meternode_core::core::master::{MasterConfig, ModbusMaster};
//! use meternode_core::core::telemetry::JsonLinesSink;
//! use meternode_core::core::transport::{SerialConfig, SerialTransport};
//!
//! fn main() -> anyhow::Result<()> {
//!     let transport = SerialTransport::open(SerialConfig::new("/dev/ttyUSB0", 9600))?;
//!     let (notifier, events) = event_channel();
//!
//!     let mut node = AcquisitionLoop::new(
//!         ModbusMaster::new(transport, MasterConfig::default()),
//!         ActuatorController::new(27.54),
//!         LogOutput,
//!         JsonLinesSink::stdout(&notifier),
//!         AlwaysUp,
//!         events,
//!         SystemClock,
//!     );
//!     node.run(None);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod utils;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{ConfigError, NodeConfig};
pub use crate::core::acquisition::{AcquisitionLoop, CycleError, CycleReport, RunSummary, Schedule};
pub use crate::core::actuator::{ActuatorController, ActuatorState};
pub use crate::core::health::{HealthLimits, HealthReport, HealthStatus, HealthTracker};
pub use crate::core::master::{Measurement, MetricKind, ModbusMaster, Reading};
pub use crate::core::telemetry::{TelemetryPayload, TelemetrySink};
pub use crate::core::transport::{RegisterTransport, SerialConfig, SerialTransport, SimulatedMeter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
