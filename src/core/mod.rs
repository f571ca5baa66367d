//! Core module containing the main functionality of Meternode
//!
//! This module provides:
//! - Modbus RTU framing, CRC-16 and float register decoding
//! - Register transport (serial port, simulated meter)
//! - Modbus master for reading float register pairs
//! - Cooling fan controller and digital outputs
//! - Connectivity monitoring and sink events
//! - Telemetry payload and sinks
//! - Panel health classification
//! - The acquisition loop tying it all together

pub mod acquisition;
pub mod actuator;
pub mod connectivity;
pub mod health;
pub mod master;
pub mod protocol;
pub mod telemetry;
pub mod transport;

pub use acquisition::{AcquisitionLoop, Clock, CycleError, CycleReport, RunSummary, Schedule, SystemClock};
pub use actuator::{ActuatorController, ActuatorState, DigitalOutput};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, NodeStatus};
pub use master::{Measurement, MetricKind, ModbusMaster, Reading};
pub use telemetry::{TelemetryPayload, TelemetrySink};
pub use transport::{RegisterTransport, TransportError};
