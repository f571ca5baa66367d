//! Telemetry payload and sinks
//!
//! The payload layout is fixed by downstream consumers:
//!
//! ```json
//! {"status":"OK","deviceID":"node","data":{"v":220.1,"i":1.5,"pa":330.2,"temp":24.6,"fan":"OFF"}}
//! ```

use crate::core::actuator::ActuatorState;
use crate::core::connectivity::{ConnectivityEvent, ConnectivityNotifier};
use crate::core::master::Reading;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Per-cycle measurement block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryData {
    /// Voltage
    pub v: f32,
    /// Current
    pub i: f32,
    /// Power
    pub pa: f32,
    /// Temperature
    pub temp: f32,
    /// Fan state, "ON" or "OFF"
    pub fan: ActuatorState,
}

/// Message published once per successful cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    /// Node status string
    pub status: String,
    /// Device identifier
    #[serde(rename = "deviceID")]
    pub device_id: String,
    /// Measurements
    pub data: TelemetryData,
}

impl TelemetryPayload {
    /// Build the payload for a reading
    pub fn new(status: &str, device_id: &str, reading: &Reading, fan: ActuatorState) -> Self {
        Self {
            status: status.to_string(),
            device_id: device_id.to_string(),
            data: TelemetryData {
                v: reading.voltage,
                i: reading.current,
                pa: reading.power,
                temp: reading.temperature,
                fan,
            },
        }
    }

    /// Compact JSON encoding
    pub fn to_json(&self) -> Result<String, TelemetryError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The reading carried by this payload
    pub fn reading(&self) -> Reading {
        Reading {
            voltage: self.data.v,
            current: self.data.i,
            power: self.data.pa,
            temperature: self.data.temp,
        }
    }
}

/// Telemetry errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Sink has no session
    #[error("telemetry sink not connected")]
    NotConnected,

    /// Encoding failed
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Writing failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Publish destination for per-cycle payloads
pub trait TelemetrySink {
    /// Publish `payload` on `topic`
    fn publish(&mut self, topic: &str, payload: &TelemetryPayload) -> Result<(), TelemetryError>;
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Box<T> {
    fn publish(&mut self, topic: &str, payload: &TelemetryPayload) -> Result<(), TelemetryError> {
        (**self).publish(topic, payload)
    }
}

/// Writes one JSON payload per line
pub struct JsonLinesSink {
    writer: Box<dyn Write + Send>,
}

impl JsonLinesSink {
    /// Sink over any writer; announces itself connected right away
    pub fn new(writer: Box<dyn Write + Send>, notifier: &ConnectivityNotifier) -> Self {
        notifier.notify(ConnectivityEvent::SinkConnected);
        Self { writer }
    }

    /// Sink on standard output
    pub fn stdout(notifier: &ConnectivityNotifier) -> Self {
        Self::new(Box::new(io::stdout()), notifier)
    }

    /// Sink appending to a file
    pub fn file(path: &Path, notifier: &ConnectivityNotifier) -> Result<Self, TelemetryError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file)), notifier))
    }
}

impl TelemetrySink for JsonLinesSink {
    fn publish(&mut self, topic: &str, payload: &TelemetryPayload) -> Result<(), TelemetryError> {
        let message = payload.to_json()?;
        writeln!(self.writer, "{message}")?;
        self.writer.flush()?;
        info!("Data sent to {}: {}", topic, message);
        Ok(())
    }
}

/// Published messages kept in memory
pub type PublishedLog = Arc<Mutex<Vec<(String, TelemetryPayload)>>>;

/// Sink that records every publish, handy for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    published: PublishedLog,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the recorded messages
    pub fn log(&self) -> PublishedLog {
        Arc::clone(&self.published)
    }

    /// Number of messages recorded
    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    /// Whether nothing was published
    pub fn is_empty(&self) -> bool {
        self.published.lock().is_empty()
    }
}

impl TelemetrySink for MemorySink {
    fn publish(&mut self, topic: &str, payload: &TelemetryPayload) -> Result<(), TelemetryError> {
        self.published.lock().push((topic.to_string(), payload.clone()));
        Ok(())
    }
}

/// Parse a capture of JSON lines back into payloads
///
/// Blank lines are skipped; the first malformed line aborts.
pub fn read_json_lines(input: &str) -> Result<Vec<TelemetryPayload>, TelemetryError> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(TelemetryError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connectivity::event_channel;

    fn sample_reading() -> Reading {
        Reading {
            voltage: 220.5,
            current: 1.25,
            power: 275.5,
            temperature: 27.6,
        }
    }

    #[test]
    fn test_payload_field_names() {
        let payload = TelemetryPayload::new("OK", "yourname", &sample_reading(), ActuatorState::On);
        assert_eq!(
            payload.to_json().unwrap(),
            r#"{"status":"OK","deviceID":"yourname","data":{"v":220.5,"i":1.25,"pa":275.5,"temp":27.6,"fan":"ON"}}"#
        );
    }

    #[test]
    fn test_payload_parses_back() {
        let payload = TelemetryPayload::new("OK", "panel", &sample_reading(), ActuatorState::Off);
        let parsed = read_json_lines(&format!("{}\n\n", payload.to_json().unwrap())).unwrap();
        assert_eq!(parsed, vec![payload]);
        assert_eq!(parsed[0].reading(), sample_reading());
    }

    #[test]
    fn test_read_json_lines_rejects_garbage() {
        assert!(matches!(read_json_lines("{\"status\":"), Err(TelemetryError::Serialize(_))));
    }

    #[test]
    fn test_json_lines_sink_announces_and_writes() {
        let (notifier, events) = event_channel();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.jsonl");

        let mut sink = JsonLinesSink::file(&path, &notifier).unwrap();
        assert_eq!(events.drain_latest(), Some(ConnectivityEvent::SinkConnected));

        let payload = TelemetryPayload::new("OK", "node1", &sample_reading(), ActuatorState::Off);
        sink.publish("DATA/LOCAL/SENSOR/PANEL_1", &payload).unwrap();
        sink.publish("DATA/LOCAL/SENSOR/PANEL_1", &payload).unwrap();
        drop(sink);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(read_json_lines(&content).unwrap().len(), 2);
    }

    #[test]
    fn test_memory_sink_records_topic() {
        let mut sink = MemorySink::new();
        let log = sink.log();
        let payload = TelemetryPayload::new("OK", "node1", &sample_reading(), ActuatorState::Off);

        sink.publish("topic/a", &payload).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(log.lock()[0].0, "topic/a");
    }
}
