//! End-to-end cycles through the public API

use meternode_core::core::acquisition::{AcquisitionLoop, CycleError, ManualClock, Schedule};
use meternode_core::core::actuator::{ActuatorController, ActuatorError, ActuatorState, DigitalOutput};
use meternode_core::core::connectivity::{
    event_channel, AlwaysUp, ConnectivityError, ConnectivityEvent, ConnectivityMonitor,
};
use meternode_core::core::master::{MasterConfig, MetricKind, ModbusMaster};
use meternode_core::core::protocol::float::f32_to_registers;
use meternode_core::core::protocol::modbus::{build_read_response, parse_read_request};
use meternode_core::core::telemetry::MemorySink;
use meternode_core::core::transport::{RegisterTransport, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Transport answering from a queue of canned responses
#[derive(Clone, Default)]
struct ScriptedTransport {
    responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    flushes: Arc<Mutex<usize>>,
}

impl ScriptedTransport {
    fn push(&self, response: Vec<u8>) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn push_values(&self, values: [f32; 4]) {
        for value in values {
            let (high, low) = f32_to_registers(value);
            self.push(build_read_response(1, high, low));
        }
    }

    fn requested_addresses(&self) -> Vec<u16> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| parse_read_request(r).map(|(_, address)| address))
            .collect()
    }

    fn exchanges(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl RegisterTransport for ScriptedTransport {
    fn flush(&mut self) -> Result<(), TransportError> {
        *self.flushes.lock().unwrap() += 1;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.requests.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn read_up_to(&mut self, max_bytes: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut response = self.responses.lock().unwrap().pop_front().unwrap_or_default();
        response.truncate(max_bytes);
        Ok(response)
    }
}

/// Link that stays down, counting reconnect requests
#[derive(Clone, Default)]
struct DownLink {
    reconnects: Arc<Mutex<usize>>,
}

impl ConnectivityMonitor for DownLink {
    fn link_up(&mut self) -> bool {
        false
    }

    fn reconnect(&mut self) -> Result<(), ConnectivityError> {
        *self.reconnects.lock().unwrap() += 1;
        Err(ConnectivityError::ReconnectFailed("no carrier".into()))
    }
}

/// Output line recording every write
#[derive(Clone, Default)]
struct RecordingOutput {
    writes: Arc<Mutex<Vec<ActuatorState>>>,
}

impl DigitalOutput for RecordingOutput {
    fn set(&mut self, state: ActuatorState) -> Result<(), ActuatorError> {
        self.writes.lock().unwrap().push(state);
        Ok(())
    }
}

#[test]
fn successful_cycle_publishes_payload() {
    let transport = ScriptedTransport::default();
    transport.push_values([220.5, 1.25, 275.5, 24.5]);

    let (notifier, events) = event_channel();
    notifier.notify(ConnectivityEvent::SinkConnected);
    let sink = MemorySink::new();
    let log = sink.log();

    let mut node = AcquisitionLoop::new(
        ModbusMaster::new(transport.clone(), MasterConfig::default()),
        ActuatorController::new(27.54),
        RecordingOutput::default(),
        sink,
        AlwaysUp,
        events,
        ManualClock::new(),
    );

    node.run_cycle().unwrap();

    assert_eq!(transport.requested_addresses(), vec![0x0000, 0x0002, 0x0004, 0x0006]);
    assert_eq!(*transport.flushes.lock().unwrap(), 4);

    let published = log.lock();
    assert_eq!(published.len(), 1);
    let (topic, payload) = &published[0];
    assert_eq!(topic, "DATA/LOCAL/SENSOR/PANEL_1");
    assert_eq!(
        payload.to_json().unwrap(),
        r#"{"status":"OK","deviceID":"yourname","data":{"v":220.5,"i":1.25,"pa":275.5,"temp":24.5,"fan":"OFF"}}"#
    );
}

#[test]
fn short_response_aborts_cycle_without_publish() {
    let transport = ScriptedTransport::default();
    let (high, low) = f32_to_registers(220.0);
    transport.push(build_read_response(1, high, low)[..5].to_vec());
    transport.push_values([1.0, 220.0, 24.0, 0.0]);

    let (notifier, events) = event_channel();
    notifier.notify(ConnectivityEvent::SinkConnected);
    let sink = MemorySink::new();
    let log = sink.log();
    let output = RecordingOutput::default();
    let writes = Arc::clone(&output.writes);

    let mut node = AcquisitionLoop::new(
        ModbusMaster::new(transport.clone(), MasterConfig::default()),
        ActuatorController::new(27.54),
        output,
        sink,
        AlwaysUp,
        events,
        ManualClock::new(),
    );

    match node.run_cycle() {
        Err(CycleError::InvalidCycleData(kinds)) => assert_eq!(kinds, vec![MetricKind::Voltage]),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(log.lock().is_empty());
    assert!(writes.lock().unwrap().is_empty());
    // All four reads still run before the cycle is judged
    assert_eq!(transport.exchanges(), 4);
}

#[test]
fn link_down_requests_reconnect_without_exchanges() {
    let transport = ScriptedTransport::default();
    let link = DownLink::default();
    let reconnects = Arc::clone(&link.reconnects);
    let clock = ManualClock::new();

    let (notifier, events) = event_channel();
    notifier.notify(ConnectivityEvent::SinkConnected);

    let mut node = AcquisitionLoop::new(
        ModbusMaster::new(transport.clone(), MasterConfig::default()),
        ActuatorController::new(27.54),
        RecordingOutput::default(),
        MemorySink::new(),
        link,
        events,
        clock.clone(),
    );

    let summary = node.run(Some(3));

    assert_eq!(summary.failed, 3);
    assert_eq!(*reconnects.lock().unwrap(), 3);
    assert_eq!(transport.exchanges(), 0);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 2]);
    assert!(!node.status().link_up());
}

#[test]
fn fan_follows_temperature_across_cycles() {
    let transport = ScriptedTransport::default();
    for temperature in [26.0, 27.0, 27.6, 27.3] {
        transport.push_values([220.0, 1.0, 220.0, temperature]);
    }

    let (notifier, events) = event_channel();
    notifier.notify(ConnectivityEvent::SinkConnected);
    let sink = MemorySink::new();
    let log = sink.log();
    let output = RecordingOutput::default();
    let writes = Arc::clone(&output.writes);

    let mut node = AcquisitionLoop::new(
        ModbusMaster::new(transport, MasterConfig::default()),
        ActuatorController::with_hysteresis(27.54, 0.3),
        output,
        sink,
        AlwaysUp,
        events,
        ManualClock::new(),
    );

    let summary = node.run(Some(4));
    assert_eq!(summary.published, 4);

    let fans: Vec<ActuatorState> = log.lock().iter().map(|(_, p)| p.data.fan).collect();
    use ActuatorState::{Off, On};
    assert_eq!(fans, vec![Off, Off, On, On]);
    // The line is written on the transition only
    assert_eq!(*writes.lock().unwrap(), vec![On]);
    assert!(node.status().fan_on());
}

#[test]
fn sink_events_gate_reads() {
    let transport = ScriptedTransport::default();
    transport.push_values([220.0, 1.0, 220.0, 24.0]);

    let (notifier, events) = event_channel();
    let clock = ManualClock::new();

    let mut node = AcquisitionLoop::new(
        ModbusMaster::new(transport.clone(), MasterConfig::default()),
        ActuatorController::new(27.54),
        RecordingOutput::default(),
        MemorySink::new(),
        AlwaysUp,
        events,
        clock.clone(),
    )
    .with_schedule(Schedule {
        sink_retry: Duration::from_millis(1500),
        ..Schedule::default()
    });

    assert_eq!(node.run(Some(2)).failed, 2);
    assert_eq!(transport.exchanges(), 0);
    assert_eq!(clock.sleeps(), vec![Duration::from_millis(1500)]);

    notifier.notify(ConnectivityEvent::SinkDisconnected);
    notifier.notify(ConnectivityEvent::SinkConnected);
    assert!(node.run_cycle().is_ok());
    assert_eq!(transport.exchanges(), 4);
}

/// Transport whose reads take simulated time
struct SlowTransport {
    inner: ScriptedTransport,
    clock: ManualClock,
    delay: Duration,
}

impl RegisterTransport for SlowTransport {
    fn flush(&mut self) -> Result<(), TransportError> {
        self.inner.flush()
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.inner.write(data)
    }

    fn read_up_to(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.clock.advance(self.delay);
        self.inner.read_up_to(max_bytes, timeout)
    }
}

#[test]
fn slow_read_phase_overruns_budget() {
    let clock = ManualClock::new();
    let inner = ScriptedTransport::default();
    inner.push_values([220.0, 1.0, 220.0, 24.0]);
    let transport = SlowTransport {
        inner,
        clock: clock.clone(),
        delay: Duration::from_millis(300),
    };

    let (notifier, events) = event_channel();
    notifier.notify(ConnectivityEvent::SinkConnected);
    let sink = MemorySink::new();
    let log = sink.log();

    let mut node = AcquisitionLoop::new(
        ModbusMaster::new(transport, MasterConfig::default()),
        ActuatorController::new(27.54),
        RecordingOutput::default(),
        sink,
        AlwaysUp,
        events,
        clock,
    )
    .with_schedule(Schedule {
        cycle_budget: Some(Duration::from_secs(1)),
        ..Schedule::default()
    });

    match node.run_cycle() {
        Err(CycleError::CycleOverrun { elapsed, budget }) => {
            assert_eq!(elapsed, Duration::from_millis(1200));
            assert_eq!(budget, Duration::from_secs(1));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(log.lock().is_empty());
}
