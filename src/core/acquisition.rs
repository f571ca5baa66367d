//! Acquisition loop
//!
//! One strictly sequential cycle per iteration:
//! - check the network link, reconnect and back off when it is down
//! - check the telemetry sink, back off when it is not connected
//! - read voltage, current, power and temperature, in that order
//! - drop the cycle when any value is unusable
//! - drive the fan controller with the temperature
//! - publish the payload
//!
//! The loop owns the transport. Sink connectivity arrives as events drained
//! at the top of each cycle; the shared [`NodeStatus`] mirrors what the loop
//! last saw. All waiting goes through a [`Clock`].

use crate::core::actuator::{ActuatorController, ActuatorState, DigitalOutput};
use crate::core::connectivity::{ConnectivityEvent, ConnectivityEvents, ConnectivityMonitor, NodeStatus};
use crate::core::health::{HealthReport, HealthStatus, HealthTracker};
use crate::core::master::{MetricKind, ModbusMaster, Reading};
use crate::core::telemetry::{TelemetryError, TelemetryPayload, TelemetrySink};
use crate::core::transport::RegisterTransport;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Default publish topic
pub const DEFAULT_TOPIC: &str = "DATA/LOCAL/SENSOR/PANEL_1";

/// Time source and sleep primitive
pub trait Clock {
    /// Current instant
    fn now(&self) -> Instant;

    /// Block for `duration`
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug)]
struct ManualClockState {
    now: Instant,
    sleeps: Vec<Duration>,
}

/// Clock that only moves when told to
///
/// Clones share the same time, so a handle kept outside the loop sees every
/// sleep the loop performs.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualClockState>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualClockState {
                now: Instant::now(),
                sleeps: Vec::new(),
            })),
        }
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        self.state.lock().now += duration;
    }

    /// Every sleep requested so far
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }

    /// Sum of all sleeps
    pub fn total_slept(&self) -> Duration {
        self.state.lock().sleeps.iter().sum()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.state.lock().now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.now += duration;
        state.sleeps.push(duration);
    }
}

/// Loop timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Wait after a published cycle
    pub cycle_interval: Duration,
    /// Wait after a failed link check
    pub link_retry: Duration,
    /// Wait while the sink is not connected
    pub sink_retry: Duration,
    /// Wait after a cycle with unusable values
    pub invalid_retry: Duration,
    /// Longest acceptable read phase
    pub cycle_budget: Option<Duration>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(1),
            link_retry: Duration::from_secs(2),
            sink_retry: Duration::from_secs(1),
            invalid_retry: Duration::from_secs(1),
            cycle_budget: None,
        }
    }
}

/// Identity stamped on every payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    /// Node status string
    pub status: String,
    /// Device identifier
    pub device_id: String,
    /// Publish topic
    pub topic: String,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            status: "OK".to_string(),
            device_id: "yourname".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
        }
    }
}

/// Why a cycle ended without publishing
#[derive(Error, Debug)]
pub enum CycleError {
    /// Network link down, reconnect requested
    #[error("network link down")]
    LinkDown,

    /// Telemetry sink not connected
    #[error("telemetry sink not connected")]
    SinkUnavailable,

    /// At least one value could not be used
    #[error("unusable values: {}", format_kinds(.0))]
    InvalidCycleData(Vec<MetricKind>),

    /// Read phase exceeded the cycle budget
    #[error("read phase took {elapsed:?}, budget is {budget:?}")]
    CycleOverrun {
        /// Time spent reading
        elapsed: Duration,
        /// Configured budget
        budget: Duration,
    },

    /// Sink rejected the payload
    #[error("publish failed: {0}")]
    Publish(#[from] TelemetryError),
}

fn format_kinds(kinds: &[MetricKind]) -> String {
    kinds.iter().map(|k| k.name()).collect::<Vec<_>>().join(", ")
}

impl CycleError {
    /// Wait before the next cycle
    pub fn retry_delay(&self, schedule: &Schedule) -> Duration {
        match self {
            Self::LinkDown => schedule.link_retry,
            Self::SinkUnavailable => schedule.sink_retry,
            Self::InvalidCycleData(_) | Self::CycleOverrun { .. } => schedule.invalid_retry,
            Self::Publish(_) => schedule.cycle_interval,
        }
    }
}

/// Outcome of a published cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Values read
    pub reading: Reading,
    /// Fan state after the cycle
    pub fan: ActuatorState,
    /// Command written to the fan line this cycle
    pub switched: Option<ActuatorState>,
    /// Health class, when tracking is enabled
    pub health: Option<HealthStatus>,
}

/// Totals returned when the loop stops
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Cycles attempted
    pub cycles: u64,
    /// Cycles that published
    pub published: u64,
    /// Cycles that ended early
    pub failed: u64,
    /// Health summary, when tracking is enabled
    pub health: Option<HealthReport>,
}

/// The node's polling loop
pub struct AcquisitionLoop<T, M, S, O, C> {
    master: ModbusMaster<T>,
    controller: ActuatorController,
    output: O,
    sink: S,
    monitor: M,
    events: ConnectivityEvents,
    clock: C,
    status: Arc<NodeStatus>,
    schedule: Schedule,
    publish: PublishSettings,
    health: Option<HealthTracker>,
    sink_connected: bool,
}

impl<T, M, S, O, C> AcquisitionLoop<T, M, S, O, C>
where
    T: RegisterTransport,
    M: ConnectivityMonitor,
    S: TelemetrySink,
    O: DigitalOutput,
    C: Clock,
{
    /// Assemble a loop; the sink counts as disconnected until an event says otherwise
    pub fn new(
        master: ModbusMaster<T>,
        controller: ActuatorController,
        output: O,
        sink: S,
        monitor: M,
        events: ConnectivityEvents,
        clock: C,
    ) -> Self {
        Self {
            master,
            controller,
            output,
            sink,
            monitor,
            events,
            clock,
            status: Arc::new(NodeStatus::new()),
            schedule: Schedule::default(),
            publish: PublishSettings::default(),
            health: None,
            sink_connected: false,
        }
    }

    /// Share an existing status block
    #[must_use]
    pub fn with_status(mut self, status: Arc<NodeStatus>) -> Self {
        self.status = status;
        self
    }

    /// Set loop timing
    #[must_use]
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Set payload identity and topic
    #[must_use]
    pub fn with_publish_settings(mut self, publish: PublishSettings) -> Self {
        self.publish = publish;
        self
    }

    /// Classify every published reading
    #[must_use]
    pub fn with_health(mut self, tracker: HealthTracker) -> Self {
        self.health = Some(tracker);
        self
    }

    /// Shared status handle
    pub fn status(&self) -> Arc<NodeStatus> {
        Arc::clone(&self.status)
    }

    /// Loop timing
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// The Modbus master
    pub fn master(&self) -> &ModbusMaster<T> {
        &self.master
    }

    /// The fan controller
    pub fn controller(&self) -> &ActuatorController {
        &self.controller
    }

    /// Health tracker, when enabled
    pub fn health(&self) -> Option<&HealthTracker> {
        self.health.as_ref()
    }

    fn apply_events(&mut self) {
        let Some(event) = self.events.drain_latest() else {
            return;
        };

        let connected = event == ConnectivityEvent::SinkConnected;
        if connected != self.sink_connected {
            if connected {
                info!("Telemetry sink connected");
            } else {
                warn!("Telemetry sink disconnected");
            }
        }
        self.sink_connected = connected;
        self.status.set_sink_connected(connected);
    }

    fn drive_fan(&mut self, temperature: f32) -> Option<ActuatorState> {
        let command = self.controller.evaluate(temperature)?;
        match self.output.set(command) {
            Ok(()) => {
                self.controller.apply(command);
                info!(
                    "Fan {} at {:.2} °C (threshold {:.2} °C)",
                    command,
                    temperature,
                    self.controller.threshold()
                );
                Some(command)
            }
            Err(e) => {
                error!("Failed to switch fan {}: {}", command, e);
                None
            }
        }
    }

    /// Run a single cycle without waiting afterwards
    pub fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        self.apply_events();

        let link_up = self.monitor.link_up();
        self.status.set_link_up(link_up);
        if !link_up {
            warn!("Network link down, reconnecting");
            if let Err(e) = self.monitor.reconnect() {
                warn!("{}", e);
            }
            return Err(CycleError::LinkDown);
        }

        if !self.sink_connected {
            debug!("Telemetry sink not connected, skipping reads");
            return Err(CycleError::SinkUnavailable);
        }

        let started = self.clock.now();
        let measurements = MetricKind::ALL.map(|kind| self.master.read_float_register(kind));
        let reading = Reading::from_measurements(&measurements).map_err(CycleError::InvalidCycleData)?;

        if let Some(budget) = self.schedule.cycle_budget {
            let elapsed = self.clock.now().saturating_duration_since(started);
            if elapsed > budget {
                return Err(CycleError::CycleOverrun { elapsed, budget });
            }
        }

        let switched = self.drive_fan(reading.temperature);
        let fan = self.controller.state();
        self.status.set_fan_on(fan.is_on());

        let payload = TelemetryPayload::new(&self.publish.status, &self.publish.device_id, &reading, fan);
        if let Err(e) = self.sink.publish(&self.publish.topic, &payload) {
            if matches!(e, TelemetryError::NotConnected) {
                self.sink_connected = false;
                self.status.set_sink_connected(false);
            }
            return Err(CycleError::Publish(e));
        }

        let now = self.clock.now();
        let health = self.health.as_mut().map(|tracker| tracker.observe(&reading, now));

        Ok(CycleReport {
            reading,
            fan,
            switched,
            health,
        })
    }

    /// Cycle until stopped, or until `max_cycles` cycles have run
    ///
    /// No wait follows the final cycle of a bounded run.
    pub fn run(&mut self, max_cycles: Option<u64>) -> RunSummary {
        let mut summary = RunSummary::default();
        info!(
            "Acquisition loop started (slave {}, threshold {:.2} °C)",
            self.master.config().slave_id,
            self.controller.threshold()
        );

        while self.status.is_running() {
            if max_cycles.is_some_and(|max| summary.cycles >= max) {
                break;
            }
            let delay = match self.run_cycle() {
                Ok(report) => {
                    summary.published += 1;
                    self.status.record_cycle(true);
                    debug!(
                        "Published V={:.2} I={:.2} P={:.2} T={:.2} fan={}",
                        report.reading.voltage,
                        report.reading.current,
                        report.reading.power,
                        report.reading.temperature,
                        report.fan
                    );
                    self.schedule.cycle_interval
                }
                Err(e) => {
                    summary.failed += 1;
                    self.status.record_cycle(false);
                    match e {
                        CycleError::LinkDown | CycleError::SinkUnavailable => debug!("Cycle skipped: {}", e),
                        _ => warn!("Cycle aborted: {}", e),
                    }
                    e.retry_delay(&self.schedule)
                }
            };
            summary.cycles += 1;

            if max_cycles.is_some_and(|max| summary.cycles >= max) || !self.status.is_running() {
                break;
            }
            self.clock.sleep(delay);
        }

        summary.health = self.health.as_ref().map(HealthTracker::report);
        info!(
            "Acquisition loop stopped after {} cycles ({} published, {} failed)",
            summary.cycles, summary.published, summary.failed
        );
        if let Some(report) = &summary.health {
            info!(
                "Health: {} normal, {} abnormal, {} highly abnormal, lifetime left {} ({:.2}%)",
                report.normal,
                report.abnormal,
                report.highly_abnormal,
                report.lifetime_left,
                report.lifetime_left_percent
            );
        }
        summary
    }
}
