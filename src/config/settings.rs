//! Node settings

use super::ConfigError;
use crate::core::acquisition::{PublishSettings, Schedule};
use crate::core::actuator::threshold_from_baseline;
use crate::core::health::HealthLimits;
use crate::core::master::MasterConfig;
use crate::core::protocol::modbus::{FULL_RESPONSE_LEN, MIN_RESPONSE_LEN};
use crate::core::transport::{FaultConfig, MeterValues, SerialConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Serial line to the meter
    pub serial: SerialConfig,
    /// Modbus master settings
    pub modbus: ModbusSettings,
    /// Fan control
    pub control: ControlSettings,
    /// Telemetry publishing
    pub telemetry: TelemetrySettings,
    /// Network link supervision
    pub connectivity: ConnectivitySettings,
    /// Loop timing
    pub schedule: ScheduleSettings,
    /// Health classification windows
    pub health: HealthLimits,
    /// Simulated meter used with `--simulate`
    pub simulator: SimulatorSettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Load config from `path`; the file must exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from the default location, falling back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = super::config_file().ok_or(ConfigError::NoConfigDir)?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Pretty TOML rendering
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the node cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.serial.port.is_empty() {
            return invalid("serial.port is empty".into());
        }
        if self.serial.baud_rate == 0 {
            return invalid("serial.baud_rate must be positive".into());
        }
        if !(5..=8).contains(&self.serial.data_bits) {
            return invalid(format!("serial.data_bits must be 5-8, got {}", self.serial.data_bits));
        }
        if !(1..=2).contains(&self.serial.stop_bits) {
            return invalid(format!("serial.stop_bits must be 1 or 2, got {}", self.serial.stop_bits));
        }
        if !(1..=247).contains(&self.modbus.slave_id) {
            return invalid(format!("modbus.slave_id must be 1-247, got {}", self.modbus.slave_id));
        }
        if self.modbus.response_timeout_ms == 0 {
            return invalid("modbus.response_timeout_ms must be positive".into());
        }
        let needed = if self.modbus.verify_crc {
            FULL_RESPONSE_LEN
        } else {
            MIN_RESPONSE_LEN
        };
        if self.modbus.max_response_bytes < needed {
            return invalid(format!(
                "modbus.max_response_bytes must be at least {} (verify_crc = {})",
                needed, self.modbus.verify_crc
            ));
        }
        if !(self.control.threshold_factor > 0.0) {
            return invalid("control.threshold_factor must be positive".into());
        }
        if !self.control.baseline_temperature.is_finite() {
            return invalid("control.baseline_temperature must be finite".into());
        }
        if !(self.control.hysteresis >= 0.0) {
            return invalid("control.hysteresis must not be negative".into());
        }
        if self.control.output == OutputKind::Sysfs && self.control.gpio_path.is_none() {
            return invalid("control.gpio_path is required for the sysfs output".into());
        }
        if self.telemetry.sink == SinkKind::File && self.telemetry.path.is_none() {
            return invalid("telemetry.path is required for the file sink".into());
        }
        if self.telemetry.topic.is_empty() {
            return invalid("telemetry.topic is empty".into());
        }

        let schedule = &self.schedule;
        for (name, value) in [
            ("cycle_interval_ms", schedule.cycle_interval_ms),
            ("link_retry_ms", schedule.link_retry_ms),
            ("sink_retry_ms", schedule.sink_retry_ms),
            ("invalid_retry_ms", schedule.invalid_retry_ms),
        ] {
            if value == 0 {
                return invalid(format!("schedule.{name} must be positive"));
            }
        }
        if schedule.cycle_budget_ms == Some(0) {
            return invalid("schedule.cycle_budget_ms must be positive".into());
        }

        if self.health.voltage_min > self.health.voltage_max {
            return invalid("health voltage range is inverted".into());
        }
        if self.health.temperature_min > self.health.temperature_max {
            return invalid("health temperature range is inverted".into());
        }
        if self.health.sample_period_secs == 0 {
            return invalid("health.sample_period_secs must be positive".into());
        }

        let faults = &self.simulator.faults;
        for (name, p) in [
            ("drop_probability", faults.drop_probability),
            ("truncate_probability", faults.truncate_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return invalid(format!("simulator.faults.{name} must be within 0-1"));
            }
        }

        Ok(())
    }

    /// Modbus master settings
    pub fn master_config(&self) -> MasterConfig {
        MasterConfig {
            slave_id: self.modbus.slave_id,
            response_timeout: Duration::from_millis(self.modbus.response_timeout_ms),
            max_response_bytes: self.modbus.max_response_bytes,
            verify_crc: self.modbus.verify_crc,
        }
    }

    /// Loop timing
    pub fn loop_schedule(&self) -> Schedule {
        let s = &self.schedule;
        Schedule {
            cycle_interval: Duration::from_millis(s.cycle_interval_ms),
            link_retry: Duration::from_millis(s.link_retry_ms),
            sink_retry: Duration::from_millis(s.sink_retry_ms),
            invalid_retry: Duration::from_millis(s.invalid_retry_ms),
            cycle_budget: s.cycle_budget_ms.map(Duration::from_millis),
        }
    }

    /// Payload identity and topic
    pub fn publish_settings(&self) -> PublishSettings {
        PublishSettings {
            status: self.telemetry.status.clone(),
            device_id: self.telemetry.device_id.clone(),
            topic: self.telemetry.topic.clone(),
        }
    }
}

/// Modbus master settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusSettings {
    /// Slave address (1-247)
    pub slave_id: u8,
    /// Bounded wait per exchange
    pub response_timeout_ms: u64,
    /// Read buffer size
    pub max_response_bytes: usize,
    /// Check the trailing CRC of responses
    pub verify_crc: bool,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for ModbusSettings {
    fn default() -> Self {
        let master = MasterConfig::default();
        Self {
            slave_id: master.slave_id,
            response_timeout_ms: millis(master.response_timeout),
            max_response_bytes: master.max_response_bytes,
            verify_crc: master.verify_crc,
        }
    }
}

/// Fan output kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Log transitions only
    #[default]
    Log,
    /// GPIO value file
    Sysfs,
}

/// Fan control settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    /// Baseline temperature (°C)
    pub baseline_temperature: f32,
    /// Threshold multiplier applied to the baseline
    pub threshold_factor: f32,
    /// Deadband below the threshold before switching off
    pub hysteresis: f32,
    /// Output kind
    pub output: OutputKind,
    /// GPIO value file for the sysfs output
    pub gpio_path: Option<PathBuf>,
    /// Whether a high level engages the fan
    pub active_high: bool,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            baseline_temperature: 27.0,
            threshold_factor: 1.02,
            hysteresis: 0.0,
            output: OutputKind::Log,
            gpio_path: None,
            active_high: true,
        }
    }
}

impl ControlSettings {
    /// Switch-on threshold
    pub fn threshold(&self) -> f32 {
        threshold_from_baseline(self.baseline_temperature, self.threshold_factor)
    }
}

/// Telemetry sink kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// JSON lines on standard output
    #[default]
    Stdout,
    /// JSON lines appended to a file
    File,
}

/// Telemetry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Device identifier stamped on every payload
    pub device_id: String,
    /// Node status string
    pub status: String,
    /// Publish topic
    pub topic: String,
    /// Sink kind
    pub sink: SinkKind,
    /// Output file for the file sink
    pub path: Option<PathBuf>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        let publish = PublishSettings::default();
        Self {
            device_id: publish.device_id,
            status: publish.status,
            topic: publish.topic,
            sink: SinkKind::Stdout,
            path: None,
        }
    }
}

/// Network link supervision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivitySettings {
    /// Interface to watch; without one the link counts as always up
    pub interface: Option<String>,
    /// Command run to bring the link back
    pub reconnect_command: Option<Vec<String>>,
}

/// Loop timing in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Wait after a published cycle
    pub cycle_interval_ms: u64,
    /// Wait after a failed link check
    pub link_retry_ms: u64,
    /// Wait while the sink is not connected
    pub sink_retry_ms: u64,
    /// Wait after a cycle with unusable values
    pub invalid_retry_ms: u64,
    /// Longest acceptable read phase
    pub cycle_budget_ms: Option<u64>,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        let schedule = Schedule::default();
        Self {
            cycle_interval_ms: millis(schedule.cycle_interval),
            link_retry_ms: millis(schedule.link_retry),
            sink_retry_ms: millis(schedule.sink_retry),
            invalid_retry_ms: millis(schedule.invalid_retry),
            cycle_budget_ms: None,
        }
    }
}

/// Simulated meter settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    /// Served values
    pub values: MeterValues,
    /// Fault injection
    pub faults: FaultConfig,
    /// Fixed RNG seed
    pub seed: Option<u64>,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Directory for daily rolling log files
    pub directory: Option<PathBuf>,
    /// Log file name prefix
    pub file_prefix: String,
    /// JSON console output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "meternode.log".to_string(),
            json: false,
        }
    }
}
