//! Cooling fan control
//!
//! [`ActuatorController`] is a pure two-state machine driven by temperature.
//! It only yields a command when the state has to change, so the physical
//! line is written on transitions and never otherwise.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

/// Fan state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ActuatorState {
    /// Fan disengaged
    #[default]
    #[serde(rename = "OFF")]
    Off,
    /// Fan engaged
    #[serde(rename = "ON")]
    On,
}

impl ActuatorState {
    /// Wire label used in telemetry
    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
        }
    }

    /// Whether the fan runs
    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

impl fmt::Display for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Threshold derived from a baseline temperature
///
/// `threshold = baseline * factor`, fixed for the life of the process.
pub fn threshold_from_baseline(baseline: f32, factor: f32) -> f32 {
    baseline * factor
}

/// Temperature-driven on/off controller
#[derive(Debug, Clone)]
pub struct ActuatorController {
    threshold: f32,
    hysteresis: f32,
    state: ActuatorState,
}

impl ActuatorController {
    /// Single-threshold controller, starting Off
    pub fn new(threshold: f32) -> Self {
        Self::with_hysteresis(threshold, 0.0)
    }

    /// Controller that only switches Off below `threshold - hysteresis`
    pub fn with_hysteresis(threshold: f32, hysteresis: f32) -> Self {
        Self {
            threshold,
            hysteresis: hysteresis.max(0.0),
            state: ActuatorState::Off,
        }
    }

    /// Switch-on threshold
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Current state
    pub fn state(&self) -> ActuatorState {
        self.state
    }

    /// Command needed for `temperature`, if any
    pub fn evaluate(&self, temperature: f32) -> Option<ActuatorState> {
        match self.state {
            ActuatorState::Off if temperature >= self.threshold => Some(ActuatorState::On),
            ActuatorState::On if temperature < self.threshold - self.hysteresis => Some(ActuatorState::Off),
            _ => None,
        }
    }

    /// Record that the output now is in `state`
    pub fn apply(&mut self, state: ActuatorState) {
        self.state = state;
    }

    /// Evaluate and apply in one step
    pub fn update(&mut self, temperature: f32) -> Option<ActuatorState> {
        let command = self.evaluate(temperature)?;
        self.apply(command);
        Some(command)
    }
}

/// Actuator output errors
#[derive(Error, Debug)]
pub enum ActuatorError {
    /// Writing the line failed
    #[error("output {path}: {source}")]
    Io {
        /// Line being written
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },
}

/// A single digital output line
pub trait DigitalOutput: Send {
    /// Drive the line to match `state`
    fn set(&mut self, state: ActuatorState) -> Result<(), ActuatorError>;
}

impl<T: DigitalOutput + ?Sized> DigitalOutput for Box<T> {
    fn set(&mut self, state: ActuatorState) -> Result<(), ActuatorError> {
        (**self).set(state)
    }
}

/// Output that only logs, for hosts without a fan line
#[derive(Debug, Default)]
pub struct LogOutput;

impl DigitalOutput for LogOutput {
    fn set(&mut self, state: ActuatorState) -> Result<(), ActuatorError> {
        info!("Fan {}", state);
        Ok(())
    }
}

/// GPIO line exported through sysfs (`/sys/class/gpio/gpioN/value`)
#[derive(Debug, Clone)]
pub struct SysfsOutput {
    path: PathBuf,
    active_high: bool,
}

impl SysfsOutput {
    /// Drive the value file at `path`
    pub fn new(path: impl Into<PathBuf>, active_high: bool) -> Self {
        Self {
            path: path.into(),
            active_high,
        }
    }

    /// Level written for `state`
    pub fn level(&self, state: ActuatorState) -> &'static [u8] {
        if state.is_on() == self.active_high {
            b"1"
        } else {
            b"0"
        }
    }
}

impl DigitalOutput for SysfsOutput {
    fn set(&mut self, state: ActuatorState) -> Result<(), ActuatorError> {
        let level = self.level(state);
        OpenOptions::new()
            .write(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(level))
            .map_err(|source| ActuatorError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_from_baseline() {
        let threshold = threshold_from_baseline(27.0, 1.02);
        assert!((threshold - 27.54).abs() < 1e-5);
    }

    #[test]
    fn test_transition_table() {
        let mut controller = ActuatorController::new(27.54);

        assert_eq!(controller.update(26.0), None);
        assert_eq!(controller.update(27.54), Some(ActuatorState::On));
        assert_eq!(controller.state(), ActuatorState::On);
        assert_eq!(controller.update(27.54), None);
        assert_eq!(controller.update(27.53), Some(ActuatorState::Off));
        assert_eq!(controller.state(), ActuatorState::Off);
    }

    #[test]
    fn test_rising_sequence_switches_once() {
        let mut controller = ActuatorController::new(30.0);
        let commands: Vec<_> = (0..40)
            .map(|i| controller.update(20.0 + i as f32 * 0.5))
            .filter_map(|c| c)
            .collect();
        assert_eq!(commands, vec![ActuatorState::On]);
    }

    #[test]
    fn test_hovering_above_threshold_is_silent() {
        let mut controller = ActuatorController::new(27.54);
        assert_eq!(controller.update(28.0), Some(ActuatorState::On));
        for temperature in [27.6, 29.0, 27.54, 35.0, 27.9] {
            assert_eq!(controller.update(temperature), None);
        }
    }

    fn run_states(controller: &mut ActuatorController, temperatures: &[f32]) -> Vec<ActuatorState> {
        temperatures
            .iter()
            .map(|&t| {
                controller.update(t);
                controller.state()
            })
            .collect()
    }

    #[test]
    fn test_baseline_scenario() {
        use ActuatorState::{Off, On};
        let threshold = threshold_from_baseline(27.0, 1.02);
        let temperatures = [26.0, 27.0, 27.6, 27.3];

        // 27.3 is below 27.54, so a plain threshold switches back off
        let mut plain = ActuatorController::new(threshold);
        assert_eq!(run_states(&mut plain, &temperatures), vec![Off, Off, On, Off]);

        // A deadband wider than the dip keeps the fan running
        let mut banded = ActuatorController::with_hysteresis(threshold, 0.3);
        assert_eq!(run_states(&mut banded, &temperatures), vec![Off, Off, On, On]);
    }

    #[test]
    fn test_single_threshold_chatters() {
        let mut controller = ActuatorController::new(27.5);
        let commands: Vec<_> = [27.5, 27.49, 27.5, 27.49]
            .into_iter()
            .filter_map(|t| controller.update(t))
            .collect();
        assert_eq!(commands.len(), 4);
    }

    #[test]
    fn test_hysteresis_suppresses_chatter() {
        let mut controller = ActuatorController::with_hysteresis(27.5, 0.5);
        assert_eq!(controller.update(27.5), Some(ActuatorState::On));
        assert_eq!(controller.update(27.1), None);
        assert_eq!(controller.update(27.0), None);
        assert_eq!(controller.update(26.9), Some(ActuatorState::Off));
    }

    #[test]
    fn test_evaluate_does_not_change_state() {
        let controller = ActuatorController::new(25.0);
        assert_eq!(controller.evaluate(30.0), Some(ActuatorState::On));
        assert_eq!(controller.state(), ActuatorState::Off);
    }

    #[test]
    fn test_sysfs_output_writes_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value");
        std::fs::write(&path, "0").unwrap();

        let mut output = SysfsOutput::new(&path, true);
        output.set(ActuatorState::On).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1");

        let mut inverted = SysfsOutput::new(&path, false);
        inverted.set(ActuatorState::On).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");
    }

    #[test]
    fn test_sysfs_output_missing_line() {
        let mut output = SysfsOutput::new("/nonexistent/gpio/value", true);
        assert!(matches!(output.set(ActuatorState::On), Err(ActuatorError::Io { .. })));
    }

    #[test]
    fn test_state_serializes_as_label() {
        assert_eq!(serde_json::to_string(&ActuatorState::On).unwrap(), "\"ON\"");
        assert_eq!(ActuatorState::Off.to_string(), "OFF");
    }
}
