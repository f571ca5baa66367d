//! Panel health classification
//!
//! Each reading is checked against the normal operating windows for voltage
//! and temperature. Out-of-window samples shorten the estimated equipment
//! lifetime: one unit for `Abnormal`, two for `HighlyAbnormal`.
//!
//! The lifetime budget is counted in sample periods (hours by default). A
//! node polling every second feeds [`HealthTracker::observe`], which folds all
//! readings of one period into a single sample of the worst class seen.
//! Captures that already hold one reading per period go through
//! [`HealthTracker::record`].

use crate::core::master::Reading;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Normal operating windows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthLimits {
    /// Lowest normal voltage
    pub voltage_min: f32,
    /// Highest normal voltage
    pub voltage_max: f32,
    /// Lowest normal temperature
    pub temperature_min: f32,
    /// Highest normal temperature
    pub temperature_max: f32,
    /// Lifetime budget in samples (8760 = one year of hourly samples)
    pub lifetime_budget: u64,
    /// Length of one sample period for continuous observation
    pub sample_period_secs: u64,
}

impl Default for HealthLimits {
    fn default() -> Self {
        Self {
            voltage_min: 209.0,
            voltage_max: 231.0,
            temperature_min: 24.0,
            temperature_max: 25.0,
            lifetime_budget: 8760,
            sample_period_secs: 3600,
        }
    }
}

impl HealthLimits {
    /// Classify one reading
    pub fn classify(&self, reading: &Reading) -> HealthStatus {
        let voltage_ok = (self.voltage_min..=self.voltage_max).contains(&reading.voltage);
        let temperature_ok = (self.temperature_min..=self.temperature_max).contains(&reading.temperature);

        match (voltage_ok, temperature_ok) {
            (true, true) => HealthStatus::Normal,
            (false, false) => HealthStatus::HighlyAbnormal,
            _ => HealthStatus::Abnormal,
        }
    }

    /// Sample period as a duration
    pub fn sample_period(&self) -> Duration {
        Duration::from_secs(self.sample_period_secs)
    }
}

/// Health class of one sample, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Both quantities in range
    Normal,
    /// Exactly one quantity out of range
    Abnormal,
    /// Both quantities out of range
    HighlyAbnormal,
}

impl HealthStatus {
    /// Lifetime units lost per sample
    pub fn lifetime_cost(self) -> u64 {
        match self {
            Self::Normal => 0,
            Self::Abnormal => 1,
            Self::HighlyAbnormal => 2,
        }
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Abnormal => "Abnormal",
            Self::HighlyAbnormal => "Highly Abnormal",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy)]
struct SampleWindow {
    start: Instant,
    worst: HealthStatus,
}

/// Running health statistics
#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    limits: HealthLimits,
    normal: u64,
    abnormal: u64,
    highly_abnormal: u64,
    window: Option<SampleWindow>,
}

impl HealthTracker {
    /// Tracker using `limits`
    pub fn new(limits: HealthLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Classify one reading and count it as a whole sample
    pub fn record(&mut self, reading: &Reading) -> HealthStatus {
        let status = self.limits.classify(reading);
        self.count(status);
        status
    }

    /// Classify a reading taken at `at` and fold it into its sample period
    ///
    /// The period open at `at` counts as one sample of the worst class seen in
    /// it. A reading a full period or more after the open period started
    /// closes that period and opens the next one.
    pub fn observe(&mut self, reading: &Reading, at: Instant) -> HealthStatus {
        let status = self.limits.classify(reading);
        let period = self.limits.sample_period();

        match &mut self.window {
            Some(window) if at.saturating_duration_since(window.start) < period => {
                window.worst = window.worst.max(status);
            }
            _ => {
                if let Some(closed) = self.window.take() {
                    self.count(closed.worst);
                }
                self.window = Some(SampleWindow { start: at, worst: status });
            }
        }
        status
    }

    fn count(&mut self, status: HealthStatus) {
        match status {
            HealthStatus::Normal => self.normal += 1,
            HealthStatus::Abnormal => self.abnormal += 1,
            HealthStatus::HighlyAbnormal => self.highly_abnormal += 1,
        }
    }

    /// Samples so far, the open period included
    pub fn total(&self) -> u64 {
        self.normal + self.abnormal + self.highly_abnormal + u64::from(self.window.is_some())
    }

    /// Summary of everything recorded, the open period counted as one sample
    pub fn report(&self) -> HealthReport {
        let mut counts = self.clone();
        if let Some(open) = counts.window.take() {
            counts.count(open.worst);
        }
        counts.summarize()
    }

    fn summarize(&self) -> HealthReport {
        let total = self.total();
        let lifetime_loss = self.abnormal * HealthStatus::Abnormal.lifetime_cost()
            + self.highly_abnormal * HealthStatus::HighlyAbnormal.lifetime_cost();
        let budget = self.limits.lifetime_budget;
        let lifetime_left = budget as i64 - lifetime_loss as i64;

        let percent = |part: u64, whole: u64| {
            if whole == 0 {
                0.0
            } else {
                part as f64 * 100.0 / whole as f64
            }
        };

        HealthReport {
            total,
            normal: self.normal,
            abnormal: self.abnormal,
            highly_abnormal: self.highly_abnormal,
            normal_percent: percent(self.normal, total),
            abnormal_percent: percent(self.abnormal + self.highly_abnormal, total),
            lifetime_loss,
            lifetime_left,
            lifetime_left_percent: if budget == 0 {
                0.0
            } else {
                lifetime_left as f64 * 100.0 / budget as f64
            },
        }
    }
}

/// Health summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Samples analysed
    pub total: u64,
    /// Normal samples
    pub normal: u64,
    /// Abnormal samples
    pub abnormal: u64,
    /// Highly abnormal samples
    pub highly_abnormal: u64,
    /// Share of normal samples
    pub normal_percent: f64,
    /// Share of abnormal and highly abnormal samples
    pub abnormal_percent: f64,
    /// Lifetime units lost
    pub lifetime_loss: u64,
    /// Lifetime units left (negative once the budget is exhausted)
    pub lifetime_left: i64,
    /// Lifetime left as a share of the budget
    pub lifetime_left_percent: f64,
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Samples            : {}", self.total)?;
        writeln!(f, "Normal             : {} ({:.2}%)", self.normal, self.normal_percent)?;
        writeln!(f, "Abnormal           : {}", self.abnormal)?;
        writeln!(f, "Highly Abnormal    : {}", self.highly_abnormal)?;
        writeln!(f, "Abnormal share     : {:.2}%", self.abnormal_percent)?;
        writeln!(f, "Lifetime loss      : {}", self.lifetime_loss)?;
        write!(f, "Lifetime left      : {} ({:.2}%)", self.lifetime_left, self.lifetime_left_percent)
    }
}
