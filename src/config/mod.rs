//! Configuration module
//!
//! Handles node settings loaded from a TOML file

mod settings;

pub use settings::{
    ConnectivitySettings, ControlSettings, LoggingConfig, ModbusSettings, NodeConfig, OutputKind,
    ScheduleSettings, SimulatorSettings, SinkKind, TelemetrySettings,
};

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("{path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },

    /// File is not valid TOML for this layout
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Settings could not be rendered
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// No home directory to derive the default location from
    #[error("could not determine config directory")]
    NoConfigDir,
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "meternode", "Meternode").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default config file path
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}
