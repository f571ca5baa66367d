//! Logging initialisation for the binaries
//!
//! Console output always; a daily rolling file when a log directory is
//! configured. `RUST_LOG` overrides the configured level.

use crate::config::LoggingConfig;
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Logging setup errors
#[derive(Error, Debug)]
pub enum LoggingError {
    /// Level string is not a valid filter
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    /// Log directory could not be created
    #[error("log directory {path}: {source}")]
    Directory {
        /// Directory
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },

    /// A global subscriber is already installed
    #[error("logging already initialised: {0}")]
    Init(#[from] TryInitError),
}

/// Build the filter: `RUST_LOG` first, then `level`
pub fn env_filter(level: &str) -> Result<EnvFilter, ParseError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level),
    }
}

/// Install the global subscriber
///
/// Keep the returned guard alive for the whole process, otherwise buffered
/// file output is lost.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = env_filter(&config.level)?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(if config.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    });

    let mut guard = None;
    if let Some(dir) = &config.directory {
        std::fs::create_dir_all(dir).map_err(|source| LoggingError::Directory {
            path: dir.clone(),
            source,
        })?;
        let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry().with(layers).with(filter).try_init()?;
    Ok(guard)
}
