//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::protocol::ModbusError;
use crate::core::telemetry::TelemetryError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Slave did not answer in time
    pub const TIMEOUT: u8 = 4;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Protocol error (bad frame, CRC, header)
    pub const PROTOCOL_ERROR: u8 = 9;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Data validation failed
    pub const VALIDATION_FAILED: u8 = 17;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success carrying output
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Failure with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Invalid command line input
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::INVALID_ARGS, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
            ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
            ErrorKind::TimedOut => ExitCodes::TIMEOUT,
            _ => ExitCodes::ERROR,
        };

        Self::Error(code, err.to_string())
    }
}

impl From<TransportError> for CliResult {
    fn from(err: TransportError) -> Self {
        let code = match &err {
            TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
            TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
            TransportError::InvalidConfiguration(_) => ExitCodes::CONFIG_ERROR,
            TransportError::ConnectionFailed(_) | TransportError::NotConnected => ExitCodes::CONNECTION_FAILED,
            TransportError::IoError(_) => ExitCodes::ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<ModbusError> for CliResult {
    fn from(err: ModbusError) -> Self {
        match err {
            ModbusError::Transport(inner) => inner.into(),
            ModbusError::Timeout(_) => Self::Error(ExitCodes::TIMEOUT, err.to_string()),
            _ => Self::Error(ExitCodes::PROTOCOL_ERROR, err.to_string()),
        }
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        let code = match &err {
            ConfigError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ExitCodes::FILE_NOT_FOUND
            }
            _ => ExitCodes::CONFIG_ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<TelemetryError> for CliResult {
    fn from(err: TelemetryError) -> Self {
        match err {
            TelemetryError::Io(inner) => inner.into(),
            TelemetryError::Serialize(_) => Self::Error(ExitCodes::VALIDATION_FAILED, err.to_string()),
            TelemetryError::NotConnected => Self::Error(ExitCodes::CONNECTION_FAILED, err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CliResult {
    fn from(err: serde_json::Error) -> Self {
        Self::Error(ExitCodes::INTERNAL_ERROR, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Response timeout",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Protocol error",
        14 => "Port not found",
        17 => "Validation failed",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 6, 7, 8, 9, 14, 17, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
