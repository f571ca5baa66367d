//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Text and JSON output helpers

pub mod exit_codes;
pub mod output;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use output::{hex_bytes, parse_hex, parse_u16, render, OutputFormat};
