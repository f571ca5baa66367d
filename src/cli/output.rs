//! CLI output formatting

use serde::Serialize;

/// Output format for diagnostics commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human readable text
    #[default]
    Text,
    /// One JSON document
    Json,
}

/// Render `value` as text with `text`, or as JSON
pub fn render<T: Serialize>(
    value: &T,
    format: OutputFormat,
    text: impl FnOnce(&T) -> String,
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Text => Ok(text(value)),
        OutputFormat::Json => serde_json::to_string_pretty(value),
    }
}

/// Space separated upper-case hex, e.g. `01 03 00 00`
pub fn hex_bytes(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}

/// Parse hex input, tolerating spaces, colons and `0x` prefixes
pub fn parse_hex(input: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let cleaned: String = input
        .split(|c: char| c.is_whitespace() || c == ':' || c == ',')
        .map(|part| part.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    hex::decode(cleaned)
}

/// Parse a u16 given in decimal or `0x` hex
pub fn parse_u16(input: &str) -> Result<u16, String> {
    let input = input.trim();
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|e| format!("invalid 16-bit value '{input}': {e}"))
}
