//! Modbus RTU framing for "read holding registers"
//!
//! Only function 0x03 with a fixed quantity of two registers is spoken here:
//! every meter value is a float spread over a register pair.

use super::checksum;
use thiserror::Error;

/// Read Holding Registers
pub const READ_HOLDING_REGISTERS: u8 = 0x03;

/// Registers requested per exchange (one f32)
pub const REGISTER_COUNT: u16 = 2;

/// Length of a read request on the wire
pub const REQUEST_LEN: usize = 8;

/// Minimum response length carrying both registers (CRC not included)
pub const MIN_RESPONSE_LEN: usize = 7;

/// Full response length for two registers including CRC
pub const FULL_RESPONSE_LEN: usize = 9;

/// Holding register map of the power meter
pub mod register {
    /// Line voltage (V)
    pub const VOLTAGE: u16 = 0x0000;
    /// Line current (A)
    pub const CURRENT: u16 = 0x0002;
    /// Active power
    pub const POWER: u16 = 0x0004;
    /// Panel temperature (°C)
    pub const TEMPERATURE: u16 = 0x0006;
}

/// Start address of a register pair in the slave's holding-register space
pub type RegisterAddress = u16;

/// Modbus exchange failures
#[derive(Error, Debug)]
pub enum ModbusError {
    /// Nothing came back within the response window
    #[error("no response within {0} ms")]
    Timeout(u64),

    /// Fewer bytes than a complete response
    #[error("short response: {received} bytes, need at least {needed}")]
    ShortResponse {
        /// Bytes received
        received: usize,
        /// Bytes required
        needed: usize,
    },

    /// Response came from another slave
    #[error("slave id mismatch: expected {expected}, got {received}")]
    SlaveMismatch {
        /// Polled slave
        expected: u8,
        /// Slave id in the response
        received: u8,
    },

    /// Response function code is not 0x03 (exceptions included)
    #[error("unexpected function code 0x{0:02X}")]
    FunctionMismatch(u8),

    /// Byte-count field does not describe two registers
    #[error("unexpected byte count {0}")]
    ByteCount(u8),

    /// Trailing CRC does not match the frame
    #[error("CRC mismatch: computed {computed:04X}, received {received:04X}")]
    CrcMismatch {
        /// CRC computed over the frame
        computed: u16,
        /// CRC carried by the frame
        received: u16,
    },

    /// Underlying transport failed
    #[error("transport error: {0}")]
    Transport(#[from] crate::core::transport::TransportError),
}

/// Build the 8-byte read request for two registers at `start_address`
///
/// Layout: `[slave, 0x03, addr_hi, addr_lo, 0x00, 0x02, crc_lo, crc_hi]`
pub fn build_read_request(slave_id: u8, start_address: RegisterAddress) -> Vec<u8> {
    let mut frame = Vec::with_capacity(REQUEST_LEN);
    frame.push(slave_id);
    frame.push(READ_HOLDING_REGISTERS);
    frame.extend_from_slice(&start_address.to_be_bytes());
    frame.extend_from_slice(&REGISTER_COUNT.to_be_bytes());

    checksum::append_crc(&mut frame);

    frame
}

/// Extract the (high, low) register pair from a read response
///
/// Needs at least 7 bytes. The slave id and function code are checked; the
/// byte-count field and anything after byte 6 are ignored here, see
/// [`verify_response_crc`] for the trailing CRC.
pub fn parse_read_response(data: &[u8], expected_slave_id: u8) -> Result<(u16, u16), ModbusError> {
    if data.len() < MIN_RESPONSE_LEN {
        return Err(ModbusError::ShortResponse {
            received: data.len(),
            needed: MIN_RESPONSE_LEN,
        });
    }

    if data[0] != expected_slave_id {
        return Err(ModbusError::SlaveMismatch {
            expected: expected_slave_id,
            received: data[0],
        });
    }

    if data[1] != READ_HOLDING_REGISTERS {
        return Err(ModbusError::FunctionMismatch(data[1]));
    }

    let high = u16::from_be_bytes([data[3], data[4]]);
    let low = u16::from_be_bytes([data[5], data[6]]);

    Ok((high, low))
}

/// Validate byte count and trailing CRC of a two-register response
pub fn verify_response_crc(data: &[u8]) -> Result<(), ModbusError> {
    if data.len() < 3 {
        return Err(ModbusError::ShortResponse {
            received: data.len(),
            needed: FULL_RESPONSE_LEN,
        });
    }

    let byte_count = data[2];
    if usize::from(byte_count) != usize::from(REGISTER_COUNT) * 2 {
        return Err(ModbusError::ByteCount(byte_count));
    }

    let body_len = 3 + usize::from(byte_count);
    if data.len() < body_len + 2 {
        return Err(ModbusError::ShortResponse {
            received: data.len(),
            needed: body_len + 2,
        });
    }

    let computed = checksum::crc16(&data[..body_len]);
    let received = u16::from_le_bytes([data[body_len], data[body_len + 1]]);
    if computed != received {
        return Err(ModbusError::CrcMismatch { computed, received });
    }

    Ok(())
}

/// Build a complete response frame as the slave would send it
///
/// Used by the simulated meter and by tests.
pub fn build_read_response(slave_id: u8, high: u16, low: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FULL_RESPONSE_LEN);
    frame.push(slave_id);
    frame.push(READ_HOLDING_REGISTERS);
    frame.push((REGISTER_COUNT * 2) as u8);
    frame.extend_from_slice(&high.to_be_bytes());
    frame.extend_from_slice(&low.to_be_bytes());

    checksum::append_crc(&mut frame);

    frame
}

/// Decode a read request back into (slave id, start address)
///
/// Returns `None` for anything that is not a well-formed 0x03 request for two
/// registers.
pub fn parse_read_request(data: &[u8]) -> Option<(u8, RegisterAddress)> {
    if data.len() != REQUEST_LEN || !checksum::verify_trailing_crc(data) {
        return None;
    }
    if data[1] != READ_HOLDING_REGISTERS || u16::from_be_bytes([data[4], data[5]]) != REGISTER_COUNT {
        return None;
    }
    Some((data[0], u16::from_be_bytes([data[2], data[3]])))
}

/// Format a frame for log output
pub fn format_frame(data: &[u8]) -> String {
    if data.len() < 4 {
        return format!("RTU: <{}>", hex::encode_upper(data));
    }
    format!(
        "RTU: Slave={:02X} Func={:02X} Data={} CRC={:04X}",
        data[0],
        data[1],
        hex::encode_upper(&data[2..data.len() - 2]),
        u16::from_le_bytes([data[data.len() - 2], data[data.len() - 1]])
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::checksum::crc16;

    #[test]
    fn test_build_read_request_layout() {
        let frame = build_read_request(1, register::VOLTAGE);
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);

        let frame = build_read_request(0x11, 0x1234);
        assert_eq!(frame.len(), REQUEST_LEN);
        assert_eq!(&frame[..6], &[0x11, 0x03, 0x12, 0x34, 0x00, 0x02]);
    }

    #[test]
    fn test_request_crc_reproduces_trailer() {
        for slave_id in [1u8, 17, 247, 255] {
            for address in [0u16, 2, 4, 6, 0x00FF, 0xFF00, 0xFFFF] {
                let frame = build_read_request(slave_id, address);
                let crc = crc16(&frame[..6]);
                assert_eq!(&frame[6..], &crc.to_le_bytes());
            }
        }
    }

    #[test]
    fn test_parse_short_response() {
        for len in 0..MIN_RESPONSE_LEN {
            let data = vec![0x01; len];
            assert!(matches!(
                parse_read_response(&data, 1),
                Err(ModbusError::ShortResponse { received, needed: 7 }) if received == len
            ));
        }
    }

    #[test]
    fn test_parse_ignores_trailing_bytes() {
        let base = [0x01, 0x03, 0x04, 0x43, 0x5C, 0x00, 0x00];
        assert_eq!(parse_read_response(&base, 1).unwrap(), (0x435C, 0x0000));

        let mut long = base.to_vec();
        long.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(parse_read_response(&long, 1).unwrap(), (0x435C, 0x0000));
    }

    #[test]
    fn test_parse_checks_header() {
        let data = [0x02, 0x03, 0x04, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00];
        assert!(matches!(
            parse_read_response(&data, 1),
            Err(ModbusError::SlaveMismatch { expected: 1, received: 2 })
        ));

        // Exception response for function 3
        let data = [0x01, 0x83, 0x02, 0xC0, 0xF1, 0x00, 0x00];
        assert!(matches!(parse_read_response(&data, 1), Err(ModbusError::FunctionMismatch(0x83))));
    }

    #[test]
    fn test_verify_response_crc() {
        let frame = build_read_response(1, 0x41D8, 0x0000);
        assert_eq!(frame.len(), FULL_RESPONSE_LEN);
        assert!(verify_response_crc(&frame).is_ok());

        let mut corrupted = frame.clone();
        corrupted[4] ^= 0x40;
        assert!(matches!(verify_response_crc(&corrupted), Err(ModbusError::CrcMismatch { .. })));

        assert!(matches!(
            verify_response_crc(&frame[..7]),
            Err(ModbusError::ShortResponse { received: 7, needed: 9 })
        ));

        let mut bad_count = frame;
        bad_count[2] = 2;
        assert!(matches!(verify_response_crc(&bad_count), Err(ModbusError::ByteCount(2))));
    }

    #[test]
    fn test_parse_read_request() {
        let frame = build_read_request(5, register::TEMPERATURE);
        assert_eq!(parse_read_request(&frame), Some((5, register::TEMPERATURE)));

        let mut broken = frame;
        broken[7] ^= 0xFF;
        assert_eq!(parse_read_request(&broken), None);
        assert_eq!(parse_read_request(&[0x01, 0x03]), None);
    }

    #[test]
    fn test_format_frame() {
        let frame = build_read_request(1, register::POWER);
        let text = format_frame(&frame);
        assert!(text.starts_with("RTU: Slave=01 Func=03 Data=00040002"));
        assert_eq!(format_frame(&[0x01]), "RTU: <01>");
    }
}
