//! CRC-16 (Modbus variant)
//!
//! Reflected polynomial 0xA001 (0x8005), initial value 0xFFFF, no final XOR.
//! On the wire the CRC travels low byte first.

/// Initial register value
pub const CRC16_INIT: u16 = 0xFFFF;

/// Reflected generator polynomial
pub const CRC16_POLY: u16 = 0xA001;

/// Compute the Modbus RTU CRC over `data`
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Append the CRC of `frame` to itself, low byte first
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check that the last two bytes of `frame` are the CRC of everything before them
pub fn verify_trailing_crc(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let split = frame.len() - 2;
    let received = u16::from_le_bytes([frame[split], frame[split + 1]]);
    crc16(&frame[..split]) == received
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_empty_input_is_init() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_crc16_check_string() {
        // Catalogue check value for CRC-16/MODBUS
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_crc16_read_holding_request() {
        // 01 03 00 00 00 02 C4 0B
        let crc = crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(crc.to_le_bytes(), [0xC4, 0x0B]);
    }

    #[test]
    fn test_crc16_write_single_register_request() {
        // 01 06 00 01 00 03 98 0B
        let crc = crc16(&[0x01, 0x06, 0x00, 0x01, 0x00, 0x03]);
        assert_eq!(crc.to_le_bytes(), [0x98, 0x0B]);
    }

    #[test]
    fn test_append_then_verify() {
        let mut frame = vec![0x11, 0x03, 0x00, 0x6B, 0x00, 0x03];
        append_crc(&mut frame);
        assert_eq!(&frame[6..], &[0x76, 0x87]);
        assert!(verify_trailing_crc(&frame));

        frame[3] ^= 0x01;
        assert!(!verify_trailing_crc(&frame));
    }

    #[test]
    fn test_verify_rejects_tiny_frames() {
        assert!(!verify_trailing_crc(&[]));
        assert!(!verify_trailing_crc(&[0xFF, 0xFF]));
    }
}
