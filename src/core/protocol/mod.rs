//! Protocol implementations
//!
//! - CRC-16 (Modbus variant)
//! - Modbus RTU read-holding-registers framing
//! - Float decoding across a register pair

pub mod checksum;
pub mod float;
pub mod modbus;

pub use checksum::crc16;
pub use float::{f32_to_registers, registers_to_f32};
pub use modbus::{
    build_read_request, parse_read_response, verify_response_crc, register, ModbusError,
    RegisterAddress,
};
