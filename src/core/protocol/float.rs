//! 32-bit float across two holding registers
//!
//! The meter stores each measurement as an IEEE-754 single spread over two
//! consecutive registers, high word first. Conversion is a reinterpretation
//! of the 32 bits and never a numeric cast.

/// Reinterpret `(high << 16) | low` as an IEEE-754 single
///
/// No rounding or scaling happens here: every bit pattern, including NaN
/// payloads and infinities, comes back unchanged from [`f32_to_registers`].
#[must_use]
pub fn registers_to_f32(high: u16, low: u16) -> f32 {
    f32::from_bits((u32::from(high) << 16) | u32::from(low))
}

/// Split a float into the (high, low) register pair the meter would hold
#[must_use]
pub fn f32_to_registers(value: f32) -> (u16, u16) {
    let bits = value.to_bits();
    ((bits >> 16) as u16, (bits & 0xFFFF) as u16)
}
