//! Reversible (no quantization) reconstruction of code-block samples.
//!
//! Tier-1 leaves each coefficient in sign-magnitude form with the magnitude
//! aligned to bit 30. With `Mb` magnitude bits the integer value is the
//! magnitude shifted down by `31 - Mb`.

const SIGN_BIT: u32 = 1 << 31;
const MAGNITUDE_MASK: u32 = !SIGN_BIT;

/// Right shift turning an aligned magnitude into an integer, or `None` when
/// `magnitude_bits` is outside what a code-block can hold.
pub fn magnitude_shift(magnitude_bits: u8) -> Option<u32> {
    31u32.checked_sub(magnitude_bits as u32)
}

/// Converts a sign-magnitude Tier-1 value into a signed wavelet coefficient.
pub fn dequantize(raw: u32, shift: u32) -> i32 {
    let magnitude = (raw & MAGNITUDE_MASK).checked_shr(shift).unwrap_or(0) as i32;
    if raw & SIGN_BIT != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Inverse of [`dequantize`], used to build fixtures.
#[cfg(test)]
pub fn quantize(value: i32, shift: u32) -> u32 {
    let sign = if value < 0 { SIGN_BIT } else { 0 };
    sign | (value.unsigned_abs() << shift)
}
