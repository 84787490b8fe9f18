//! 32-bit multiply-add string hash used for fingerprint identity.
//!
//! The algorithm is fixed: fingerprints already stored by earlier harness runs
//! must keep matching. Accumulator starts at 5381 and absorbs each UTF-16 code
//! unit as `acc * 33 + c` with i32 wraparound; the output is the magnitude of
//! the final accumulator as 8 lowercase hex digits.

/// Width of a rendered fingerprint.
pub const FINGERPRINT_HEX_WIDTH: usize = 8;

const SEED: i32 = 5381;

/// Raw 32-bit magnitude of `input`.
#[must_use]
pub fn hash32(input: &str) -> u32 {
    input
        .encode_utf16()
        .fold(SEED, |acc, unit| {
            acc.wrapping_mul(33).wrapping_add(i32::from(unit))
        })
        .unsigned_abs()
}

/// `hash32` rendered as zero-padded lowercase hex.
#[must_use]
pub fn hash32_hex(input: &str) -> String {
    format!("{:0width$x}", hash32(input), width = FINGERPRINT_HEX_WIDTH)
}
