//! Packed soft-float formats.
//!
//! VR32 runs floating point at three widths inside a 32-bit lane:
//!
//! - **f32**: one IEEE-754 single per lane (host arithmetic).
//! - **F16×2**: two IEEE-754 halves (1-5-10) packed in one word.
//! - **F8×4**: four quarter floats (1-4-3, bias 7) packed in one word.
//!
//! The half and quarter formats are implemented in software: words are
//! unpacked to host `f32` lanes, operated on, and re-encoded with
//! round-to-nearest-even. Subnormals flush to zero in both directions and
//! every NaN re-encodes to a single canonical bit pattern.

mod f16x2;
mod f8x4;

pub use f16x2::F16x2;
pub use f8x4::F8x4;

/// Reinterpret a word as an IEEE-754 single.
#[inline]
pub fn as_f32(x: u32) -> f32 {
    f32::from_bits(x)
}

/// Reinterpret an IEEE-754 single as a word.
#[inline]
pub fn as_u32(x: f32) -> u32 {
    x.to_bits()
}

/// NaN test on the raw bit pattern of an IEEE-754 single.
#[inline]
pub fn f32_is_nan(x: u32) -> bool {
    (x & 0x7F80_0000) == 0x7F80_0000 && (x & 0x007F_FFFF) != 0
}

/// Minimum with the shared lane semantics: the second operand wins only
/// when it compares strictly below the first (a NaN first operand is kept).
#[inline]
pub fn lane_min(a: f32, b: f32) -> f32 {
    if b < a {
        b
    } else {
        a
    }
}

/// Maximum counterpart of [`lane_min`].
#[inline]
pub fn lane_max(a: f32, b: f32) -> f32 {
    if a < b {
        b
    } else {
        a
    }
}
