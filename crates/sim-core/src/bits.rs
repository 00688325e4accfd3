//! Width-bounded integer helpers shared by fields, registers, and micros.
//!
//! Every stored quantity in a simulated machine is at most 64 bits wide. Values
//! are kept as two's-complement `i64` narrowed to their owner's width;
//! intermediate results use `i128` so that carries and overflows out of a
//! 64-bit word stay observable.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]

/// Widest register, RAM cell, or instruction the engine supports.
pub const MAX_WIDTH: u32 = 64;

/// Mask with the low `width` bits set.
#[must_use]
pub const fn mask(width: u32) -> u64 {
    if width >= MAX_WIDTH {
        u64::MAX
    } else {
        (1_u64 << width) - 1
    }
}

/// Inclusive signed range `[-2^(w-1), 2^(w-1) - 1]` for a `width`-bit value.
///
/// A zero-width quantity can only hold `0`.
#[must_use]
pub const fn signed_range(width: u32) -> (i128, i128) {
    if width == 0 {
        (0, 0)
    } else {
        (-(1_i128 << (width - 1)), (1_i128 << (width - 1)) - 1)
    }
}

/// Inclusive unsigned range `[0, 2^w - 1]` for a `width`-bit value.
#[must_use]
pub const fn unsigned_range(width: u32) -> (i128, i128) {
    (0, (1_i128 << width) - 1)
}

/// Returns `true` when `value` fits in `width` bits as a two's-complement number.
#[must_use]
pub const fn fits_signed(value: i128, width: u32) -> bool {
    let (min, max) = signed_range(width);
    value >= min && value <= max
}

/// Returns `true` when `value` fits in `width` bits as an unsigned number.
#[must_use]
pub const fn fits_unsigned(value: i128, width: u32) -> bool {
    let (min, max) = unsigned_range(width);
    value >= min && value <= max
}

/// Returns `true` when `value` fits in `width` bits under either interpretation.
#[must_use]
pub const fn fits_either(value: i128, width: u32) -> bool {
    let (min, _) = signed_range(width);
    let (_, max) = unsigned_range(width);
    value >= min && value <= max
}

/// Reinterprets the low `width` bits of `bits` as a two's-complement number.
#[must_use]
pub const fn sign_extend(bits: u64, width: u32) -> i64 {
    if width == 0 {
        return 0;
    }
    if width >= MAX_WIDTH {
        return bits as i64;
    }
    let shift = MAX_WIDTH - width;
    ((bits << shift) as i64) >> shift
}

/// Wraps an exact result into `width` bits (two's-complement wraparound).
#[must_use]
pub const fn narrow(value: i128, width: u32) -> i64 {
    sign_extend((value as u64) & mask(width), width)
}

/// Low `width` bits of `value` as an unsigned quantity.
#[must_use]
pub const fn unsigned_bits(value: i64, width: u32) -> u64 {
    (value as u64) & mask(width)
}

/// Right-shift that moves a `num_bits` range starting at `start` down to bit 0.
///
/// Bit positions count from the most-significant end of the `width`-bit word
/// unless `from_right` is set, in which case bit 0 is the least-significant bit.
#[must_use]
pub const fn range_shift(width: u32, start: u32, num_bits: u32, from_right: bool) -> u32 {
    if from_right {
        start
    } else {
        width - start - num_bits
    }
}

/// Returns `true` when a `num_bits` range starting at `start` lies inside `width`.
#[must_use]
pub const fn range_fits(width: u32, start: u32, num_bits: u32) -> bool {
    num_bits >= 1 && start < width && num_bits <= width - start
}

/// Extracts a bit range from a `width`-bit value as an unsigned quantity.
#[must_use]
pub const fn extract(value: i64, width: u32, start: u32, num_bits: u32, from_right: bool) -> u64 {
    let shift = range_shift(width, start, num_bits, from_right);
    (unsigned_bits(value, width) >> shift) & mask(num_bits)
}

/// Replaces a bit range of a `width`-bit value, returning the narrowed result.
#[must_use]
pub const fn insert(
    value: i64,
    width: u32,
    start: u32,
    num_bits: u32,
    bits: u64,
    from_right: bool,
) -> i64 {
    let shift = range_shift(width, start, num_bits, from_right);
    let field_mask = mask(num_bits) << shift;
    let merged = (unsigned_bits(value, width) & !field_mask) | ((bits & mask(num_bits)) << shift);
    sign_extend(merged, width)
}
