//! Signed index arithmetic with floor semantics.
//!
//! Domain indices may be negative inside halo regions, so every
//! division-like operation here rounds toward negative infinity rather
//! than toward zero. Rust's `/` and `%` truncate, which would round
//! `-1 / 4` to `0` instead of the `-1` the tiling math needs.

/// Signed index wide enough for whole-domain element counts.
pub type Idx = i64;

/// Floor division: quotient rounded toward negative infinity.
#[inline]
pub fn div_flr(num: Idx, den: Idx) -> Idx {
    debug_assert!(den > 0, "floor division by non-positive {den}");
    num.div_euclid(den)
}

/// Floor modulo: remainder with the sign of the divisor (always >= 0 here).
#[inline]
pub fn rem_flr(num: Idx, den: Idx) -> Idx {
    debug_assert!(den > 0, "floor modulo by non-positive {den}");
    num.rem_euclid(den)
}

/// Round `val` down to a multiple of `mult`, toward negative infinity.
#[inline]
pub fn round_down_flr(val: Idx, mult: Idx) -> Idx {
    div_flr(val, mult) * mult
}

/// Round `val` up to a multiple of `mult`, away from negative infinity.
#[inline]
pub fn round_up_flr(val: Idx, mult: Idx) -> Idx {
    div_flr(val + mult - 1, mult) * mult
}
