//! Lane masks for partial-vector evaluation.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign};

/// A bitmask over the lanes of one folded vector.
///
/// Bit `i` corresponds to the lane visited `i`-th in fold layout order
/// (see `FoldShape::visit_points`). At most 64 lanes are supported,
/// which covers every fold the stencil compiler emits.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LaneMask(pub u64);

impl LaneMask {
    /// All lanes enabled; the unmasked sentinel passed to full-vector calls.
    pub const FULL: LaneMask = LaneMask(u64::MAX);

    /// No lanes enabled.
    pub const EMPTY: LaneMask = LaneMask(0);

    /// True if no lane is enabled.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True if this is the unmasked sentinel.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.0 == u64::MAX
    }

    /// Whether lane `i` is enabled.
    #[inline]
    pub fn lane(&self, i: usize) -> bool {
        debug_assert!(i < 64);
        (self.0 >> i) & 1 == 1
    }

    /// Number of enabled lanes among the low `nlanes` bits.
    pub fn count(&self, nlanes: usize) -> usize {
        debug_assert!(nlanes <= 64);
        let keep = if nlanes == 64 {
            u64::MAX
        } else {
            (1u64 << nlanes) - 1
        };
        (self.0 & keep).count_ones() as usize
    }
}

impl BitAnd for LaneMask {
    type Output = LaneMask;

    #[inline]
    fn bitand(self, rhs: LaneMask) -> LaneMask {
        LaneMask(self.0 & rhs.0)
    }
}

impl BitAndAssign for LaneMask {
    #[inline]
    fn bitand_assign(&mut self, rhs: LaneMask) {
        self.0 &= rhs.0;
    }
}

impl fmt::Debug for LaneMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LaneMask({:#x})", self.0)
    }
}
