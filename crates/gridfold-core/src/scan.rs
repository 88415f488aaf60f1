//! Scan descriptors: the iteration ranges handed down the pipeline.

use std::fmt;

use crate::idx::Idx;
use crate::indices::Indices;

/// The iteration descriptor passed from micro-block driver to kernels.
///
/// `begin`/`end` bound the overall half-open interval to cover;
/// `start`/`stop` are the current window within it, used by nested loop
/// code. A descriptor is either in element units or normalized
/// (divided by the fold lengths); the two forms never mix in one call.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ScanIndices {
    /// First index to cover, per dim.
    pub begin: Indices,
    /// One past the last index to cover, per dim.
    pub end: Indices,
    /// Start of the current window.
    pub start: Indices,
    /// Stop of the current window.
    pub stop: Indices,
    /// Step in each dim (>= 1).
    pub stride: Indices,
    /// Tile shape for cache-friendly traversal.
    pub tile_size: Indices,
    /// Vector-alignment reference.
    pub align: Indices,
    /// Offset applied before alignment rounding.
    pub align_ofs: Indices,
}

impl ScanIndices {
    /// A fresh descriptor covering `[begin, end)` with unit stride.
    pub fn new(begin: Indices, end: Indices) -> Self {
        debug_assert!(begin.all_le(&end), "begin {begin:?} > end {end:?}");
        let ndims = begin.ndims();
        Self {
            begin,
            end,
            start: begin,
            stop: end,
            stride: Indices::splat(1, ndims),
            tile_size: end.sub(&begin),
            align: Indices::splat(1, ndims),
            align_ofs: Indices::splat(0, ndims),
        }
    }

    /// Number of stencil dims.
    pub fn ndims(&self) -> usize {
        self.begin.ndims()
    }

    /// Seed an inner descriptor from this one's current window.
    ///
    /// The child covers exactly `[start, stop)` of the parent and
    /// inherits stride, tiling, and alignment.
    pub fn create_inner(&self) -> ScanIndices {
        let mut inner = *self;
        inner.begin = self.start;
        inner.end = self.stop;
        inner.start = self.start;
        inner.stop = self.stop;
        inner
    }

    /// Set strides from per-dim block sizes, clamped to at least `min`.
    pub fn set_strides_from_inner(&mut self, block_sizes: &Indices, min: Idx) {
        debug_assert_eq!(block_sizes.ndims(), self.ndims());
        for i in 0..self.ndims() {
            self.stride[i] = block_sizes[i].max(min);
        }
    }

    /// Total points covered by `[begin, end)`.
    pub fn num_points(&self) -> Idx {
        self.end.sub(&self.begin).product().max(0)
    }

    /// Human-readable range, for diagnostics.
    pub fn range_str(&self) -> String {
        format!("{:?}..{:?}", self.begin, self.end)
    }
}

impl fmt::Debug for ScanIndices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ScanIndices[{:?}..{:?} stride {:?}]",
            self.begin, self.end, self.stride
        )
    }
}
