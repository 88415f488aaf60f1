//! Grid storage for compiled solutions.
//!
//! The engine prescribes only the access contract: indices are
//! rank-relative, halo indices may be negative, and concurrent
//! kernel invocations target disjoint element ranges. Allocation
//! strategy is up to the emitted code; these two containers are the
//! portable layout the solutions in this crate use.

use std::cell::UnsafeCell;

use gridfold_core::{Idx, MAX_DIMS, ScanIndices, rem_flr};

/// A step-planed grid over up to [`MAX_DIMS`] - 1 domain dims.
///
/// Storage is `nplanes` copies of the padded domain; the step index
/// wraps onto a plane with floor modulo. Domain indices are
/// rank-relative and may reach `halo` elements outside the region on
/// each side.
///
/// Writes go through `&self`: the decomposition upstream hands
/// concurrent callers disjoint output ranges, and breaking that
/// partition is undefined behavior by the evaluation contract.
pub struct PlaneGrid {
    sizes: [Idx; MAX_DIMS],
    strides: [Idx; MAX_DIMS],
    ndd: usize,
    halo: Idx,
    nplanes: Idx,
    plane_len: usize,
    data: UnsafeCell<Box<[f64]>>,
}

// Concurrent writers are contractually disjoint; readers of a plane
// never race writers of another plane within one bundle invocation.
unsafe impl Sync for PlaneGrid {}

impl PlaneGrid {
    pub fn new(sizes: &[Idx], halo: Idx, nplanes: Idx) -> Self {
        assert!(!sizes.is_empty() && sizes.len() < MAX_DIMS);
        assert!(halo >= 0 && nplanes >= 1);

        let ndd = sizes.len();
        let mut padded = [0 as Idx; MAX_DIMS];
        for (j, &s) in sizes.iter().enumerate() {
            padded[j] = s + 2 * halo;
        }

        // Row-major strides, last dim unit.
        let mut strides = [1 as Idx; MAX_DIMS];
        for j in (0..ndd - 1).rev() {
            strides[j] = strides[j + 1] * padded[j + 1];
        }
        let plane_len = (strides[0] * padded[0]) as usize;

        let mut stored = [0 as Idx; MAX_DIMS];
        stored[..ndd].copy_from_slice(sizes);
        Self {
            sizes: stored,
            strides,
            ndd,
            halo,
            nplanes,
            plane_len,
            data: UnsafeCell::new(vec![0.0; plane_len * nplanes as usize].into_boxed_slice()),
        }
    }

    pub fn halo(&self) -> Idx {
        self.halo
    }

    #[inline]
    fn offset(&self, t: Idx, pt: &[Idx]) -> usize {
        debug_assert_eq!(pt.len(), self.ndd);
        let plane = rem_flr(t, self.nplanes) as usize;
        let mut ofs = 0;
        for j in 0..self.ndd {
            debug_assert!(
                pt[j] >= -self.halo && pt[j] < self.sizes[j] + self.halo,
                "index {} out of bounds in dim {j}",
                pt[j]
            );
            ofs += (pt[j] + self.halo) * self.strides[j];
        }
        plane * self.plane_len + ofs as usize
    }

    /// Read one element at rank-relative `pt` on step plane `t`.
    #[inline]
    pub fn read(&self, t: Idx, pt: &[Idx]) -> f64 {
        let ofs = self.offset(t, pt);
        unsafe { (*self.data.get())[ofs] }
    }

    /// Write one element at rank-relative `pt` on step plane `t`.
    #[inline]
    pub fn write(&self, t: Idx, pt: &[Idx], val: f64) {
        let ofs = self.offset(t, pt);
        unsafe {
            (*self.data.get())[ofs] = val;
        }
    }

    /// Fill the interior of plane `t` from a function of the point.
    pub fn fill(&self, t: Idx, f: impl Fn(&[Idx]) -> f64) {
        let mut pt = [0 as Idx; MAX_DIMS];
        self.fill_rec(t, 0, &mut pt, &f);
    }

    fn fill_rec(&self, t: Idx, j: usize, pt: &mut [Idx; MAX_DIMS], f: &impl Fn(&[Idx]) -> f64) {
        if j == self.ndd {
            self.write(t, &pt[..self.ndd], f(&pt[..self.ndd]));
            return;
        }
        for x in 0..self.sizes[j] {
            pt[j] = x;
            self.fill_rec(t, j + 1, pt, f);
        }
    }
}

/// Per-outer-thread scratch storage for one scratch var.
///
/// Each outer thread owns one slot; the engine re-anchors the slot to
/// the halo-widened span of the current micro-block before the scratch
/// bundle runs (`rebase`). Slots never alias across outer threads.
pub struct ScratchPad {
    slots: Vec<ScratchSlot>,
    ndd: usize,
}

struct ScratchSlot {
    /// Rank-relative begin of the current span, set by `rebase`.
    span_begin: UnsafeCell<[Idx; MAX_DIMS]>,
    strides: [Idx; MAX_DIMS],
    data: UnsafeCell<Box<[f64]>>,
}

// One slot is only touched by its owning outer thread within a step.
unsafe impl Sync for ScratchPad {}

impl ScratchPad {
    /// Allocate `nslots` slots able to hold `capacity` per domain dim.
    pub fn new(nslots: usize, capacity: &[Idx]) -> Self {
        let ndd = capacity.len();
        assert!(ndd > 0 && ndd < MAX_DIMS);

        let mut strides = [1 as Idx; MAX_DIMS];
        for j in (0..ndd - 1).rev() {
            strides[j] = strides[j + 1] * capacity[j + 1];
        }
        let len = (strides[0] * capacity[0]) as usize;

        let slots = (0..nslots)
            .map(|_| ScratchSlot {
                span_begin: UnsafeCell::new([0; MAX_DIMS]),
                strides,
                data: UnsafeCell::new(vec![0.0; len].into_boxed_slice()),
            })
            .collect();
        Self { slots, ndd }
    }

    /// Re-anchor slot `outer_t` to a rank-relative span.
    pub fn rebase(&self, outer_t: usize, span: &ScanIndices) {
        let slot = &self.slots[outer_t];
        let begin = unsafe { &mut *slot.span_begin.get() };
        for j in 0..self.ndd {
            begin[j] = span.begin[1 + j];
        }
    }

    #[inline]
    fn offset(&self, outer_t: usize, pt: &[Idx]) -> (usize, usize) {
        debug_assert_eq!(pt.len(), self.ndd);
        let slot = &self.slots[outer_t];
        let begin = unsafe { &*slot.span_begin.get() };
        let mut ofs = 0;
        for j in 0..self.ndd {
            ofs += (pt[j] - begin[j]) * slot.strides[j];
        }
        (outer_t, ofs as usize)
    }

    /// Read from slot `outer_t` at rank-relative `pt`.
    #[inline]
    pub fn read(&self, outer_t: usize, pt: &[Idx]) -> f64 {
        let (slot, ofs) = self.offset(outer_t, pt);
        unsafe { (*self.slots[slot].data.get())[ofs] }
    }

    /// Write to slot `outer_t` at rank-relative `pt`.
    #[inline]
    pub fn write(&self, outer_t: usize, pt: &[Idx], val: f64) {
        let (slot, ofs) = self.offset(outer_t, pt);
        unsafe {
            (*self.slots[slot].data.get())[ofs] = val;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridfold_core::Indices;

    #[test]
    fn test_plane_grid_wraps_steps() {
        let g = PlaneGrid::new(&[8], 1, 2);
        g.write(0, &[3], 1.5);
        g.write(1, &[3], 2.5);
        assert_eq!(g.read(0, &[3]), 1.5);
        assert_eq!(g.read(2, &[3]), 1.5, "plane 2 aliases plane 0");
        assert_eq!(g.read(-1, &[3]), 2.5, "negative steps wrap with floor modulo");
    }

    #[test]
    fn test_plane_grid_halo_reads() {
        let g = PlaneGrid::new(&[4, 4], 2, 1);
        assert_eq!(g.read(0, &[-2, 0]), 0.0);
        g.write(0, &[-1, 3], 7.0);
        assert_eq!(g.read(0, &[-1, 3]), 7.0);
    }

    #[test]
    fn test_plane_grid_fill() {
        let g = PlaneGrid::new(&[2, 3], 0, 1);
        g.fill(0, |pt| (pt[0] * 10 + pt[1]) as f64);
        assert_eq!(g.read(0, &[1, 2]), 12.0);
    }

    #[test]
    fn test_scratch_pad_rebase() {
        let pad = ScratchPad::new(2, &[16]);
        let span = ScanIndices::new(
            Indices::from_slice(&[0, -4]),
            Indices::from_slice(&[1, 12]),
        );
        pad.rebase(0, &span);
        pad.write(0, &[-4], 3.0);
        pad.write(0, &[11], 4.0);
        assert_eq!(pad.read(0, &[-4]), 3.0);
        assert_eq!(pad.read(0, &[11]), 4.0);

        // Slot 1 is untouched by slot 0 writes.
        pad.rebase(1, &span);
        assert_eq!(pad.read(1, &[-4]), 0.0);
    }
}
