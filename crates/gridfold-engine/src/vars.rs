//! Grid-var bookkeeping.
//!
//! The engine tracks metadata per grid var: halo extents, dirty flags,
//! and the last step whose data is valid. The numeric storage itself
//! lives inside the compiled solution's core and is never touched
//! here. Flags are atomics so concurrent micro-block workers can mark
//! their outputs without coordination; atomicity is per entry only.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use gridfold_core::{Idx, Indices};

/// Arena index of a grid var within one solution.
pub type VarId = usize;

/// Which view of a var a dirty mark applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyScope {
    /// This rank's own copy needs attention (e.g. halo re-exchange).
    Local,
    /// Remote ranks' copies of our halo are stale.
    Extern,
}

/// Metadata and per-step mutable state for one grid var.
#[derive(Debug)]
pub struct VarInfo {
    name: String,
    is_scratch: bool,
    /// Write-halo extent on the low side, per domain dim.
    left_halo: Indices,
    /// Write-halo extent on the high side, per domain dim.
    right_halo: Indices,
    dirty_local: AtomicBool,
    dirty_extern: AtomicBool,
    dev_dirty: AtomicBool,
    last_valid_step: AtomicI64,
}

impl VarInfo {
    pub fn new(name: impl Into<String>, left_halo: Indices, right_halo: Indices) -> Self {
        debug_assert_eq!(left_halo.ndims(), right_halo.ndims());
        Self {
            name: name.into(),
            is_scratch: false,
            left_halo,
            right_halo,
            dirty_local: AtomicBool::new(false),
            dirty_extern: AtomicBool::new(false),
            dev_dirty: AtomicBool::new(false),
            last_valid_step: AtomicI64::new(Idx::MIN),
        }
    }

    /// A thread-local scratch var; not tracked across steps.
    pub fn scratch(name: impl Into<String>, left_halo: Indices, right_halo: Indices) -> Self {
        let mut v = Self::new(name, left_halo, right_halo);
        v.is_scratch = true;
        v
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_scratch(&self) -> bool {
        self.is_scratch
    }

    pub fn left_halo(&self) -> &Indices {
        &self.left_halo
    }

    pub fn right_halo(&self) -> &Indices {
        &self.right_halo
    }

    /// Mark one scope dirty.
    pub fn set_dirty(&self, scope: DirtyScope) {
        match scope {
            DirtyScope::Local => self.dirty_local.store(true, Ordering::Release),
            DirtyScope::Extern => self.dirty_extern.store(true, Ordering::Release),
        }
    }

    pub fn is_dirty(&self, scope: DirtyScope) -> bool {
        match scope {
            DirtyScope::Local => self.dirty_local.load(Ordering::Acquire),
            DirtyScope::Extern => self.dirty_extern.load(Ordering::Acquire),
        }
    }

    /// Clear a dirty mark (called by the halo-exchange layer above).
    pub fn clear_dirty(&self, scope: DirtyScope) {
        match scope {
            DirtyScope::Local => self.dirty_local.store(false, Ordering::Release),
            DirtyScope::Extern => self.dirty_extern.store(false, Ordering::Release),
        }
    }

    /// Mark device-side data as modified.
    pub fn set_dev_dirty(&self) {
        self.dev_dirty.store(true, Ordering::Release);
    }

    pub fn is_dev_dirty(&self) -> bool {
        self.dev_dirty.load(Ordering::Acquire)
    }

    /// Advance the last-valid-step counter monotonically.
    pub fn update_valid_step(&self, step: Idx) {
        self.last_valid_step.fetch_max(step, Ordering::AcqRel);
    }

    /// Last step whose data is valid, if any step completed.
    pub fn last_valid_step(&self) -> Option<Idx> {
        let v = self.last_valid_step.load(Ordering::Acquire);
        (v != Idx::MIN).then_some(v)
    }
}
