//! Stencil bundles.
//!
//! A bundle is one update rule (or a group sharing a sub-domain
//! predicate) together with the framework state the engine keeps for
//! it: dependency edges, scratch children, grid-var references, write
//! halos, and bounding boxes. Bundles live in an arena owned by the
//! [`SolutionContext`](crate::solution::SolutionContext); references
//! between them are arena indices so the dependency graph needs no
//! back-pointers.
//!
//! Evaluation entry points are on the context, which owns the core and
//! the arena; this module is the bundle's own state and queries.

use indexmap::IndexSet;

use gridfold_core::{BoundingBox, BoundingBoxList, Idx, Indices};

use crate::program::{BundleProgram, StencilCore};
use crate::vars::VarId;

/// Arena index of a bundle within one solution.
pub type BundleId = usize;

/// One stencil update rule plus its framework state.
pub struct Bundle {
    program: BundleProgram,
    /// Bundles that must complete earlier in the same step.
    depends_on: IndexSet<BundleId>,
    /// Scratch bundles to run first, in eval order.
    scratch_children: Vec<BundleId>,
    /// Vars read by this bundle (possibly also written).
    input_vars: Vec<VarId>,
    /// Vars written by this bundle.
    output_vars: Vec<VarId>,
    /// Convex hull of the valid points; may contain invalid points.
    bundle_bb: BoundingBox,
    /// Disjoint decomposition of the actually-valid points.
    bb_list: BoundingBoxList,
    /// Max scratch write halos, low side, per domain dim.
    max_left_halo: Indices,
    /// Max scratch write halos, high side, per domain dim.
    max_right_halo: Indices,
}

impl Bundle {
    pub fn new(
        program: BundleProgram,
        input_vars: Vec<VarId>,
        output_vars: Vec<VarId>,
        num_domain_dims: usize,
    ) -> Self {
        Self {
            program,
            depends_on: IndexSet::new(),
            scratch_children: Vec::new(),
            input_vars,
            output_vars,
            bundle_bb: BoundingBox::empty(num_domain_dims),
            bb_list: BoundingBoxList::default(),
            max_left_halo: Indices::splat(0, num_domain_dims),
            max_right_halo: Indices::splat(0, num_domain_dims),
        }
    }

    pub fn program(&self) -> &BundleProgram {
        &self.program
    }

    pub fn name(&self) -> &'static str {
        self.program.name
    }

    pub fn is_scratch(&self) -> bool {
        self.program.is_scratch
    }

    pub fn scalar_fp_ops(&self) -> usize {
        self.program.scalar_fp_ops
    }

    pub fn scalar_points_read(&self) -> usize {
        self.program.scalar_points_read
    }

    pub fn scalar_points_written(&self) -> usize {
        self.program.scalar_points_written
    }

    /// Evaluate the sub-domain predicate at one point.
    pub fn is_in_valid_domain(&self, core: &dyn StencilCore, idxs: &Indices) -> bool {
        (self.program.is_in_valid_domain)(core, idxs)
    }

    /// Whether step `t` is enabled for this bundle.
    pub fn is_in_valid_step(&self, core: &dyn StencilCore, t: Idx) -> bool {
        (self.program.is_in_valid_step)(core, t)
    }

    /// Output step plane written for input step `t`, if the bundle
    /// touches a step dimension.
    pub fn output_step_index(&self, t: Idx) -> Option<Idx> {
        (self.program.output_step_index)(t)
    }

    /// Record that `other` must complete before this bundle.
    pub fn add_dep(&mut self, other: BundleId) {
        self.depends_on.insert(other);
    }

    pub fn depends_on(&self) -> impl Iterator<Item = BundleId> + '_ {
        self.depends_on.iter().copied()
    }

    /// Append a scratch bundle to run before this one.
    pub fn add_scratch_child(&mut self, child: BundleId) {
        self.scratch_children.push(child);
    }

    pub fn scratch_children(&self) -> &[BundleId] {
        &self.scratch_children
    }

    pub fn input_vars(&self) -> &[VarId] {
        &self.input_vars
    }

    pub fn output_vars(&self) -> &[VarId] {
        &self.output_vars
    }

    pub fn bundle_bb(&self) -> &BoundingBox {
        &self.bundle_bb
    }

    pub fn bb_list(&self) -> &BoundingBoxList {
        &self.bb_list
    }

    pub(crate) fn set_bounding_boxes(&mut self, hull: BoundingBox, list: BoundingBoxList) {
        self.bundle_bb = hull;
        self.bb_list = list;
    }

    /// Copy BB state from another bundle (same predicate, shared BBs).
    pub fn copy_bounding_boxes(&mut self, src: &Bundle) {
        self.bundle_bb = src.bundle_bb;
        self.bb_list = src.bb_list.clone();
    }

    pub fn max_write_halos(&self) -> (&Indices, &Indices) {
        (&self.max_left_halo, &self.max_right_halo)
    }

    pub(crate) fn set_write_halos(&mut self, left: Indices, right: Indices) {
        self.max_left_halo = left;
        self.max_right_halo = right;
    }
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("name", &self.name())
            .field("is_scratch", &self.is_scratch())
            .field("deps", &self.depends_on.len())
            .field("scratch_children", &self.scratch_children.len())
            .field("bb", &self.bundle_bb)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::tests_support::recording_program;

    #[test]
    fn test_dep_set_dedups_and_keeps_order() {
        let mut b = Bundle::new(recording_program("b", false), vec![], vec![], 2);
        b.add_dep(2);
        b.add_dep(1);
        b.add_dep(2);
        let deps: Vec<_> = b.depends_on().collect();
        assert_eq!(deps, vec![2, 1]);
    }

    #[test]
    fn test_scratch_children_keep_order() {
        let mut b = Bundle::new(recording_program("b", false), vec![], vec![], 1);
        b.add_scratch_child(5);
        b.add_scratch_child(3);
        assert_eq!(b.scratch_children(), &[5, 3]);
    }

    #[test]
    fn test_copy_bounding_boxes() {
        let mut a = Bundle::new(recording_program("a", false), vec![], vec![], 1);
        let hull = BoundingBox::new(Indices::from_slice(&[0]), Indices::from_slice(&[8]));
        let mut list = BoundingBoxList::default();
        list.push(hull);
        a.set_bounding_boxes(hull, list);

        let mut b = Bundle::new(recording_program("b", false), vec![], vec![], 1);
        b.copy_bounding_boxes(&a);
        assert_eq!(b.bundle_bb(), &hull);
        assert_eq!(b.bb_list().len(), 1);
    }
}
