//! Solution context and step driver.
//!
//! The context exclusively owns the compiled core, the grid-var table,
//! the bundle arena, and the stage list. It replaces the reference's
//! process-wide state with an explicit object threaded through calls.
//!
//! Per step, evaluation runs stage by stage. Within a stage the
//! non-scratch bundles are grouped into dependency levels (Kahn's
//! algorithm over the `depends_on` edges); each bundle fans its
//! micro-blocks out across the rayon pool, and its output vars are
//! marked dirty once the fan-out joins. Scratch children run inside
//! the micro-block driver, before their parent, on the same outer
//! thread.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use rayon::prelude::*;
use tracing::{debug, info, instrument, trace};

use gridfold_core::{
    BoundingBox, BoundingBoxList, ClusterShape, DimSpec, Error, EvalSettings, FoldShape, Idx,
    Indices, Result, ScanIndices, rem_flr, round_up_flr,
};

use crate::bundle::{Bundle, BundleId};
use crate::nano::{self, NanoCtx, visit_misc_points};
use crate::program::{BundleProgram, StencilCore};
use crate::stage::Stage;
use crate::vars::{DirtyScope, VarId, VarInfo};

/// The rank-local sub-domain this context evaluates.
#[derive(Debug, Clone)]
pub struct RankDomain {
    /// Global offset of this rank's region, per domain dim.
    pub offsets: Indices,
    /// Extent of this rank's region, per domain dim.
    pub sizes: Indices,
}

impl RankDomain {
    pub fn new(offsets: Indices, sizes: Indices) -> Self {
        debug_assert_eq!(offsets.ndims(), sizes.ndims());
        Self { offsets, sizes }
    }

    /// A rank at the global origin.
    pub fn origin(sizes: &[Idx]) -> Self {
        Self {
            offsets: Indices::splat(0, sizes.len()),
            sizes: Indices::from_slice(sizes),
        }
    }

    /// The rank's region as a bounding box in global coordinates.
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::new(self.offsets, self.offsets.add(&self.sizes))
    }
}

/// Owner of one compiled solution's runtime state.
pub struct SolutionContext {
    name: String,
    dims: Arc<DimSpec>,
    fold: FoldShape,
    cluster: ClusterShape,
    rank: RankDomain,
    core: Box<dyn StencilCore>,
    vars: Vec<VarInfo>,
    bundles: Vec<Bundle>,
    stages: Vec<Stage>,
    settings: EvalSettings,
}

impl std::fmt::Debug for SolutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolutionContext")
            .field("name", &self.name)
            .field("dims", &self.dims)
            .field("fold", &self.fold)
            .field("cluster", &self.cluster)
            .field("rank", &self.rank)
            .field("vars", &self.vars)
            .field("stages", &self.stages)
            .field("settings", &self.settings)
            .field("bundle_count", &self.bundles.len())
            .finish()
    }
}

impl SolutionContext {
    /// Create a context for one rank sub-domain.
    ///
    /// `declared_width` is the SIMD width the solution was compiled
    /// for; the fold's lane product must match it.
    pub fn new(
        name: impl Into<String>,
        dims: DimSpec,
        fold: FoldShape,
        cluster: ClusterShape,
        rank: RankDomain,
        core: Box<dyn StencilCore>,
        declared_width: Idx,
    ) -> Result<Self> {
        let name = name.into();
        if fold.points() != declared_width || fold.points() > 64 {
            return Err(Error::FoldMismatch {
                solution: name,
                declared: declared_width,
                actual: fold.points(),
            });
        }
        debug_assert_eq!(rank.offsets.ndims(), dims.num_domain_dims());
        info!(solution = %name, ?rank, "context created");
        Ok(Self {
            name,
            settings: EvalSettings::for_dims(dims.num_stencil_dims()),
            dims: Arc::new(dims),
            fold,
            cluster,
            rank,
            core,
            vars: Vec::new(),
            bundles: Vec::new(),
            stages: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> &Arc<DimSpec> {
        &self.dims
    }

    pub fn fold(&self) -> &FoldShape {
        &self.fold
    }

    pub fn cluster(&self) -> &ClusterShape {
        &self.cluster
    }

    pub fn rank(&self) -> &RankDomain {
        &self.rank
    }

    pub fn core(&self) -> &dyn StencilCore {
        &*self.core
    }

    pub fn settings(&self) -> &EvalSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: EvalSettings) {
        self.settings = settings;
    }

    /// Outer-thread count; scratch vectors carry one slot per thread.
    pub fn num_outer_threads() -> usize {
        rayon::current_num_threads()
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    pub fn add_var(&mut self, var: VarInfo) -> VarId {
        self.vars.push(var);
        self.vars.len() - 1
    }

    pub fn var(&self, id: VarId) -> &VarInfo {
        &self.vars[id]
    }

    pub fn vars(&self) -> &[VarInfo] {
        &self.vars
    }

    pub fn add_bundle(
        &mut self,
        program: BundleProgram,
        input_vars: Vec<VarId>,
        output_vars: Vec<VarId>,
    ) -> BundleId {
        let ndd = self.dims.num_domain_dims();
        self.bundles.push(Bundle::new(program, input_vars, output_vars, ndd));
        self.bundles.len() - 1
    }

    pub fn bundle(&self, id: BundleId) -> &Bundle {
        &self.bundles[id]
    }

    pub fn bundle_mut(&mut self, id: BundleId) -> &mut Bundle {
        &mut self.bundles[id]
    }

    pub fn bundles(&self) -> &[Bundle] {
        &self.bundles
    }

    /// Record that `b` must run after `on`.
    pub fn add_dep(&mut self, b: BundleId, on: BundleId) {
        self.bundles[b].add_dep(on);
    }

    /// Attach a scratch child to run before `parent`.
    pub fn add_scratch_child(&mut self, parent: BundleId, child: BundleId) {
        debug_assert!(self.bundles[child].is_scratch());
        self.bundles[parent].add_scratch_child(child);
    }

    /// Scratch children of `b` in eval order, then `b` itself.
    pub fn reqd_bundles(&self, b: BundleId) -> Vec<BundleId> {
        let mut ids = self.bundles[b].scratch_children().to_vec();
        ids.push(b);
        ids
    }

    /// Add a stage over `bundle_ids` in declaration order.
    ///
    /// All non-scratch bundles must agree on the step condition;
    /// mixed conditions are a construction error, and so is a stage
    /// with no non-scratch bundle or a dependency cycle.
    pub fn add_stage(
        &mut self,
        name: impl Into<String>,
        bundle_ids: Vec<BundleId>,
    ) -> Result<usize> {
        let name = name.into();
        let first = bundle_ids
            .iter()
            .map(|&b| &self.bundles[b])
            .find(|b| !b.is_scratch())
            .ok_or_else(|| Error::MissingNonScratch {
                stage: name.clone(),
            })?;

        let first_cond = first.program().step_cond_descr;
        let first_name = first.name();
        for b in bundle_ids.iter().map(|&b| &self.bundles[b]) {
            if !b.is_scratch() && b.program().step_cond_descr != first_cond {
                return Err(Error::MixedStepConditions {
                    stage: name,
                    first: first_name.to_string(),
                    second: b.name().to_string(),
                });
            }
        }

        let levels = self.dependency_levels(&name, &bundle_ids)?;
        debug!(stage = %name, bundles = bundle_ids.len(), levels = levels.len(), "stage added");
        let ndd = self.dims.num_domain_dims();
        self.stages.push(Stage::new(name, bundle_ids, levels, ndd));
        Ok(self.stages.len() - 1)
    }

    pub fn stage(&self, i: usize) -> &Stage {
        &self.stages[i]
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Group a stage's non-scratch bundles into dependency levels
    /// using Kahn's algorithm; bundles within a level are independent.
    fn dependency_levels(
        &self,
        stage_name: &str,
        bundle_ids: &[BundleId],
    ) -> Result<Vec<Vec<BundleId>>> {
        let members: IndexSet<BundleId> = bundle_ids
            .iter()
            .copied()
            .filter(|&b| !self.bundles[b].is_scratch())
            .collect();

        let mut in_degree: IndexMap<BundleId, usize> =
            members.iter().map(|&b| (b, 0)).collect();
        let mut dependents: IndexMap<BundleId, Vec<BundleId>> = IndexMap::new();
        for &b in &members {
            for dep in self.bundles[b].depends_on() {
                if members.contains(&dep) {
                    *in_degree.get_mut(&b).unwrap() += 1;
                    dependents.entry(dep).or_default().push(b);
                }
            }
        }

        let mut levels = Vec::new();
        let mut current: Vec<BundleId> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&b, _)| b)
            .collect();
        let mut processed = 0;

        while !current.is_empty() {
            current.sort_unstable();
            processed += current.len();

            let mut next = Vec::new();
            for &b in &current {
                if let Some(deps) = dependents.get(&b) {
                    for &d in deps {
                        let deg = in_degree.get_mut(&d).unwrap();
                        *deg -= 1;
                        if *deg == 0 {
                            next.push(d);
                        }
                    }
                }
            }
            levels.push(std::mem::replace(&mut current, next));
        }

        if processed != members.len() {
            let cycle: Vec<String> = members
                .iter()
                .copied()
                .filter(|b| in_degree[b] > 0)
                .map(|b| self.bundles[b].name().to_string())
                .collect();
            return Err(Error::DependencyCycle {
                stage: stage_name.to_string(),
                bundles: cycle,
            });
        }
        Ok(levels)
    }

    // ------------------------------------------------------------------
    // Bounding boxes and halos
    // ------------------------------------------------------------------

    /// Discover the hull and the disjoint valid-box list for `b`.
    ///
    /// Bundles without a sub-domain condition cover the whole rank
    /// region. Otherwise the predicate is evaluated pointwise; valid
    /// runs along the last domain dim are merged into rectangles.
    /// The scan is deterministic, so repeated calls yield equal state.
    pub fn find_bounding_boxes(&mut self, b: BundleId) -> Result<()> {
        let ndd = self.dims.num_domain_dims();
        let rank_bb = self.rank.bbox();

        let (hull, list) = if !self.bundles[b].program().is_sub_domain_expr() {
            let mut list = BoundingBoxList::default();
            list.push(rank_bb);
            (rank_bb, list)
        } else {
            self.scan_valid_boxes(b, &rank_bb, ndd)
        };

        if !list.is_consistent_with(&hull) {
            return Err(Error::InconsistentBoundingBox {
                bundle: self.bundles[b].name().to_string(),
            });
        }
        debug!(
            bundle = self.bundles[b].name(),
            hull = ?hull,
            boxes = list.len(),
            "bounding boxes"
        );
        self.bundles[b].set_bounding_boxes(hull, list);
        Ok(())
    }

    fn scan_valid_boxes(
        &self,
        b: BundleId,
        rank_bb: &BoundingBox,
        ndd: usize,
    ) -> (BoundingBox, BoundingBoxList) {
        let bundle = &self.bundles[b];
        let core = &*self.core;
        let last = ndd - 1;

        let mut hull = BoundingBox::empty(ndd);
        let mut runs: Vec<BoundingBox> = Vec::new();

        // Walk rows (all dims but the last), collecting maximal valid
        // runs along the last dim.
        let mut probe = ScanIndices::new(
            {
                let mut v = Indices::splat(0, 1 + ndd);
                for j in 0..ndd {
                    v[1 + j] = rank_bb.begin[j];
                }
                v
            },
            {
                let mut v = Indices::splat(1, 1 + ndd);
                for j in 0..ndd {
                    v[1 + j] = rank_bb.end[j];
                }
                // Rows only: the last dim is scanned inside the body.
                v[1 + last] = rank_bb.begin[last] + 1;
                v
            },
        );
        probe.stride.set_from_const(1);

        visit_misc_points(&probe, &mut |row| {
            let mut run_start: Option<Idx> = None;
            let mut pt = *row;
            for x in rank_bb.begin[last]..=rank_bb.end[last] {
                let valid = if x < rank_bb.end[last] {
                    pt[1 + last] = x;
                    bundle.is_in_valid_domain(core, &pt)
                } else {
                    false
                };
                match (valid, run_start) {
                    (true, None) => run_start = Some(x),
                    (false, Some(s)) => {
                        let mut bb_begin = Indices::splat(0, ndd);
                        let mut bb_end = Indices::splat(0, ndd);
                        for j in 0..ndd {
                            bb_begin[j] = row[1 + j];
                            bb_end[j] = row[1 + j] + 1;
                        }
                        bb_begin[last] = s;
                        bb_end[last] = x;
                        let bb = BoundingBox::new(bb_begin, bb_end);
                        hull = hull.union_hull(&bb);
                        runs.push(bb);
                        run_start = None;
                    }
                    _ => {}
                }
            }
        });

        let merged = merge_boxes(runs, ndd);
        let mut list = BoundingBoxList::default();
        for bb in merged {
            list.push(bb);
        }
        (hull, list)
    }

    /// Record the max write halos for `b` from its output vars.
    pub fn find_write_halos(&mut self, b: BundleId) {
        let ndd = self.dims.num_domain_dims();
        let mut left = Indices::splat(0, ndd);
        let mut right = Indices::splat(0, ndd);
        for &v in self.bundles[b].output_vars() {
            left = left.max(self.vars[v].left_halo());
            right = right.max(self.vars[v].right_halo());
        }
        self.bundles[b].set_write_halos(left, right);
    }

    /// Discover BBs and write halos for every bundle and refresh the
    /// stage work stats. Call once after construction.
    pub fn prepare(&mut self) -> Result<()> {
        for b in 0..self.bundles.len() {
            self.find_bounding_boxes(b)?;
            self.find_write_halos(b);
        }
        for s in 0..self.stages.len() {
            let (stages, bundles) = (&mut self.stages, &self.bundles);
            stages[s].init_work_stats(bundles);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Widen `idxs` by the scratch bundle's write halos and re-anchor
    /// its thread-local storage for `outer_t`.
    ///
    /// The incoming span must be fold-aligned (rank-relative) in every
    /// domain dim; halos are widened in whole vectors so the result
    /// stays aligned.
    pub fn adjust_scratch_span(
        &self,
        child: BundleId,
        outer_t: usize,
        idxs: &ScanIndices,
    ) -> Result<ScanIndices> {
        let bundle = &self.bundles[child];
        debug_assert!(bundle.is_scratch());
        let (left, right) = bundle.max_write_halos();

        let mut widened = *idxs;
        for j in 0..self.dims.num_domain_dims() {
            let i = j + 1;
            let vpts = self.fold.pts(j);
            let rofs = self.rank.offsets[j];
            if rem_flr(idxs.begin[i] - rofs, vpts) != 0
                || rem_flr(idxs.end[i] - rofs, vpts) != 0
            {
                return Err(Error::ScratchSpanMisaligned {
                    bundle: bundle.name().to_string(),
                    dim: j,
                    range: idxs.range_str(),
                });
            }
            widened.begin[i] -= round_up_flr(left[j], vpts);
            widened.end[i] += round_up_flr(right[j], vpts);
        }
        widened.start = widened.begin;
        widened.stop = widened.end;

        if let Some(rebase) = bundle.program().rebase_scratch {
            // The hook gets the span rank-relative, matching how the
            // scratch storage is indexed.
            let mut rr = widened;
            for j in 0..self.dims.num_domain_dims() {
                let i = j + 1;
                rr.begin[i] -= self.rank.offsets[j];
                rr.end[i] -= self.rank.offsets[j];
            }
            rr.start = rr.begin;
            rr.stop = rr.end;
            rebase(&*self.core, outer_t, &rr);
        }
        Ok(widened)
    }

    /// Reference scalar path: evaluate every in-domain point of
    /// `misc_idxs` with the scalar kernel. Used for verification and
    /// boundary debug.
    pub fn calc_in_domain(&self, b: BundleId, scratch_slot: usize, misc_idxs: &ScanIndices) {
        let bundle = &self.bundles[b];
        let core = &*self.core;
        let mut idxs = *misc_idxs;
        idxs.stride.set_from_const(1);
        idxs.align.set_from_const(1);
        visit_misc_points(&idxs, &mut |pt| {
            if bundle.is_in_valid_domain(core, pt) {
                (bundle.program().calc_scalar)(core, scratch_slot, pt);
            }
        });
    }

    /// Production path for one nano-block.
    pub fn calc_nano_block(
        &self,
        b: BundleId,
        outer_t: usize,
        inner_t: usize,
        settings: &EvalSettings,
        idxs: &ScanIndices,
    ) -> Result<()> {
        let ctx = NanoCtx {
            program: self.bundles[b].program(),
            core: &*self.core,
            fold: &self.fold,
            cluster: &self.cluster,
            rank_ofs: &self.rank.offsets,
        };
        nano::calc_nano_block(&ctx, outer_t, inner_t, settings, idxs)
    }

    /// Micro-block driver: scratch children first over halo-widened
    /// spans, then the bundle itself trimmed to its valid boxes.
    #[instrument(skip_all, fields(bundle = self.bundles[b].name(), outer_t))]
    pub fn calc_micro_block(
        &self,
        b: BundleId,
        outer_t: usize,
        settings: &EvalSettings,
        micro_block_idxs: &ScanIndices,
    ) -> Result<()> {
        for &child in self.bundles[b].scratch_children() {
            let widened = self.adjust_scratch_span(child, outer_t, micro_block_idxs)?;
            trace!(
                child = self.bundles[child].name(),
                span = %widened.range_str(),
                "scratch child"
            );
            self.calc_nano_block(child, outer_t, 0, settings, &widened)?;
        }

        for bb in self.bundles[b].bb_list().iter() {
            if let Some(sub) = trim_to_box(micro_block_idxs, bb) {
                self.calc_nano_block(b, outer_t, 0, settings, &sub)?;
            }
        }
        Ok(())
    }

    /// Mark `b`'s output vars dirty and advance their valid steps.
    pub fn update_var_info(
        &self,
        b: BundleId,
        whose: DirtyScope,
        step: Idx,
        mark_extern_dirty: bool,
        mod_dev_data: bool,
        update_valid_step: bool,
    ) {
        let bundle = &self.bundles[b];
        let out_step = bundle.output_step_index(step).unwrap_or(step);
        for &v in bundle.output_vars() {
            let var = &self.vars[v];
            if var.is_scratch() {
                continue;
            }
            var.set_dirty(whose);
            if mark_extern_dirty {
                var.set_dirty(DirtyScope::Extern);
            }
            if mod_dev_data {
                var.set_dev_dirty();
            }
            if update_valid_step {
                var.update_valid_step(out_step);
            }
        }
    }

    /// Evaluate one time step across all stages.
    #[instrument(skip(self), fields(solution = %self.name))]
    pub fn run_step(&mut self, t: Idx) -> Result<()> {
        for si in 0..self.stages.len() {
            let enabled = self.stages[si].is_in_valid_step(&*self.core, &self.bundles, t);
            if !enabled {
                trace!(stage = self.stages[si].name(), t, "step gated");
                continue;
            }

            self.stages[si].timer.start();
            let levels = self.stages[si].levels().to_vec();
            let settings = self.settings.clone();
            let result: Result<()> = levels.iter().try_for_each(|level| {
                level
                    .iter()
                    .try_for_each(|&b| self.run_bundle_step(b, t, &settings))
            });
            self.stages[si].timer.stop();
            result?;
            self.stages[si].add_steps(1);
        }
        Ok(())
    }

    /// Fan one bundle's micro-blocks out across the outer thread pool,
    /// then publish its var updates.
    fn run_bundle_step(&self, b: BundleId, t: Idx, settings: &EvalSettings) -> Result<()> {
        let blocks = self.make_micro_blocks(t);
        trace!(bundle = self.bundles[b].name(), blocks = blocks.len(), t, "bundle step");
        blocks.par_iter().try_for_each(|mb| {
            let outer_t = rayon::current_thread_index().unwrap_or(0);
            self.calc_micro_block(b, outer_t, settings, mb)
        })?;
        self.update_var_info(b, DirtyScope::Local, t, true, false, true);
        Ok(())
    }

    /// Minimal upstream tiling: slabs along the first domain dim, one
    /// per outer thread, cut at cluster boundaries so scratch spans
    /// stay aligned.
    fn make_micro_blocks(&self, t: Idx) -> Vec<ScanIndices> {
        let ndd = self.dims.num_domain_dims();
        let nthreads = Self::num_outer_threads() as Idx;
        let cpts0 = self.cluster.pts(&self.fold, 0);
        let size0 = self.rank.sizes[0];
        let chunk = round_up_flr((size0 + nthreads - 1) / nthreads, cpts0).max(cpts0);

        let mut blocks = Vec::new();
        let mut begin0 = self.rank.offsets[0];
        let end0 = self.rank.offsets[0] + size0;
        while begin0 < end0 {
            let stop0 = (begin0 + chunk).min(end0);

            let mut b = Indices::splat(0, 1 + ndd);
            let mut e = Indices::splat(0, 1 + ndd);
            b[0] = t;
            e[0] = t + 1;
            for j in 0..ndd {
                b[1 + j] = self.rank.offsets[j];
                e[1 + j] = self.rank.offsets[j] + self.rank.sizes[j];
            }
            b[1] = begin0;
            e[1] = stop0;
            blocks.push(ScanIndices::new(b, e));

            begin0 = stop0;
        }
        blocks
    }
}

/// Clamp a scan's domain dims to a box; `None` when nothing remains.
fn trim_to_box(idxs: &ScanIndices, bb: &BoundingBox) -> Option<ScanIndices> {
    let mut out = *idxs;
    let ndd = bb.begin.ndims();
    for j in 0..ndd {
        let i = j + 1;
        out.begin[i] = out.begin[i].max(bb.begin[j]);
        out.end[i] = out.end[i].min(bb.end[j]);
        if out.end[i] <= out.begin[i] {
            return None;
        }
    }
    out.start = out.begin;
    out.stop = out.end;
    Some(out)
}

/// Merge thickness-1 run boxes into larger rectangles, dim by dim.
///
/// Merging two boxes requires equality in every other dim and
/// adjacency in the merge dim, so disjointness and coverage are
/// preserved. Deterministic for a deterministic input order.
fn merge_boxes(mut boxes: Vec<BoundingBox>, ndd: usize) -> Vec<BoundingBox> {
    for d in (0..ndd).rev() {
        boxes.sort_unstable_by(|a, b| {
            for j in 0..ndd {
                if j == d {
                    continue;
                }
                let ord = a.begin[j]
                    .cmp(&b.begin[j])
                    .then(a.end[j].cmp(&b.end[j]));
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            a.begin[d].cmp(&b.begin[d])
        });

        let mut out: Vec<BoundingBox> = Vec::new();
        for bb in boxes {
            if let Some(last) = out.last_mut() {
                let same_others = (0..ndd).all(|j| {
                    j == d || (last.begin[j] == bb.begin[j] && last.end[j] == bb.end[j])
                });
                if same_others && last.end[d] == bb.begin[d] {
                    last.end[d] = bb.end[d];
                    continue;
                }
            }
            out.push(bb);
        }
        boxes = out;
    }
    boxes
}
