//! The three-point average computed through a scratch bundle.
//!
//! `scale` (scratch): `s[x] = u[t][x] * 2`, thread-local.
//! `avg` (parent):    `u[t+1][x] = (s[x-1] + s[x] + s[x+1]) / 6`
//!
//! Algebraically identical to [`crate::avg1d`], which makes the
//! scratch plumbing directly checkable: the widened span, the
//! per-outer-thread slot rebase, and child-before-parent ordering all
//! have to line up for the outputs to agree.

use std::any::Any;

use linkme::distributed_slice;

use gridfold_core::{
    ClusterShape, DimSpec, FoldShape, Idx, Indices, LaneMask, Result, ScanIndices,
};
use gridfold_engine::{
    BundleProgram, RankDomain, SOLUTIONS, SolutionContext, SolutionSpec, StencilCore, VarInfo,
};

use crate::grid::{PlaneGrid, ScratchPad};

const VLEN: Idx = 4;

pub struct AvgScratchCore {
    u: PlaneGrid,
    s: ScratchPad,
    rank_ofs: Idx,
}

impl AvgScratchCore {
    pub fn value(&self, t: Idx, x: Idx) -> f64 {
        self.u.read(t, &[x])
    }

    pub fn init(&self, t: Idx, f: impl Fn(Idx) -> f64) {
        self.u.fill(t, |pt| f(pt[0]));
    }
}

impl StencilCore for AvgScratchCore {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn core(c: &dyn StencilCore) -> &AvgScratchCore {
    c.as_any().downcast_ref().expect("avg1d_scratch core")
}

// --- scratch bundle: s[x] = 2 * u[t][x] ---

#[inline]
fn scale_point(cr: &AvgScratchCore, slot: usize, t: Idx, x: Idx) {
    cr.s.write(slot, &[x], cr.u.read(t, &[x]) * 2.0);
}

fn scale_scalar(c: &dyn StencilCore, slot: usize, pt: &Indices) {
    let cr = core(c);
    scale_point(cr, slot, pt[0], pt[1] - cr.rank_ofs);
}

fn scale_vectors(
    c: &dyn StencilCore,
    outer_t: usize,
    _inner_t: usize,
    _thread_limit: usize,
    idxs: &ScanIndices,
    mask: LaneMask,
) {
    let cr = core(c);
    let t = idxs.begin[0];
    for v in idxs.begin[1]..idxs.end[1] {
        for lane in 0..VLEN {
            if mask.is_full() || mask.lane(lane as usize) {
                scale_point(cr, outer_t, t, v * VLEN + lane);
            }
        }
    }
}

fn scale_clusters(
    c: &dyn StencilCore,
    outer_t: usize,
    _inner_t: usize,
    _thread_limit: usize,
    idxs: &ScanIndices,
) {
    let cr = core(c);
    let t = idxs.begin[0];
    for v in idxs.begin[1]..idxs.end[1] {
        for lane in 0..VLEN {
            scale_point(cr, outer_t, t, v * VLEN + lane);
        }
    }
}

fn scale_rebase(c: &dyn StencilCore, outer_t: usize, span: &ScanIndices) {
    core(c).s.rebase(outer_t, span);
}

fn scale_program() -> BundleProgram {
    BundleProgram {
        name: "scale",
        scalar_fp_ops: 1,
        scalar_points_read: 1,
        scalar_points_written: 1,
        is_scratch: true,
        sub_domain_descr: None,
        step_cond_descr: None,
        is_in_valid_domain: |_, _| true,
        is_in_valid_step: |_, _| true,
        output_step_index: |_| None,
        calc_scalar: scale_scalar,
        calc_vectors: scale_vectors,
        calc_clusters: scale_clusters,
        rebase_scratch: Some(scale_rebase),
    }
}

// --- parent bundle: u[t+1][x] = (s[x-1] + s[x] + s[x+1]) / 6 ---

#[inline]
fn avg_point(cr: &AvgScratchCore, slot: usize, t: Idx, x: Idx) {
    let s = &cr.s;
    let val = (s.read(slot, &[x - 1]) + s.read(slot, &[x]) + s.read(slot, &[x + 1])) / 6.0;
    cr.u.write(t + 1, &[x], val);
}

fn avg_scalar(c: &dyn StencilCore, slot: usize, pt: &Indices) {
    let cr = core(c);
    avg_point(cr, slot, pt[0], pt[1] - cr.rank_ofs);
}

fn avg_vectors(
    c: &dyn StencilCore,
    outer_t: usize,
    _inner_t: usize,
    _thread_limit: usize,
    idxs: &ScanIndices,
    mask: LaneMask,
) {
    let cr = core(c);
    let t = idxs.begin[0];
    for v in idxs.begin[1]..idxs.end[1] {
        for lane in 0..VLEN {
            if mask.is_full() || mask.lane(lane as usize) {
                avg_point(cr, outer_t, t, v * VLEN + lane);
            }
        }
    }
}

fn avg_clusters(
    c: &dyn StencilCore,
    outer_t: usize,
    _inner_t: usize,
    _thread_limit: usize,
    idxs: &ScanIndices,
) {
    let cr = core(c);
    let t = idxs.begin[0];
    for v in idxs.begin[1]..idxs.end[1] {
        for lane in 0..VLEN {
            avg_point(cr, outer_t, t, v * VLEN + lane);
        }
    }
}

fn avg_program() -> BundleProgram {
    BundleProgram {
        name: "avg",
        scalar_fp_ops: 3,
        scalar_points_read: 3,
        scalar_points_written: 1,
        is_scratch: false,
        sub_domain_descr: None,
        step_cond_descr: None,
        is_in_valid_domain: |_, _| true,
        is_in_valid_step: |_, _| true,
        output_step_index: |t| Some(t + 1),
        calc_scalar: avg_scalar,
        calc_vectors: avg_vectors,
        calc_clusters: avg_clusters,
        rebase_scratch: None,
    }
}

pub fn build(rank: &RankDomain) -> Result<SolutionContext> {
    let size = rank.sizes[0];
    let nslots = SolutionContext::num_outer_threads();
    let core = AvgScratchCore {
        // The scratch span reaches one whole vector past the region,
        // so the input halo must cover that.
        u: PlaneGrid::new(&[size], VLEN, 2),
        s: ScratchPad::new(nslots, &[size + 2 * VLEN]),
        rank_ofs: rank.offsets[0],
    };
    let mut ctx = SolutionContext::new(
        "avg1d_scratch",
        DimSpec::new("t", &["x"]),
        FoldShape::new(Indices::from_slice(&[VLEN]), true),
        ClusterShape::new(Indices::from_slice(&[1])),
        rank.clone(),
        Box::new(core),
        VLEN,
    )?;

    let u = ctx.add_var(VarInfo::new(
        "u",
        Indices::from_slice(&[1]),
        Indices::from_slice(&[1]),
    ));
    let s = ctx.add_var(VarInfo::scratch(
        "s",
        Indices::from_slice(&[1]),
        Indices::from_slice(&[1]),
    ));

    let scale = ctx.add_bundle(scale_program(), vec![u], vec![s]);
    let avg = ctx.add_bundle(avg_program(), vec![u], vec![u]);
    ctx.add_scratch_child(avg, scale);
    ctx.add_stage("main", vec![avg])?;
    ctx.prepare()?;
    Ok(ctx)
}

#[distributed_slice(SOLUTIONS)]
static AVG1D_SCRATCH: SolutionSpec = SolutionSpec {
    name: "avg1d_scratch",
    description: "three-point average through a thread-local scratch bundle",
    build,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_children_run_first() {
        let mut ctx = build(&RankDomain::origin(&[16])).unwrap();
        assert_eq!(ctx.reqd_bundles(1), vec![0, 1]);

        core(ctx.core()).init(0, |x| x as f64);
        ctx.run_step(0).unwrap();

        let cr = core(ctx.core());
        // (2(x-1) + 2x + 2(x+1)) / 6 == x in the interior.
        for x in 1..15 {
            assert_eq!(cr.value(1, x), x as f64);
        }
    }
}
