//! Two chained 1-D bundles with a dependency edge.
//!
//! `inc`:    `g[t+1][x] = g[t][x] + 1`
//! `double`: `h[t+1][x] = g[t+1][x] * 2`
//!
//! `double` depends on `inc`, so within one step it must observe the
//! freshly written `g` plane. Fold 4, cluster 1: the engine's
//! full-vector border path stays idle and everything is clusters plus
//! masked edges.

use std::any::Any;

use linkme::distributed_slice;

use gridfold_core::{
    ClusterShape, DimSpec, FoldShape, Idx, Indices, LaneMask, Result, ScanIndices,
};
use gridfold_engine::{
    BundleProgram, RankDomain, SOLUTIONS, SolutionContext, SolutionSpec, StencilCore, VarInfo,
};

use crate::grid::PlaneGrid;

const VLEN: Idx = 4;

pub struct Chain1dCore {
    g: PlaneGrid,
    h: PlaneGrid,
    rank_ofs: Idx,
}

impl Chain1dCore {
    pub fn g(&self, t: Idx, x: Idx) -> f64 {
        self.g.read(t, &[x])
    }

    pub fn h(&self, t: Idx, x: Idx) -> f64 {
        self.h.read(t, &[x])
    }

    pub fn init_g(&self, t: Idx, f: impl Fn(Idx) -> f64) {
        self.g.fill(t, |pt| f(pt[0]));
    }
}

impl StencilCore for Chain1dCore {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn core(c: &dyn StencilCore) -> &Chain1dCore {
    c.as_any().downcast_ref().expect("chain1d core")
}

#[inline]
fn inc_point(cr: &Chain1dCore, t: Idx, x: Idx) {
    cr.g.write(t + 1, &[x], cr.g.read(t, &[x]) + 1.0);
}

#[inline]
fn double_point(cr: &Chain1dCore, t: Idx, x: Idx) {
    cr.h.write(t + 1, &[x], cr.g.read(t + 1, &[x]) * 2.0);
}

macro_rules! lane_kernels {
    ($scalar:ident, $vectors:ident, $clusters:ident, $point:ident) => {
        fn $scalar(c: &dyn StencilCore, _slot: usize, pt: &Indices) {
            let cr = core(c);
            $point(cr, pt[0], pt[1] - cr.rank_ofs);
        }

        fn $vectors(
            c: &dyn StencilCore,
            _outer_t: usize,
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
                        $point(cr, t, v * VLEN + lane);
                    }
                }
            }
        }

        fn $clusters(
            c: &dyn StencilCore,
            _outer_t: usize,
            _inner_t: usize,
            _thread_limit: usize,
            idxs: &ScanIndices,
        ) {
            let cr = core(c);
            let t = idxs.begin[0];
            for v in idxs.begin[1]..idxs.end[1] {
                for lane in 0..VLEN {
                    $point(cr, t, v * VLEN + lane);
                }
            }
        }
    };
}

lane_kernels!(inc_scalar, inc_vectors, inc_clusters, inc_point);
lane_kernels!(double_scalar, double_vectors, double_clusters, double_point);

fn inc_program() -> BundleProgram {
    BundleProgram {
        name: "inc",
        scalar_fp_ops: 1,
        scalar_points_read: 1,
        scalar_points_written: 1,
        is_scratch: false,
        sub_domain_descr: None,
        step_cond_descr: None,
        is_in_valid_domain: |_, _| true,
        is_in_valid_step: |_, _| true,
        output_step_index: |t| Some(t + 1),
        calc_scalar: inc_scalar,
        calc_vectors: inc_vectors,
        calc_clusters: inc_clusters,
        rebase_scratch: None,
    }
}

fn double_program() -> BundleProgram {
    BundleProgram {
        name: "double",
        scalar_fp_ops: 1,
        scalar_points_read: 1,
        scalar_points_written: 1,
        is_scratch: false,
        sub_domain_descr: None,
        step_cond_descr: None,
        is_in_valid_domain: |_, _| true,
        is_in_valid_step: |_, _| true,
        output_step_index: |t| Some(t + 1),
        calc_scalar: double_scalar,
        calc_vectors: double_vectors,
        calc_clusters: double_clusters,
        rebase_scratch: None,
    }
}

pub fn build(rank: &RankDomain) -> Result<SolutionContext> {
    let size = rank.sizes[0];
    let core = Chain1dCore {
        g: PlaneGrid::new(&[size], 0, 2),
        h: PlaneGrid::new(&[size], 0, 2),
        rank_ofs: rank.offsets[0],
    };
    let mut ctx = SolutionContext::new(
        "chain1d",
        DimSpec::new("t", &["x"]),
        FoldShape::new(Indices::from_slice(&[VLEN]), true),
        ClusterShape::new(Indices::from_slice(&[1])),
        rank.clone(),
        Box::new(core),
        VLEN,
    )?;

    let zero = Indices::from_slice(&[0]);
    let g = ctx.add_var(VarInfo::new("g", zero, zero));
    let h = ctx.add_var(VarInfo::new("h", zero, zero));
    let inc = ctx.add_bundle(inc_program(), vec![g], vec![g]);
    let double = ctx.add_bundle(double_program(), vec![g], vec![h]);
    ctx.add_dep(double, inc);
    ctx.add_stage("main", vec![inc, double])?;
    ctx.prepare()?;
    Ok(ctx)
}

#[distributed_slice(SOLUTIONS)]
static CHAIN1D: SolutionSpec = SolutionSpec {
    name: "chain1d",
    description: "two chained 1-D bundles with a dependency edge",
    build,
};
