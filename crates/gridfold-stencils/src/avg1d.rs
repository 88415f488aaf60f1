//! 1-D three-point average, fold 4, cluster 2.
//!
//! `u[t+1][x] = (u[t][x-1] + u[t][x] + u[t][x+1]) / 3`
//!
//! Emitted for a portable build: the vector and cluster entry points
//! are explicit lane loops with the fold baked in as constants.

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
const CLEN: Idx = 2;

/// Core data: the single grid var plus rank placement.
pub struct Avg1dCore {
    u: PlaneGrid,
    rank_ofs: Idx,
}

impl Avg1dCore {
    /// Read `u` at rank-relative `x` on step plane `t`.
    pub fn value(&self, t: Idx, x: Idx) -> f64 {
        self.u.read(t, &[x])
    }

    /// Initialize plane `t` from a function of `x`.
    pub fn init(&self, t: Idx, f: impl Fn(Idx) -> f64) {
        self.u.fill(t, |pt| f(pt[0]));
    }
}

impl StencilCore for Avg1dCore {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn core(c: &dyn StencilCore) -> &Avg1dCore {
    c.as_any().downcast_ref().expect("avg1d core")
}

#[inline]
fn point(cr: &Avg1dCore, t: Idx, x: Idx) {
    let u = &cr.u;
    let val = (u.read(t, &[x - 1]) + u.read(t, &[x]) + u.read(t, &[x + 1])) / 3.0;
    u.write(t + 1, &[x], val);
}

fn calc_scalar(c: &dyn StencilCore, _slot: usize, pt: &Indices) {
    let cr = core(c);
    point(cr, pt[0], pt[1] - cr.rank_ofs);
}

fn calc_vectors(
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
                point(cr, t, v * VLEN + lane);
            }
        }
    }
}

fn calc_clusters(
    c: &dyn StencilCore,
    _outer_t: usize,
    _inner_t: usize,
    _thread_limit: usize,
    idxs: &ScanIndices,
) {
    let cr = core(c);
    let t = idxs.begin[0];
    let mut v = idxs.begin[1];
    while v < idxs.end[1] {
        // One cluster: CLEN vectors evaluated jointly.
        for vv in v..v + CLEN {
            for lane in 0..VLEN {
                point(cr, t, vv * VLEN + lane);
            }
        }
        v += CLEN;
    }
}

fn program() -> BundleProgram {
    BundleProgram {
        name: "avg1d",
        scalar_fp_ops: 3,
        scalar_points_read: 3,
        scalar_points_written: 1,
        is_scratch: false,
        sub_domain_descr: None,
        step_cond_descr: None,
        is_in_valid_domain: |_, _| true,
        is_in_valid_step: |_, _| true,
        output_step_index: |t| Some(t + 1),
        calc_scalar,
        calc_vectors,
        calc_clusters,
        rebase_scratch: None,
    }
}

/// Build the solution for one rank sub-domain.
pub fn build(rank: &RankDomain) -> Result<SolutionContext> {
    let core = Avg1dCore {
        u: PlaneGrid::new(&[rank.sizes[0]], 1, 2),
        rank_ofs: rank.offsets[0],
    };
    let mut ctx = SolutionContext::new(
        "avg1d",
        DimSpec::new("t", &["x"]),
        FoldShape::new(Indices::from_slice(&[VLEN]), true),
        ClusterShape::new(Indices::from_slice(&[CLEN])),
        rank.clone(),
        Box::new(core),
        VLEN,
    )?;

    let u = ctx.add_var(VarInfo::new(
        "u",
        Indices::from_slice(&[1]),
        Indices::from_slice(&[1]),
    ));
    let b = ctx.add_bundle(program(), vec![u], vec![u]);
    ctx.add_stage("main", vec![b])?;
    ctx.prepare()?;
    Ok(ctx)
}

#[distributed_slice(SOLUTIONS)]
static AVG1D: SolutionSpec = SolutionSpec {
    name: "avg1d",
    description: "1-D three-point average, fold 4, cluster 2",
    build,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_step_matches_hand_computation() {
        let mut ctx = build(&RankDomain::origin(&[16])).unwrap();
        core(ctx.core()).init(0, |x| x as f64);
        ctx.run_step(0).unwrap();

        let cr = core(ctx.core());
        // Interior: average of x-1, x, x+1 is x.
        for x in 1..15 {
            assert_eq!(cr.value(1, x), x as f64);
        }
        // Edges read one halo zero.
        assert_eq!(cr.value(1, 0), 1.0 / 3.0);
        assert_eq!(cr.value(1, 15), (14.0 + 15.0) / 3.0);
    }
}
