//! 2-D five-point diffusion, fold x=4 * y=2, cluster 2x1.
//!
//! `u[t+1][x][y] = u + k * (u[x-1] + u[x+1] + u[y-1] + u[y+1] - 4u)`
//!
//! The fold is unit-stride in `x`, so lane ordinal `o` maps to
//! offsets `(o % 4, o / 4)` within a vector.

use std::any::Any;

use linkme::distributed_slice;

use gridfold_core::{
    ClusterShape, DimSpec, FoldShape, Idx, Indices, LaneMask, Result, ScanIndices,
};
use gridfold_engine::{
    BundleProgram, RankDomain, SOLUTIONS, SolutionContext, SolutionSpec, StencilCore, VarInfo,
};

use crate::grid::PlaneGrid;

const VLEN_X: Idx = 4;
const VLEN_Y: Idx = 2;
const NLANES: Idx = VLEN_X * VLEN_Y;
const CLEN_X: Idx = 2;
const K: f64 = 0.1;

pub struct Diffusion2dCore {
    u: PlaneGrid,
    rank_ofs: [Idx; 2],
}

impl Diffusion2dCore {
    pub fn value(&self, t: Idx, x: Idx, y: Idx) -> f64 {
        self.u.read(t, &[x, y])
    }

    pub fn init(&self, t: Idx, f: impl Fn(Idx, Idx) -> f64) {
        self.u.fill(t, |pt| f(pt[0], pt[1]));
    }
}

impl StencilCore for Diffusion2dCore {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn core(c: &dyn StencilCore) -> &Diffusion2dCore {
    c.as_any().downcast_ref().expect("diffusion2d core")
}

#[inline]
fn point(cr: &Diffusion2dCore, t: Idx, x: Idx, y: Idx) {
    let u = &cr.u;
    let c = u.read(t, &[x, y]);
    let lap = u.read(t, &[x - 1, y]) + u.read(t, &[x + 1, y]) + u.read(t, &[x, y - 1])
        + u.read(t, &[x, y + 1])
        - 4.0 * c;
    u.write(t + 1, &[x, y], c + K * lap);
}

fn calc_scalar(c: &dyn StencilCore, _slot: usize, pt: &Indices) {
    let cr = core(c);
    point(cr, pt[0], pt[1] - cr.rank_ofs[0], pt[2] - cr.rank_ofs[1]);
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
    for vx in idxs.begin[1]..idxs.end[1] {
        for vy in idxs.begin[2]..idxs.end[2] {
            for o in 0..NLANES {
                if mask.is_full() || mask.lane(o as usize) {
                    let x = vx * VLEN_X + o % VLEN_X;
                    let y = vy * VLEN_Y + o / VLEN_X;
                    point(cr, t, x, y);
                }
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
    let mut vx = idxs.begin[1];
    while vx < idxs.end[1] {
        for vy in idxs.begin[2]..idxs.end[2] {
            // One cluster: CLEN_X vectors along x.
            for vv in vx..vx + CLEN_X {
                for o in 0..NLANES {
                    let x = vv * VLEN_X + o % VLEN_X;
                    let y = vy * VLEN_Y + o / VLEN_X;
                    point(cr, t, x, y);
                }
            }
        }
        vx += CLEN_X;
    }
}

fn program() -> BundleProgram {
    BundleProgram {
        name: "diffusion2d",
        scalar_fp_ops: 7,
        scalar_points_read: 5,
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

pub fn build(rank: &RankDomain) -> Result<SolutionContext> {
    let core = Diffusion2dCore {
        u: PlaneGrid::new(&[rank.sizes[0], rank.sizes[1]], 1, 2),
        rank_ofs: [rank.offsets[0], rank.offsets[1]],
    };
    let mut ctx = SolutionContext::new(
        "diffusion2d",
        DimSpec::new("t", &["x", "y"]),
        FoldShape::new(Indices::from_slice(&[VLEN_X, VLEN_Y]), true),
        ClusterShape::new(Indices::from_slice(&[CLEN_X, 1])),
        rank.clone(),
        Box::new(core),
        NLANES,
    )?;

    let one = Indices::from_slice(&[1, 1]);
    let u = ctx.add_var(VarInfo::new("u", one, one));
    let b = ctx.add_bundle(program(), vec![u], vec![u]);
    ctx.add_stage("main", vec![b])?;
    ctx.prepare()?;
    Ok(ctx)
}

#[distributed_slice(SOLUTIONS)]
static DIFFUSION2D: SolutionSpec = SolutionSpec {
    name: "diffusion2d",
    description: "2-D five-point diffusion, fold 4x2, cluster 2x1",
    build,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_field_is_stationary_in_the_interior() {
        let mut ctx = build(&RankDomain::origin(&[16, 8])).unwrap();
        core(ctx.core()).init(0, |_, _| 5.0);
        ctx.run_step(0).unwrap();

        let cr = core(ctx.core());
        // Away from the zero halo the Laplacian of a constant is zero.
        for x in 1..15 {
            for y in 1..7 {
                assert_eq!(cr.value(1, x, y), 5.0);
            }
        }
        // Edge cells lose mass into the halo.
        assert!(cr.value(1, 0, 3) < 5.0);
    }
}
