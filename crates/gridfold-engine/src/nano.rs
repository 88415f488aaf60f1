//! Nano-block engine: the hot path.
//!
//! Given a rectilinear micro-block sub-region in element units, the
//! engine decomposes it along every domain dimension into peel,
//! full-vector, full-cluster, and remainder parts, then dispatches the
//! cluster kernel on the aligned interior, the unmasked vector kernel
//! on full-vector borders, and the masked vector kernel on
//! partial-vector edges and corners.
//!
//! The index sets, per dim:
//!
//! ```text
//!  eidxs.begin
//!   | peel <--------- partial vecs here -------> remainder
//!   | |   left <------ full vecs here ----> right |
//!   | |    |         full clusters here       |   | eidxs.end
//!   | |    |                 |                |   |  |
//!   v v    v                 v                v   v  v
//!   +--+-------+---------------------------+-----+--+  compute bounds
//!      |       |                           |     |
//!  +---+-------+---------------------------+-----+---+ vec-aligned bounds
//!  ^   ^       ^                           ^     ^   ^
//!  |   |       fcidxs.begin      fcidxs.end|     |   |
//!  |   fvidxs.begin                  fvidxs.end--+   |
//!  ovidxs.begin (rounded down)     ovidxs.end (rounded up)
//! ```
//!
//! All rounding is floor-signed so negative halo indices decompose
//! correctly.

use tracing::trace;

use gridfold_core::{
    ClusterShape, Error, FoldShape, Indices, LaneMask, MAX_DIMS, Result, ScanIndices,
    div_flr, rem_flr, round_down_flr, round_up_flr,
};
use gridfold_core::EvalSettings;

use crate::program::{BundleProgram, StencilCore};

/// Everything one nano-block evaluation needs from the solution.
pub(crate) struct NanoCtx<'a> {
    pub program: &'a BundleProgram,
    pub core: &'a dyn StencilCore,
    pub fold: &'a FoldShape,
    pub cluster: &'a ClusterShape,
    /// Rank offsets per domain dim (global - offset = rank-relative).
    pub rank_ofs: &'a Indices,
}

/// Chooser between the scalar debug and optimized implementations.
pub(crate) fn calc_nano_block(
    ctx: &NanoCtx<'_>,
    outer_t: usize,
    inner_t: usize,
    settings: &EvalSettings,
    micro_block_idxs: &ScanIndices,
) -> Result<()> {
    if settings.force_scalar {
        calc_nano_block_dbg(ctx, outer_t, inner_t, micro_block_idxs);
        Ok(())
    } else {
        calc_nano_block_opt(ctx, outer_t, inner_t, settings, micro_block_idxs)
    }
}

/// Pure scalar evaluation of one nano-block. Slow; debug only.
///
/// Indices stay scalar and global rather than normalized and
/// rank-relative as in the vector paths.
pub(crate) fn calc_nano_block_dbg(
    ctx: &NanoCtx<'_>,
    outer_t: usize,
    inner_t: usize,
    micro_block_idxs: &ScanIndices,
) {
    trace!(
        bundle = ctx.program.name,
        range = %micro_block_idxs.range_str(),
        outer_t,
        inner_t,
        "scalar nano-block"
    );

    let mut sb_idxs = micro_block_idxs.create_inner();
    sb_idxs.stride.set_from_const(1);
    sb_idxs.align.set_from_const(1);

    visit_misc_points(&sb_idxs, &mut |pt| {
        (ctx.program.calc_scalar)(ctx.core, outer_t, pt);
    });
}

/// Visit every scalar point of `[begin, end)` with unit stride, last
/// dim fastest. The misc-loop template behind the reference paths.
pub(crate) fn visit_misc_points(idxs: &ScanIndices, f: &mut dyn FnMut(&Indices)) {
    let nd = idxs.ndims();
    if (0..nd).any(|i| idxs.end[i] <= idxs.begin[i]) {
        return;
    }
    let mut pt = idxs.begin;
    loop {
        f(&pt);

        // Odometer, last dim fastest.
        let mut d = nd;
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            pt[d] += 1;
            if pt[d] < idxs.end[d] {
                break;
            }
            pt[d] = idxs.begin[d];
        }
    }
}

/// Optimized evaluation of one nano-block.
///
/// Decomposes the region per the module diagram and dispatches to the
/// compiled cluster / vector kernels.
pub(crate) fn calc_nano_block_opt(
    ctx: &NanoCtx<'_>,
    outer_t: usize,
    inner_t: usize,
    settings: &EvalSettings,
    micro_block_idxs: &ScanIndices,
) -> Result<()> {
    trace!(
        bundle = ctx.program.name,
        range = %micro_block_idxs.range_str(),
        outer_t,
        inner_t,
        "nano-block"
    );

    let nsdims = micro_block_idxs.ndims();
    let ndd = nsdims - 1;
    let thread_limit = settings.thread_limit.max(1);

    // Nano-block bounds from the block's current window. These are in
    // element units and global.
    let mut sb_idxs = micro_block_idxs.create_inner();

    // Strides within a nano-block come from pico-block sizes; tiles
    // from the nano-block tile shape.
    sb_idxs.set_strides_from_inner(&settings.pico_block_sizes, 1);
    sb_idxs.tile_size = settings.nano_block_tile_sizes;

    // The four derived index sets, all rank-relative: full elements,
    // full clusters, full vectors, and the outer vector-aligned
    // envelope.
    let mut sb_eidxs = sb_idxs;
    let mut sb_fcidxs = sb_idxs;
    let mut sb_fvidxs = sb_idxs;
    let mut sb_ovidxs = sb_idxs;
    for s in [
        &mut sb_eidxs,
        &mut sb_fcidxs,
        &mut sb_fvidxs,
        &mut sb_ovidxs,
    ] {
        s.align_ofs.set_from_const(0);
    }

    let mut do_clusters = true;
    let mut do_outside_clusters = false;

    // Per-dim flag bits for full and partial vecs on left and right.
    let mut do_left_fvecs: u32 = 0;
    let mut do_right_fvecs: u32 = 0;
    let mut do_left_pvecs: u32 = 0;
    let mut do_right_pvecs: u32 = 0;

    // Per-dim lane masks for partial vectors.
    let mut peel_masks = [0u64; MAX_DIMS];
    let mut rem_masks = [0u64; MAX_DIMS];

    for j in 0..ndd {
        let i = j + 1;

        // Make indices rank-relative.
        let rofs = ctx.rank_ofs[j];
        let ebgn = sb_idxs.begin[i] - rofs;
        let eend = sb_idxs.end[i] - rofs;

        // Range of full clusters; also the inner bounds of the full
        // vectors. Begin may exceed end when the nano-block sits
        // inside one cluster.
        let cpts = ctx.cluster.pts(ctx.fold, j);
        let mut fcbgn = round_up_flr(ebgn, cpts);
        let mut fcend = round_down_flr(eend, cpts);

        // Range of full vectors; also the inner bounds of the peel and
        // remainder sections.
        let vpts = ctx.fold.pts(j);
        let fvbgn = round_up_flr(ebgn, vpts);
        let fvend = round_down_flr(eend, vpts);

        // Outer vector-aligned envelope: rounding toward the outside
        // of the nano-block. Bounds for partial vectors if needed.
        let ovbgn = round_down_flr(ebgn, vpts);
        let ovend = round_up_flr(eend, vpts);
        debug_assert!(ovend >= ovbgn);
        debug_assert!(ovbgn <= fvbgn);
        debug_assert!(ovend >= fvend);

        // Full vectors on left or right? Always false when the
        // cluster size is 1 in this dim.
        let mut do_left_fvec = fvbgn < fcbgn;
        let mut do_right_fvec = fvend > fcend;

        // Partial vectors on left or right?
        let mut do_left_pvec = ebgn < fvbgn;
        let mut do_right_pvec = eend > fvend;

        // Build this dim's peel and remainder masks by visiting the
        // fold points in layout order: shift, then set the top bit
        // when the lane's element lies inside the nano-block.
        let mut pmask = 0u64;
        let mut rmask = 0u64;
        if do_left_pvec || do_right_pvec {
            let mbit = 1u64 << (ctx.fold.points() - 1);
            ctx.fold.visit_points(|pt, _| {
                pmask >>= 1;
                rmask >>= 1;
                if ovbgn + pt[j] >= ebgn {
                    pmask |= mbit;
                }
                if fvend + pt[j] < eend {
                    rmask |= mbit;
                }
            });
            if do_left_pvec {
                debug_assert_ne!(pmask, 0);
            }
            if do_right_pvec {
                debug_assert_ne!(rmask, 0);
            }
        }

        // Overlap fixups.
        if do_left_pvec && do_right_pvec && ovbgn == fvend {
            // Peel and remainder share one vector: AND the masks and
            // route everything through the peel path.
            debug_assert_eq!(fvbgn, ovend);
            pmask &= rmask;
            rmask = 0;
            do_left_pvec = true;
            do_right_pvec = false;
            do_left_fvec = false;
            do_right_fvec = false;
            do_clusters = false;
        } else if fcend <= fcbgn {
            // No full clusters: collapse the cluster range to the end
            // of the full-vec range and keep left full-vec work only.
            fcbgn = fvend;
            fcend = fvend;
            do_clusters = false;
            if do_left_fvec || do_right_fvec {
                do_left_fvec = true;
                do_right_fvec = false;
            }
        }

        if do_left_fvec || do_right_fvec || do_left_pvec || do_right_pvec {
            do_outside_clusters = true;
        }

        sb_eidxs.begin[i] = ebgn;
        sb_eidxs.end[i] = eend;
        sb_fcidxs.begin[i] = fcbgn;
        sb_fcidxs.end[i] = fcend;
        sb_fvidxs.begin[i] = fvbgn;
        sb_fvidxs.end[i] = fvend;
        sb_ovidxs.begin[i] = ovbgn;
        sb_ovidxs.end[i] = ovend;

        peel_masks[j] = pmask;
        rem_masks[j] = rmask;
        if do_left_fvec {
            do_left_fvecs |= 1 << j;
        }
        if do_right_fvec {
            do_right_fvecs |= 1 << j;
        }
        if do_left_pvec {
            do_left_pvecs |= 1 << j;
        }
        if do_right_pvec {
            do_right_pvecs |= 1 << j;
        }
    }
    trace!(
        eidxs = %sb_eidxs.range_str(),
        fcidxs = %sb_fcidxs.range_str(),
        fvidxs = %sb_fvidxs.range_str(),
        ovidxs = %sb_ovidxs.range_str(),
        "decomposed"
    );

    // Full rectilinear polytope of aligned clusters: optimized code
    // without masking.
    let norm_fcidxs = normalize_scan(ctx, &sb_fcidxs)?;
    if do_clusters {
        trace!(range = %norm_fcidxs.range_str(), "clusters");
        (ctx.program.calc_clusters)(ctx.core, outer_t, inner_t, thread_limit, &norm_fcidxs);
    } else {
        trace!("no full clusters to calculate");
    }

    if !do_outside_clusters {
        trace!("no full or partial vectors to calculate");
        return Ok(());
    }
    if ctx.cluster.points(ctx.fold) == 1 {
        return Err(Error::ScalarClusterBorder {
            bundle: ctx.program.name.to_string(),
        });
    }

    let norm_fvidxs = normalize_scan(ctx, &sb_fvidxs)?;
    let norm_ovidxs = normalize_scan(ctx, &sb_ovidxs)?;

    // Walk progressively deeper intersections of the domain dims:
    // faces (k=1), edges (k=2), corners (k=3), ... Each combo of
    // selected dims is paired with every left/right sequence.
    let mut partn = 0u32;
    for k in 1..=ndd {
        let ncombos = n_choose_k(ndd, k);
        let nseqs = 1u32 << k;

        for r in 0..ncombos {
            let cdims = n_choose_k_set(ndd, k, r);

            for lr in 0..nseqs {
                partn += 1;

                // Ranges for this part, seeded for non-selected dims.
                let mut fv_part = norm_fcidxs;
                let mut pv_part = norm_fvidxs;
                let mut fv_needed = true;
                let mut pv_needed = true;
                let mut pv_mask = LaneMask::FULL;

                let mut nsel = 0;
                for j in 0..ndd {
                    let i = j + 1;
                    if cdims & (1 << j) == 0 {
                        continue;
                    }
                    let is_left = lr & (1 << nsel) == 0;
                    nsel += 1;

                    if is_left {
                        fv_part.begin[i] = norm_fvidxs.begin[i];
                        fv_part.end[i] = norm_fcidxs.begin[i];
                        if do_left_fvecs & (1 << j) == 0 {
                            fv_needed = false;
                        }
                        pv_part.begin[i] = norm_ovidxs.begin[i];
                        pv_part.end[i] = norm_fvidxs.begin[i];
                        pv_mask &= LaneMask(peel_masks[j]);
                        if do_left_pvecs & (1 << j) == 0 {
                            pv_needed = false;
                        }
                    } else {
                        fv_part.begin[i] = norm_fcidxs.end[i];
                        fv_part.end[i] = norm_fvidxs.end[i];
                        if do_right_fvecs & (1 << j) == 0 {
                            fv_needed = false;
                        }
                        pv_part.begin[i] = norm_fvidxs.end[i];
                        pv_part.end[i] = norm_ovidxs.end[i];
                        pv_mask &= LaneMask(rem_masks[j]);
                        if do_right_pvecs & (1 << j) == 0 {
                            pv_needed = false;
                        }
                    }
                }

                if fv_needed && !scan_is_empty(&fv_part) {
                    let mut part = fv_part;
                    part.start = part.begin;
                    part.stop = part.end;
                    trace!(part = partn, range = %part.range_str(), "full vectors");
                    (ctx.program.calc_vectors)(
                        ctx.core,
                        outer_t,
                        inner_t,
                        thread_limit,
                        &part,
                        LaneMask::FULL,
                    );
                }

                if pv_needed && !scan_is_empty(&pv_part) {
                    let mut part = pv_part;
                    part.start = part.begin;
                    part.stop = part.end;
                    trace!(
                        part = partn,
                        range = %part.range_str(),
                        mask = pv_mask.0,
                        "partial vectors"
                    );
                    (ctx.program.calc_vectors)(
                        ctx.core,
                        outer_t,
                        inner_t,
                        thread_limit,
                        &part,
                        pv_mask,
                    );
                }
            }
        }
    }

    Ok(())
}

/// True if any dim of `[begin, end)` covers nothing.
fn scan_is_empty(idxs: &ScanIndices) -> bool {
    (0..idxs.ndims()).any(|i| idxs.end[i] <= idxs.begin[i])
}

/// Divide element-unit indices by the fold lengths per domain dim.
///
/// Rank offsets must already be subtracted. Rejected if any domain
/// entry is not a fold multiple.
pub(crate) fn normalize_indices(
    ctx: &NanoCtx<'_>,
    orig: &Indices,
) -> Result<Indices> {
    let mut norm = *orig;
    for j in 0..orig.ndims() - 1 {
        let i = j + 1;
        let fp = ctx.fold.pts(j);

        // Floor division so begin/end inside halos stay correct.
        if rem_flr(orig[i], fp) != 0 {
            return Err(Error::MisalignedIndices {
                bundle: ctx.program.name.to_string(),
                dim: j,
                value: orig[i],
                fold: fp,
            });
        }
        norm[i] = div_flr(orig[i], fp);
    }
    Ok(norm)
}

/// Normalize a whole scan descriptor.
///
/// Begin/end must be fold-aligned; stride, tile, and align are
/// performance hints and are floor-scaled (stride and align at least
/// one vector).
pub(crate) fn normalize_scan(
    ctx: &NanoCtx<'_>,
    orig: &ScanIndices,
) -> Result<ScanIndices> {
    let mut norm = *orig;
    norm.begin = normalize_indices(ctx, &orig.begin)?;
    norm.end = normalize_indices(ctx, &orig.end)?;
    norm.start = norm.begin;
    norm.stop = norm.end;
    for j in 0..orig.ndims() - 1 {
        let i = j + 1;
        let fp = ctx.fold.pts(j);
        norm.tile_size[i] = div_flr(orig.tile_size[i], fp);
        norm.stride[i] = div_flr(orig.stride[i], fp).max(1);
        norm.align[i] = div_flr(orig.align[i], fp).max(1);
    }
    Ok(norm)
}

/// Binomial coefficient C(n, k) for small n.
pub(crate) fn n_choose_k(n: usize, k: usize) -> u32 {
    debug_assert!(k <= n && n < 32);
    let mut c = 1u64;
    for i in 0..k as u64 {
        c = c * (n as u64 - i) / (i + 1);
    }
    c as u32
}

/// The `r`-th `n`-bit set with exactly `k` bits, in ascending
/// numeric order of the bit patterns.
pub(crate) fn n_choose_k_set(n: usize, k: usize, r: u32) -> u32 {
    debug_assert!(k <= n && n < 32);
    let mut seen = 0;
    for bits in 0u32..(1 << n) {
        if bits.count_ones() as usize == k {
            if seen == r {
                return bits;
            }
            seen += 1;
        }
    }
    unreachable!("combination {r} out of range for C({n},{k})")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use gridfold_core::EvalSettings;

    use super::*;
    use crate::program::tests_support::{KernelCall, RecordingCore, recording_program};

    fn run_nano(
        fold: FoldShape,
        cluster: ClusterShape,
        begin: &[i64],
        end: &[i64],
    ) -> Vec<KernelCall> {
        let core = RecordingCore::default();
        let program = recording_program("test", false);
        let ndd = begin.len();
        let rank_ofs = Indices::splat(0, ndd);
        let ctx = NanoCtx {
            program: &program,
            core: &core,
            fold: &fold,
            cluster: &cluster,
            rank_ofs: &rank_ofs,
        };

        let mut b = vec![0];
        b.extend_from_slice(begin);
        let mut e = vec![1];
        e.extend_from_slice(end);
        let mb = ScanIndices::new(Indices::from_slice(&b), Indices::from_slice(&e));
        let settings = EvalSettings::for_dims(1 + ndd);
        calc_nano_block_opt(&ctx, 0, 0, &settings, &mb).unwrap();
        core.take_calls()
    }

    fn fold1d(vlen: i64) -> FoldShape {
        FoldShape::new(Indices::from_slice(&[vlen]), true)
    }

    fn cl1d(clen: i64) -> ClusterShape {
        ClusterShape::new(Indices::from_slice(&[clen]))
    }

    /// Element set covered by a call list, with disjointness check.
    fn covered(calls: &[KernelCall], fold: &FoldShape) -> HashSet<Vec<i64>> {
        let ndd = fold.pts_tuple().ndims();
        let mut lanes = Vec::new();
        fold.visit_points(|pt, _| lanes.push(pt.as_slice().to_vec()));

        let mut set = HashSet::new();
        let mut add = |pt: Vec<i64>| {
            assert!(set.insert(pt.clone()), "point {pt:?} covered twice");
        };

        for call in calls {
            match call {
                KernelCall::Clusters { begin, end } => {
                    // Normalized vector range; expand each vector to lanes.
                    let probe = ScanIndices::new(
                        Indices::from_slice(begin),
                        Indices::from_slice(end),
                    );
                    visit_misc_points(&probe, &mut |v| {
                        for lane in &lanes {
                            let mut pt = Vec::with_capacity(ndd);
                            for j in 0..ndd {
                                pt.push(v[1 + j] * fold.pts(j) + lane[j]);
                            }
                            add(pt);
                        }
                    });
                }
                KernelCall::Vectors { begin, end, mask } => {
                    let probe = ScanIndices::new(
                        Indices::from_slice(begin),
                        Indices::from_slice(end),
                    );
                    visit_misc_points(&probe, &mut |v| {
                        for (ord, lane) in lanes.iter().enumerate() {
                            let enabled = *mask == u64::MAX || (mask >> ord) & 1 == 1;
                            if enabled {
                                let mut pt = Vec::with_capacity(ndd);
                                for j in 0..ndd {
                                    pt.push(v[1 + j] * fold.pts(j) + lane[j]);
                                }
                                add(pt);
                            }
                        }
                    });
                }
                KernelCall::Scalar { .. } => panic!("scalar call on optimized path"),
            }
        }
        set
    }

    fn expect_coverage(calls: &[KernelCall], fold: &FoldShape, begin: &[i64], end: &[i64]) {
        let got = covered(calls, fold);

        let ndd = begin.len();
        let mut padded_b = vec![0];
        padded_b.extend_from_slice(begin);
        let mut padded_e = vec![1];
        padded_e.extend_from_slice(end);
        let probe = ScanIndices::new(
            Indices::from_slice(&padded_b),
            Indices::from_slice(&padded_e),
        );
        let mut want = HashSet::new();
        visit_misc_points(&probe, &mut |pt| {
            want.insert(pt.as_slice()[1..1 + ndd].to_vec());
        });
        assert_eq!(got, want, "partition does not equal the element interval");
    }

    #[test]
    fn test_aligned_interval_is_one_cluster_pass() {
        // 1D, VLEN=4, CLEN=1, [0,16).
        let calls = run_nano(fold1d(4), cl1d(1), &[0], &[16]);
        assert_eq!(
            calls,
            vec![KernelCall::Clusters {
                begin: vec![0, 0],
                end: vec![1, 4],
            }]
        );
    }

    #[test]
    fn test_peel_and_remainder_masks() {
        // 1D, VLEN=4, CLEN=1, [2,14).
        let fold = fold1d(4);
        let cluster = cl1d(1);
        let calls = run_nano(fold.clone(), cluster.clone(), &[2], &[14]);
        assert_eq!(
            calls,
            vec![
                KernelCall::Clusters {
                    begin: vec![0, 1],
                    end: vec![1, 3],
                },
                KernelCall::Vectors {
                    begin: vec![0, 0],
                    end: vec![1, 1],
                    mask: 0b1100,
                },
                KernelCall::Vectors {
                    begin: vec![0, 3],
                    end: vec![1, 4],
                    mask: 0b0011,
                },
            ]
        );
        expect_coverage(&calls, &fold, &[2], &[14]);
    }

    #[test]
    fn test_clustered_interval_has_no_vector_passes() {
        // 1D, VLEN=4, CLEN=2, [0,16): two clusters, nothing else.
        let calls = run_nano(fold1d(4), cl1d(2), &[0], &[16]);
        assert_eq!(
            calls,
            vec![KernelCall::Clusters {
                begin: vec![0, 0],
                end: vec![1, 4],
            }]
        );
    }

    #[test]
    fn test_cluster_borders_use_full_vectors() {
        // 1D, VLEN=4, CLEN=2, [4,20): clusters cover [8,16); vector
        // borders on both sides, no masking needed.
        let fold = fold1d(4);
        let cluster = cl1d(2);
        let calls = run_nano(fold.clone(), cluster.clone(), &[4], &[20]);
        assert_eq!(
            calls,
            vec![
                KernelCall::Clusters {
                    begin: vec![0, 2],
                    end: vec![1, 4],
                },
                KernelCall::Vectors {
                    begin: vec![0, 1],
                    end: vec![1, 2],
                    mask: u64::MAX,
                },
                KernelCall::Vectors {
                    begin: vec![0, 4],
                    end: vec![1, 5],
                    mask: u64::MAX,
                },
            ]
        );
        expect_coverage(&calls, &fold, &[4], &[20]);
    }

    #[test]
    fn test_overlapping_peel_and_remainder_fuse() {
        // 1D, VLEN=8, [3,6): peel and remainder land in one vector.
        let fold = fold1d(8);
        let cluster = cl1d(2);
        let calls = run_nano(fold.clone(), cluster.clone(), &[3], &[6]);
        assert_eq!(
            calls,
            vec![KernelCall::Vectors {
                begin: vec![0, 0],
                end: vec![1, 1],
                mask: 0b0011_1000,
            }]
        );
        expect_coverage(&calls, &fold, &[3], &[6]);
    }

    #[test]
    fn test_2d_corner_masks_are_per_dim_ands() {
        // 2D fold x=4*y=4, x in [1,7), y in [0,3): no full cluster
        // fits; coverage comes from two corner regions whose masks are
        // the ANDs of the per-dim masks.
        let fold = FoldShape::new(Indices::from_slice(&[4, 4]), true);
        let cluster = ClusterShape::new(Indices::from_slice(&[1, 1]));
        let calls = run_nano(fold.clone(), cluster.clone(), &[1, 0], &[7, 3]);

        let x_peel: u64 = 0xEEEE;
        let x_rem: u64 = 0x7777;
        let y_rem: u64 = 0x0FFF;
        assert_eq!(
            calls,
            vec![
                KernelCall::Vectors {
                    begin: vec![0, 0, 0],
                    end: vec![1, 1, 1],
                    mask: x_peel & y_rem,
                },
                KernelCall::Vectors {
                    begin: vec![0, 1, 0],
                    end: vec![1, 2, 1],
                    mask: x_rem & y_rem,
                },
            ]
        );
        expect_coverage(&calls, &fold, &[1, 0], &[7, 3]);
    }

    #[test]
    fn test_2d_overlap_in_one_dim_composes_with_borders() {
        // x sits inside a single vector (fused peel/rem mask); y has
        // ordinary peel and remainder. Only corners carry work.
        let fold = FoldShape::new(Indices::from_slice(&[4, 4]), true);
        let cluster = ClusterShape::new(Indices::from_slice(&[1, 1]));
        let calls = run_nano(fold.clone(), cluster.clone(), &[1, 1], &[3, 7]);
        assert!(calls.iter().all(|c| matches!(c, KernelCall::Vectors { .. })));
        expect_coverage(&calls, &fold, &[1, 1], &[3, 7]);
    }

    #[test]
    fn test_2d_partition_completeness_with_interior() {
        // Large enough for a cluster interior plus all border kinds.
        let fold = FoldShape::new(Indices::from_slice(&[4, 4]), true);
        let cluster = ClusterShape::new(Indices::from_slice(&[2, 1]));
        let calls = run_nano(fold.clone(), cluster.clone(), &[2, 1], &[30, 15]);
        expect_coverage(&calls, &fold, &[2, 1], &[30, 15]);
    }

    #[test]
    fn test_negative_halo_indices_decompose() {
        // Begin inside the left halo: floor rounding keeps alignment.
        let fold = fold1d(4);
        let cluster = cl1d(1);
        let calls = run_nano(fold.clone(), cluster.clone(), &[-3], &[9]);
        expect_coverage(&calls, &fold, &[-3], &[9]);
    }

    #[test]
    fn test_scalar_build_never_reaches_border_code() {
        // Fold of 1 lane with cluster 1: every interval is aligned, so
        // only the cluster pass runs and the masked-path guard for
        // 1-point clusters stays quiet.
        let core = RecordingCore::default();
        let program = recording_program("test", false);
        let fold = fold1d(1);
        let cluster = cl1d(1);
        let rank_ofs = Indices::splat(0, 1);
        let ctx = NanoCtx {
            program: &program,
            core: &core,
            fold: &fold,
            cluster: &cluster,
            rank_ofs: &rank_ofs,
        };
        let mb = ScanIndices::new(
            Indices::from_slice(&[0, 0]),
            Indices::from_slice(&[1, 4]),
        );
        let settings = EvalSettings::for_dims(2);
        calc_nano_block_opt(&ctx, 0, 0, &settings, &mb).unwrap();
        assert_eq!(
            core.take_calls(),
            vec![KernelCall::Clusters {
                begin: vec![0, 0],
                end: vec![1, 4],
            }]
        );
    }

    #[test]
    fn test_rank_offsets_make_indices_rank_relative() {
        let core = RecordingCore::default();
        let program = recording_program("test", false);
        let fold = fold1d(4);
        let cluster = cl1d(1);
        let rank_ofs = Indices::from_slice(&[16]);
        let ctx = NanoCtx {
            program: &program,
            core: &core,
            fold: &fold,
            cluster: &cluster,
            rank_ofs: &rank_ofs,
        };
        let mb = ScanIndices::new(
            Indices::from_slice(&[0, 16]),
            Indices::from_slice(&[1, 32]),
        );
        let settings = EvalSettings::for_dims(2);
        calc_nano_block_opt(&ctx, 0, 0, &settings, &mb).unwrap();
        assert_eq!(
            core.take_calls(),
            vec![KernelCall::Clusters {
                begin: vec![0, 0],
                end: vec![1, 4],
            }]
        );
    }

    #[test]
    fn test_normalization_round_trip_and_rejection() {
        let program = recording_program("test", false);
        let core = RecordingCore::default();
        let fold = fold1d(4);
        let cluster = cl1d(1);
        let rank_ofs = Indices::splat(0, 1);
        let ctx = NanoCtx {
            program: &program,
            core: &core,
            fold: &fold,
            cluster: &cluster,
            rank_ofs: &rank_ofs,
        };

        let aligned = Indices::from_slice(&[7, -8]);
        let norm = normalize_indices(&ctx, &aligned).unwrap();
        assert_eq!(norm.as_slice(), &[7, -2]);
        // Round trip: norm * fold == orig in every domain dim.
        assert_eq!(norm[1] * 4, aligned[1]);

        let misaligned = Indices::from_slice(&[7, -6]);
        let err = normalize_indices(&ctx, &misaligned).unwrap_err();
        assert!(matches!(err, Error::MisalignedIndices { dim: 0, value: -6, .. }));
    }

    #[test]
    fn test_debug_path_visits_every_scalar_point() {
        let core = RecordingCore::default();
        let program = recording_program("test", false);
        let fold = fold1d(4);
        let cluster = cl1d(1);
        let rank_ofs = Indices::splat(0, 1);
        let ctx = NanoCtx {
            program: &program,
            core: &core,
            fold: &fold,
            cluster: &cluster,
            rank_ofs: &rank_ofs,
        };
        let mb = ScanIndices::new(
            Indices::from_slice(&[2, 3]),
            Indices::from_slice(&[3, 7]),
        );
        calc_nano_block_dbg(&ctx, 5, 0, &mb);
        let calls = core.take_calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(
            calls[0],
            KernelCall::Scalar {
                slot: 5,
                idxs: vec![2, 3],
            }
        );
        assert_eq!(
            calls[3],
            KernelCall::Scalar {
                slot: 5,
                idxs: vec![2, 6],
            }
        );
    }

    #[test]
    fn test_combinatorics_helpers() {
        assert_eq!(n_choose_k(2, 1), 2);
        assert_eq!(n_choose_k(3, 2), 3);
        assert_eq!(n_choose_k(4, 2), 6);

        let sets: Vec<u32> = (0..3).map(|r| n_choose_k_set(3, 2, r)).collect();
        assert_eq!(sets, vec![0b011, 0b101, 0b110]);
    }
}
