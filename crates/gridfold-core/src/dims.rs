//! Dimension metadata: names, fold shape, cluster shape.
//!
//! Stencil tuples are ordered step-dim first, then the spatial domain
//! dims. Most of the engine works with positional indices (`i` over
//! stencil dims, `j = i - 1` over domain dims); names exist for
//! diagnostics and for by-name shape queries.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::idx::Idx;
use crate::indices::Indices;

/// Names of the stencil dimensions for one solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimSpec {
    step_dim: String,
    domain_dims: Vec<String>,
}

impl DimSpec {
    pub fn new(step_dim: impl Into<String>, domain_dims: &[&str]) -> Self {
        Self {
            step_dim: step_dim.into(),
            domain_dims: domain_dims.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Name of the step (time) dimension.
    pub fn step_dim(&self) -> &str {
        &self.step_dim
    }

    /// Names of the spatial domain dimensions, in tuple order.
    pub fn domain_dims(&self) -> &[String] {
        &self.domain_dims
    }

    /// Number of spatial domain dimensions.
    pub fn num_domain_dims(&self) -> usize {
        self.domain_dims.len()
    }

    /// Number of stencil dimensions (step + domain).
    pub fn num_stencil_dims(&self) -> usize {
        1 + self.domain_dims.len()
    }

    /// Position of a domain dim by name.
    pub fn domain_dim_posn(&self, name: &str) -> Result<usize> {
        self.domain_dims
            .iter()
            .position(|d| d == name)
            .ok_or_else(|| Error::UnknownDim {
                dim: name.to_string(),
            })
    }
}

/// An [`Indices`] tuple paired with its dimension names.
///
/// Used in diagnostics and wherever a caller wants to address entries
/// by dim name instead of position.
#[derive(Clone)]
pub struct IndexTuple {
    spec: Arc<DimSpec>,
    vals: Indices,
}

impl IndexTuple {
    pub fn new(spec: Arc<DimSpec>, vals: Indices) -> Self {
        debug_assert_eq!(vals.ndims(), spec.num_stencil_dims());
        Self { spec, vals }
    }

    pub fn vals(&self) -> &Indices {
        &self.vals
    }

    /// Value of the step dimension.
    pub fn step(&self) -> Idx {
        self.vals[0]
    }

    /// Value of a domain dim by name.
    pub fn get(&self, name: &str) -> Result<Idx> {
        let j = self.spec.domain_dim_posn(name)?;
        Ok(self.vals[1 + j])
    }
}

impl fmt::Debug for IndexTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.spec.step_dim(), self.vals[0])?;
        for (j, name) in self.spec.domain_dims().iter().enumerate() {
            write!(f, ", {}={}", name, self.vals[1 + j])?;
        }
        Ok(())
    }
}

/// Per-dim SIMD lane counts fixed at stencil-compile time.
///
/// The product of the lane counts equals the hardware vector width in
/// elements. One domain dim is unit-stride in memory; `first_inner`
/// records whether that is the first domain dim of the tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldShape {
    pts: Indices,
    first_inner: bool,
}

impl FoldShape {
    /// Build a fold shape over domain-dim lane counts.
    pub fn new(pts: Indices, first_inner: bool) -> Self {
        debug_assert!(pts.as_slice().iter().all(|&v| v >= 1));
        Self { pts, first_inner }
    }

    /// Lane count in domain dim `j`.
    #[inline]
    pub fn pts(&self, j: usize) -> Idx {
        self.pts[j]
    }

    /// Lane counts for all domain dims.
    pub fn pts_tuple(&self) -> &Indices {
        &self.pts
    }

    /// Total lanes per vector.
    #[inline]
    pub fn points(&self) -> Idx {
        self.pts.product()
    }

    /// Whether the unit-stride dim is the first domain dim.
    pub fn is_first_inner(&self) -> bool {
        self.first_inner
    }

    /// Visit every point of the fold in memory-layout order.
    ///
    /// The unit-stride dim varies fastest; the callback receives the
    /// per-dim offsets of the point and its visit ordinal. Mask bits
    /// are assigned in this order.
    pub fn visit_points(&self, mut f: impl FnMut(&Indices, usize)) {
        let ndd = self.pts.ndims();
        let mut pt = Indices::splat(0, ndd);
        let total = self.points() as usize;
        for ord in 0..total {
            f(&pt, ord);

            // Advance like an odometer, fastest dim per the layout.
            if self.first_inner {
                for j in 0..ndd {
                    pt[j] += 1;
                    if pt[j] < self.pts[j] {
                        break;
                    }
                    pt[j] = 0;
                }
            } else {
                for j in (0..ndd).rev() {
                    pt[j] += 1;
                    if pt[j] < self.pts[j] {
                        break;
                    }
                    pt[j] = 0;
                }
            }
        }
    }
}

/// Per-dim vector counts evaluated jointly by one cluster call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterShape {
    vecs: Indices,
}

impl ClusterShape {
    pub fn new(vecs: Indices) -> Self {
        debug_assert!(vecs.as_slice().iter().all(|&v| v >= 1));
        Self { vecs }
    }

    /// Vector count in domain dim `j`.
    #[inline]
    pub fn vecs(&self, j: usize) -> Idx {
        self.vecs[j]
    }

    /// Scalar points per cluster in domain dim `j`.
    #[inline]
    pub fn pts(&self, fold: &FoldShape, j: usize) -> Idx {
        self.vecs[j] * fold.pts(j)
    }

    /// Total scalar points per cluster call.
    pub fn points(&self, fold: &FoldShape) -> Idx {
        self.vecs.product() * fold.points()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indices::Indices;

    #[test]
    fn test_dim_posn_lookup() {
        let spec = DimSpec::new("t", &["x", "y"]);
        assert_eq!(spec.domain_dim_posn("y").unwrap(), 1);
        assert!(spec.domain_dim_posn("z").is_err());
        assert_eq!(spec.num_stencil_dims(), 3);
    }

    #[test]
    fn test_index_tuple_by_name() {
        let spec = Arc::new(DimSpec::new("t", &["x"]));
        let tup = IndexTuple::new(spec, Indices::from_slice(&[3, 11]));
        assert_eq!(tup.step(), 3);
        assert_eq!(tup.get("x").unwrap(), 11);
    }

    #[test]
    fn test_fold_visit_order_first_inner() {
        // 2D fold x=2*y=2, x unit-stride: x varies fastest.
        let fold = FoldShape::new(Indices::from_slice(&[2, 2]), true);
        let mut seen = Vec::new();
        fold.visit_points(|pt, ord| seen.push((ord, pt[0], pt[1])));
        assert_eq!(seen, vec![(0, 0, 0), (1, 1, 0), (2, 0, 1), (3, 1, 1)]);
    }

    #[test]
    fn test_fold_visit_order_last_inner() {
        let fold = FoldShape::new(Indices::from_slice(&[2, 2]), false);
        let mut seen = Vec::new();
        fold.visit_points(|pt, ord| seen.push((ord, pt[0], pt[1])));
        assert_eq!(seen, vec![(0, 0, 0), (1, 0, 1), (2, 1, 0), (3, 1, 1)]);
    }

    #[test]
    fn test_cluster_points() {
        let fold = FoldShape::new(Indices::from_slice(&[4, 4]), true);
        let cluster = ClusterShape::new(Indices::from_slice(&[2, 1]));
        assert_eq!(cluster.pts(&fold, 0), 8);
        assert_eq!(cluster.pts(&fold, 1), 4);
        assert_eq!(cluster.points(&fold), 32);
    }
}
