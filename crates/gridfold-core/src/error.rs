//! Engine errors.
//!
//! Failures surface as a single error carrying the stage or bundle name
//! and the offending index range where available. Evaluation does not
//! retry: an error aborts the current step and the embedding driver
//! decides whether the process terminates.

use thiserror::Error;

use crate::idx::Idx;

/// Engine result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the execution engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Indices handed to normalization were not fold-aligned.
    #[error("bundle '{bundle}': index {value} in dim {dim} is not a multiple of fold length {fold}")]
    MisalignedIndices {
        bundle: String,
        dim: usize,
        value: Idx,
        fold: Idx,
    },

    /// The masked-vector border path was reached in a scalar build
    /// (total cluster points == 1).
    #[error("bundle '{bundle}': vector border code not expected with cluster size 1")]
    ScalarClusterBorder { bundle: String },

    /// A dimension name is not part of the solution's dim spec.
    #[error("unknown dimension: {dim}")]
    UnknownDim { dim: String },

    /// Fold lane product disagrees with the compiled solution.
    #[error("solution '{solution}': fold product {actual} does not match declared width {declared}")]
    FoldMismatch {
        solution: String,
        declared: Idx,
        actual: Idx,
    },

    /// A bundle's BB list violates the disjoint-inside-hull invariant.
    #[error("bundle '{bundle}': bounding-box list is not a disjoint decomposition of the hull")]
    InconsistentBoundingBox { bundle: String },

    /// Scratch-span expansion was given non-fold-aligned indices.
    #[error("scratch bundle '{bundle}': span {range} is not fold-aligned in dim {dim}")]
    ScratchSpanMisaligned {
        bundle: String,
        dim: usize,
        range: String,
    },

    /// Bundles with different step predicates were placed in one stage.
    #[error("stage '{stage}': bundles '{first}' and '{second}' carry different step conditions")]
    MixedStepConditions {
        stage: String,
        first: String,
        second: String,
    },

    /// A stage holds no non-scratch bundle.
    #[error("stage '{stage}': no non-scratch bundle")]
    MissingNonScratch { stage: String },

    /// Bundle dependency edges form a cycle.
    #[error("stage '{stage}': dependency cycle involving {bundles:?}")]
    DependencyCycle {
        stage: String,
        bundles: Vec<String>,
    },

    /// A solution name was not found in the registry.
    #[error("unknown solution: {name}")]
    UnknownSolution { name: String },
}
