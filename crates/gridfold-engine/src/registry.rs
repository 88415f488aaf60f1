//! Compiled-solution registry.
//!
//! Solutions emitted by the stencil compiler register themselves at
//! link time via [`linkme::distributed_slice`]; the embedding
//! application looks them up by name and builds a
//! [`SolutionContext`](crate::solution::SolutionContext) for its rank
//! sub-domain.

use linkme::distributed_slice;

use gridfold_core::{Error, Result};

use crate::solution::{RankDomain, SolutionContext};

/// A registered compiled solution.
pub struct SolutionSpec {
    /// Solution name (e.g. "diffusion2d").
    pub name: &'static str,
    /// One-line description for listings.
    pub description: &'static str,
    /// Builds the full context for one rank sub-domain.
    pub build: fn(&RankDomain) -> Result<SolutionContext>,
}

/// All compiled solutions linked into this binary.
#[distributed_slice]
pub static SOLUTIONS: [SolutionSpec];

/// Names of all registered solutions.
pub fn all_names() -> impl Iterator<Item = &'static str> {
    SOLUTIONS.iter().map(|s| s.name)
}

/// Look up a solution by name.
pub fn find(name: &str) -> Option<&'static SolutionSpec> {
    SOLUTIONS.iter().find(|s| s.name == name)
}

/// Build a registered solution for a rank sub-domain.
pub fn build(name: &str, rank: &RankDomain) -> Result<SolutionContext> {
    let spec = find(name).ok_or_else(|| Error::UnknownSolution {
        name: name.to_string(),
    })?;
    (spec.build)(rank)
}
