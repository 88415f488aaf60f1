//! Gridfold execution engine.
//!
//! Evaluates compiled stencil update rules (bundles) over a rank-local
//! sub-region of the problem domain. The pipeline, outermost first:
//!
//! 1. **Stage** - ordered bundles sharing a step predicate.
//! 2. **Bundle** - one update rule with dependency edges, bounding
//!    boxes, and scratch children.
//! 3. **Micro-block driver** - trims a micro-block to the bundle's
//!    valid boxes and fans out scratch evaluation before the bundle.
//! 4. **Nano-block engine** - decomposes a rectilinear sub-region into
//!    full-cluster, full-vector, and masked partial-vector parts.
//! 5. **Kernel dispatch** - the `calc_clusters` / `calc_vectors` /
//!    `calc_scalar` entry points supplied per bundle by the stencil
//!    compiler.
//!
//! The engine owns no numeric storage: grid data lives inside the
//! compiled solution's [`StencilCore`] and is only reached through the
//! kernel function tables.

pub mod bundle;
pub mod nano;
pub mod program;
pub mod registry;
pub mod solution;
pub mod stage;
pub mod vars;

pub use bundle::{Bundle, BundleId};
pub use program::{BundleProgram, StencilCore};
pub use registry::{SOLUTIONS, SolutionSpec};
pub use solution::{RankDomain, SolutionContext};
pub use stage::{Stage, StageTimer};
pub use vars::{DirtyScope, VarId, VarInfo};
