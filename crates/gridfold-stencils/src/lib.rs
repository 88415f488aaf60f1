//! Compiled stencil solutions.
//!
//! These kernels stand in for the output of the offline stencil
//! compiler: per-bundle scalar, vector, and cluster entry points plus
//! the core data they operate on, registered with the engine at link
//! time. They are written the way the compiler emits them for a
//! portable build: explicit lane loops with the fold shape baked in
//! as constants.
//!
//! Solutions:
//! - [`avg1d`] - 1-D three-point average, fold 4, cluster 2.
//! - [`chain1d`] - two chained 1-D bundles with a dependency edge.
//! - [`avg1d_scratch`] - the same average computed through a
//!   thread-local scratch bundle.
//! - [`diffusion2d`] - 2-D five-point diffusion, fold 4x2.

pub mod avg1d;
pub mod avg1d_scratch;
pub mod chain1d;
pub mod diffusion2d;
pub mod grid;

pub use grid::{PlaneGrid, ScratchPad};
