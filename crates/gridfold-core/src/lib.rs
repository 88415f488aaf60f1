//! Gridfold foundation types.
//!
//! Index arithmetic, dimension metadata, scan descriptors, lane masks, and
//! bounding boxes shared by the execution engine and by compiled stencil
//! solutions. Everything here is plain data; evaluation lives in
//! `gridfold-engine`.

pub mod bbox;
pub mod dims;
pub mod error;
pub mod idx;
pub mod indices;
pub mod mask;
pub mod scan;
pub mod settings;

pub use bbox::{BoundingBox, BoundingBoxList};
pub use dims::{ClusterShape, DimSpec, FoldShape, IndexTuple};
pub use error::{Error, Result};
pub use idx::{Idx, div_flr, rem_flr, round_down_flr, round_up_flr};
pub use indices::{Indices, MAX_DIMS};
pub use mask::LaneMask;
pub use scan::ScanIndices;
pub use settings::EvalSettings;
