//! Evaluation settings consumed by the engine.

use serde::{Deserialize, Serialize};

use crate::indices::Indices;

/// Knobs threaded from the embedding application down to the kernels.
///
/// Sizes are in stencil-dim tuples (step dim first). Anything the
/// engine does not recognize stays with the outer driver; this struct
/// is the full set the core consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSettings {
    /// Per-dim element strides inside a nano-block.
    pub pico_block_sizes: Indices,
    /// Per-dim tile shape for cache-friendly traversal in a nano-block.
    pub nano_block_tile_sizes: Indices,
    /// Route evaluation through the scalar debug path.
    pub force_scalar: bool,
    /// Cap on the inner-thread count forwarded to kernel calls.
    pub thread_limit: usize,
}

impl EvalSettings {
    /// Defaults for a solution with the given number of stencil dims.
    pub fn for_dims(nsdims: usize) -> Self {
        Self {
            pico_block_sizes: Indices::splat(1, nsdims),
            nano_block_tile_sizes: Indices::splat(0, nsdims),
            force_scalar: false,
            thread_limit: 1,
        }
    }
}

mod indices_serde {
    //! `Indices` serializes as a plain sequence of its entries.

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::idx::Idx;
    use crate::indices::{Indices, MAX_DIMS};

    impl Serialize for Indices {
        fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
            self.as_slice().serialize(ser)
        }
    }

    impl<'de> Deserialize<'de> for Indices {
        fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
            let vals = Vec::<Idx>::deserialize(de)?;
            if vals.len() > MAX_DIMS {
                return Err(D::Error::custom(format!(
                    "too many dims: {} (max {MAX_DIMS})",
                    vals.len()
                )));
            }
            Ok(Indices::from_slice(&vals))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_dim_count() {
        let s = EvalSettings::for_dims(3);
        assert_eq!(s.pico_block_sizes.ndims(), 3);
        assert!(!s.force_scalar);
        assert_eq!(s.thread_limit, 1);
    }
}
