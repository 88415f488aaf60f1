//! The interface to stencil-compiler output.
//!
//! For each bundle the compiler emits a static descriptor and a small
//! closed set of entry points. The engine never inspects the solution
//! state those entry points operate on; it holds it as an opaque
//! [`StencilCore`] and passes it back down on every call.

use std::any::Any;

use gridfold_core::{Idx, Indices, LaneMask, ScanIndices};

/// Opaque per-solution state emitted by the stencil compiler.
///
/// Holds the grid storage and any constants the kernels need. Kernel
/// entry points downcast via [`StencilCore::as_any`] to their concrete
/// type; the engine itself never looks inside.
///
/// Grid writes happen through `&self`: concurrent invocations are
/// handed disjoint output ranges by the decomposition upstream, and
/// violating that partition is outside the evaluation contract.
pub trait StencilCore: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Pointwise sub-domain predicate.
pub type DomainFn = fn(&dyn StencilCore, &Indices) -> bool;

/// Step-enablement predicate.
pub type StepFn = fn(&dyn StencilCore, Idx) -> bool;

/// Maps an input step index to the output step plane written, if the
/// bundle touches a step dimension.
pub type OutputStepFn = fn(Idx) -> Option<Idx>;

/// One scalar point: `(core, scratch_slot, indices)`.
pub type ScalarFn = fn(&dyn StencilCore, usize, &Indices);

/// A normalized vector sub-range with per-lane mask:
/// `(core, outer_t, inner_t, thread_limit, norm_idxs, mask)`.
/// [`LaneMask::FULL`] means unmasked full vectors.
pub type VectorsFn = fn(&dyn StencilCore, usize, usize, usize, &ScanIndices, LaneMask);

/// A normalized fully-aligned cluster sub-range:
/// `(core, outer_t, inner_t, thread_limit, norm_idxs)`.
pub type ClustersFn = fn(&dyn StencilCore, usize, usize, usize, &ScanIndices);

/// Re-anchors a scratch bundle's thread-local storage to a widened
/// rank-relative span: `(core, outer_t, span)`.
pub type RebaseScratchFn = fn(&dyn StencilCore, usize, &ScanIndices);

/// Static descriptor plus entry points for one compiled bundle.
///
/// The set is small and closed, so it is a plain table of function
/// pointers rather than a trait object per bundle.
pub struct BundleProgram {
    /// Bundle name, unique within a solution.
    pub name: &'static str,
    /// Estimated FP ops per scalar evaluation.
    pub scalar_fp_ops: usize,
    /// Points read per scalar evaluation.
    pub scalar_points_read: usize,
    /// Points written per scalar evaluation.
    pub scalar_points_written: usize,
    /// Whether the bundle updates scratch vars.
    pub is_scratch: bool,
    /// Human-readable sub-domain condition, if any.
    pub sub_domain_descr: Option<&'static str>,
    /// Human-readable step condition, if any.
    pub step_cond_descr: Option<&'static str>,

    pub is_in_valid_domain: DomainFn,
    pub is_in_valid_step: StepFn,
    pub output_step_index: OutputStepFn,
    pub calc_scalar: ScalarFn,
    pub calc_vectors: VectorsFn,
    pub calc_clusters: ClustersFn,
    /// Present only on scratch bundles with thread-local storage.
    pub rebase_scratch: Option<RebaseScratchFn>,
}

impl BundleProgram {
    /// True if the bundle carries a non-default sub-domain condition.
    pub fn is_sub_domain_expr(&self) -> bool {
        self.sub_domain_descr.is_some()
    }

    /// True if the bundle carries a non-default step condition.
    pub fn is_step_cond_expr(&self) -> bool {
        self.step_cond_descr.is_some()
    }

    /// Description of the sub-domain condition.
    pub fn domain_description(&self) -> &'static str {
        self.sub_domain_descr.unwrap_or("all points")
    }

    /// Description of the step condition.
    pub fn step_cond_description(&self) -> &'static str {
        self.step_cond_descr.unwrap_or("all steps")
    }
}

impl std::fmt::Debug for BundleProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleProgram")
            .field("name", &self.name)
            .field("is_scratch", &self.is_scratch)
            .field("sub_domain", &self.domain_description())
            .field("step_cond", &self.step_cond_description())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    //! A core that records every kernel call, for decomposition tests.

    use std::sync::Mutex;

    use gridfold_core::Idx;

    use super::*;

    /// One recorded kernel invocation.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum KernelCall {
        Scalar {
            slot: usize,
            idxs: Vec<Idx>,
        },
        Vectors {
            begin: Vec<Idx>,
            end: Vec<Idx>,
            mask: u64,
        },
        Clusters {
            begin: Vec<Idx>,
            end: Vec<Idx>,
        },
    }

    /// Core state that logs calls instead of computing.
    #[derive(Default)]
    pub struct RecordingCore {
        pub calls: Mutex<Vec<KernelCall>>,
        /// Optional sub-domain predicate for BB tests.
        pub valid: Option<Box<dyn Fn(&Indices) -> bool + Send + Sync>>,
        /// Optional step predicate.
        pub step_ok: Option<fn(Idx) -> bool>,
    }

    impl RecordingCore {
        pub fn take_calls(&self) -> Vec<KernelCall> {
            std::mem::take(&mut self.calls.lock().unwrap())
        }
    }

    impl StencilCore for RecordingCore {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn rec(core: &dyn StencilCore) -> &RecordingCore {
        core.as_any().downcast_ref::<RecordingCore>().unwrap()
    }

    fn rec_scalar(core: &dyn StencilCore, slot: usize, idxs: &Indices) {
        rec(core).calls.lock().unwrap().push(KernelCall::Scalar {
            slot,
            idxs: idxs.as_slice().to_vec(),
        });
    }

    fn rec_vectors(
        core: &dyn StencilCore,
        _outer_t: usize,
        _inner_t: usize,
        _thread_limit: usize,
        idxs: &ScanIndices,
        mask: LaneMask,
    ) {
        rec(core).calls.lock().unwrap().push(KernelCall::Vectors {
            begin: idxs.begin.as_slice().to_vec(),
            end: idxs.end.as_slice().to_vec(),
            mask: mask.0,
        });
    }

    fn rec_clusters(
        core: &dyn StencilCore,
        _outer_t: usize,
        _inner_t: usize,
        _thread_limit: usize,
        idxs: &ScanIndices,
    ) {
        rec(core).calls.lock().unwrap().push(KernelCall::Clusters {
            begin: idxs.begin.as_slice().to_vec(),
            end: idxs.end.as_slice().to_vec(),
        });
    }

    fn rec_domain(core: &dyn StencilCore, idxs: &Indices) -> bool {
        match &rec(core).valid {
            Some(f) => f(idxs),
            None => true,
        }
    }

    fn rec_step(core: &dyn StencilCore, t: Idx) -> bool {
        match rec(core).step_ok {
            Some(f) => f(t),
            None => true,
        }
    }

    /// A program whose kernels log into a [`RecordingCore`].
    pub fn recording_program(name: &'static str, is_scratch: bool) -> BundleProgram {
        BundleProgram {
            name,
            scalar_fp_ops: 1,
            scalar_points_read: 1,
            scalar_points_written: 1,
            is_scratch,
            sub_domain_descr: None,
            step_cond_descr: None,
            is_in_valid_domain: rec_domain,
            is_in_valid_step: rec_step,
            output_step_index: |t| Some(t + 1),
            calc_scalar: rec_scalar,
            calc_vectors: rec_vectors,
            calc_clusters: rec_clusters,
            rebase_scratch: None,
        }
    }
}
