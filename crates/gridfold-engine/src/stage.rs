//! Stages: ordered collections of independent bundles.
//!
//! A stage is the unit at which step enablement is decided and perf
//! is accounted. No computation happens at this layer; it sequences
//! bundles and keeps aggregate counters.

use std::time::{Duration, Instant};

use tracing::debug;

use gridfold_core::{BoundingBox, Idx};

use crate::bundle::{Bundle, BundleId};
use crate::program::StencilCore;

/// Monotonic accumulating timer around stage invocations.
#[derive(Debug, Default)]
pub struct StageTimer {
    accum: Duration,
    started: Option<Instant>,
}

impl StageTimer {
    pub fn start(&mut self) {
        debug_assert!(self.started.is_none(), "timer already running");
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(t0) = self.started.take() {
            self.accum += t0.elapsed();
        }
    }

    /// Total accumulated time across invocations.
    pub fn elapsed(&self) -> Duration {
        self.accum
    }
}

/// An ordered collection of bundles sharing a step predicate.
pub struct Stage {
    name: String,
    /// Bundles in declaration order (may include scratch bundles,
    /// which are driven by their parents and skipped here).
    bundles: Vec<BundleId>,
    /// Non-scratch bundles grouped into dependency levels; bundles in
    /// one level are mutually independent.
    levels: Vec<Vec<BundleId>>,
    /// Union hull of the non-scratch bundle BBs.
    stage_bb: BoundingBox,
    /// Memoized step-enablement query: (step, result).
    last_step_check: Option<(Idx, bool)>,

    pub timer: StageTimer,
    pub steps_done: u64,

    /// Work needed across points in this rank, per step.
    pub num_reads_per_step: Idx,
    pub num_writes_per_step: Idx,
    pub num_fpops_per_step: Idx,
}

impl Stage {
    pub(crate) fn new(
        name: impl Into<String>,
        bundles: Vec<BundleId>,
        levels: Vec<Vec<BundleId>>,
        num_domain_dims: usize,
    ) -> Self {
        Self {
            name: name.into(),
            bundles,
            levels,
            stage_bb: BoundingBox::empty(num_domain_dims),
            last_step_check: None,
            timer: StageTimer::default(),
            steps_done: 0,
            num_reads_per_step: 0,
            num_writes_per_step: 0,
            num_fpops_per_step: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bundles(&self) -> &[BundleId] {
        &self.bundles
    }

    pub fn levels(&self) -> &[Vec<BundleId>] {
        &self.levels
    }

    pub fn stage_bb(&self) -> &BoundingBox {
        &self.stage_bb
    }

    /// Whether step `t` is enabled for this stage.
    ///
    /// All bundles in a stage agree on the step condition (enforced at
    /// construction), so the first non-scratch bundle answers for all;
    /// the result is memoized per step.
    pub fn is_in_valid_step(
        &mut self,
        core: &dyn StencilCore,
        arena: &[Bundle],
        t: Idx,
    ) -> bool {
        if let Some((step, ok)) = self.last_step_check
            && step == t
        {
            return ok;
        }
        let ok = self
            .bundles
            .iter()
            .map(|&b| &arena[b])
            .find(|b| !b.is_scratch())
            .is_some_and(|b| b.is_in_valid_step(core, t));
        self.last_step_check = Some((t, ok));
        ok
    }

    /// Recompute the per-step work figures from the bundle BBs.
    pub fn init_work_stats(&mut self, arena: &[Bundle]) {
        self.num_reads_per_step = 0;
        self.num_writes_per_step = 0;
        self.num_fpops_per_step = 0;
        let ndd = self.stage_bb.begin.ndims();
        self.stage_bb = BoundingBox::empty(ndd);

        for &bid in &self.bundles {
            let b = &arena[bid];
            if b.is_scratch() {
                continue;
            }
            let pts = b.bb_list().num_points();
            self.num_reads_per_step += pts * b.scalar_points_read() as Idx;
            self.num_writes_per_step += pts * b.scalar_points_written() as Idx;
            self.num_fpops_per_step += pts * b.scalar_fp_ops() as Idx;
            self.stage_bb = self.stage_bb.union_hull(b.bundle_bb());
        }
        debug!(
            stage = %self.name,
            reads = self.num_reads_per_step,
            writes = self.num_writes_per_step,
            fpops = self.num_fpops_per_step,
            "work stats"
        );
    }

    pub fn add_steps(&mut self, n: u64) {
        self.steps_done += n;
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("bundles", &self.bundles.len())
            .field("levels", &self.levels.len())
            .field("steps_done", &self.steps_done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_accumulates() {
        let mut t = StageTimer::default();
        t.start();
        t.stop();
        let first = t.elapsed();
        t.start();
        t.stop();
        assert!(t.elapsed() >= first);
    }

    #[test]
    fn test_add_steps() {
        let mut s = Stage::new("s", vec![], vec![], 1);
        s.add_steps(2);
        s.add_steps(1);
        assert_eq!(s.steps_done, 3);
    }
}
