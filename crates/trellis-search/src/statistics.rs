// crates/trellis-search/src/statistics.rs

//! Per-decoder search statistics.
//!
//! Counters are owned by the search-space instance (no process-wide
//! state), aggregated per frame and logged at segment end.

use tracing::info;

/// Min/max/mean aggregate over per-frame counts.
#[derive(Clone, Copy, Debug)]
pub struct Aggregate {
    min: u64,
    max: u64,
    sum: u64,
    n: u64,
}

impl Default for Aggregate {
    fn default() -> Self {
        Self {
            min: u64::MAX,
            max: 0,
            sum: 0,
            n: 0,
        }
    }
}

impl Aggregate {
    /// Record one observation.
    pub fn add(&mut self, v: u64) {
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.sum += v;
        self.n += 1;
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.sum as f64 / self.n as f64
        }
    }

    #[must_use]
    pub const fn max(&self) -> u64 {
        self.max
    }

    #[must_use]
    pub fn min(&self) -> u64 {
        if self.n == 0 {
            0
        } else {
            self.min
        }
    }

    #[must_use]
    pub const fn count(&self) -> u64 {
        self.n
    }
}

/// Aggregated per-segment search statistics.
#[derive(Clone, Debug, Default)]
pub struct SearchStatistics {
    pub frames: u32,
    pub hmm_hyps_before_pruning: Aggregate,
    pub hmm_hyps_after_pruning: Aggregate,
    pub arc_hyps_after_pruning: Aggregate,
    pub state_hyps: Aggregate,
    pub trace_nodes: Aggregate,
    pub purges: u32,
}

impl SearchStatistics {
    /// Reset for a new segment.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Emit the segment summary on the statistics channel.
    pub fn log(&self) {
        info!(
            frames = self.frames,
            hmm_hyps_before_avg = self.hmm_hyps_before_pruning.mean(),
            hmm_hyps_after_avg = self.hmm_hyps_after_pruning.mean(),
            hmm_hyps_after_max = self.hmm_hyps_after_pruning.max(),
            arc_hyps_avg = self.arc_hyps_after_pruning.mean(),
            state_hyps_avg = self.state_hyps.mean(),
            trace_nodes_max = self.trace_nodes.max(),
            purges = self.purges,
            "search statistics"
        );
    }
}
