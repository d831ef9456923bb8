// crates/trellis-lattice/src/lattice.rs

//! The lattice structure: an acyclic WFSN whose arcs carry the
//! (am, lm) pair weight and whose states carry an optional
//! word-boundary time.

use serde::{Deserialize, Serialize};

use trellis_core::semiring::PairWeight;
use trellis_core::types::{
    Label, OutputType, Score, StateId, TimeframeIndex, INVALID_STATE, INVALID_TIME,
};

/// One lattice arc. The input label references a state sequence (or
/// epsilon); the output label references a lemma or lemma pronunciation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatticeArc {
    /// State-sequence label, or epsilon.
    pub input: Label,
    /// Word-level output label.
    pub output: Label,
    /// Acoustic and language-model cost.
    pub weight: PairWeight,
    /// Target state.
    pub target: StateId,
}

/// One lattice state: outgoing arcs and an optional final weight.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LatticeState {
    /// Outgoing arcs in creation order.
    pub arcs: Vec<LatticeArc>,
    /// Final weight, if this state is final.
    pub final_weight: Option<PairWeight>,
}

/// Acyclic pair-weight lattice with word-boundary times.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    states: Vec<LatticeState>,
    initial: StateId,
    word_boundaries: Vec<TimeframeIndex>,
    output_type: OutputType,
}

impl Lattice {
    /// Empty lattice without states.
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: Vec::new(),
            initial: INVALID_STATE,
            word_boundaries: Vec::new(),
            output_type: OutputType::default(),
        }
    }

    /// Add a state; returns its id.
    pub fn add_state(&mut self) -> StateId {
        self.states.push(LatticeState::default());
        (self.states.len() - 1) as StateId
    }

    /// Add an arc `from → arc.target`.
    pub fn add_arc(&mut self, from: StateId, arc: LatticeArc) {
        self.states[from as usize].arcs.push(arc);
    }

    /// Mark `state` final with the given weight.
    pub fn set_final(&mut self, state: StateId, weight: PairWeight) {
        self.states[state as usize].final_weight = Some(weight);
    }

    /// Set the initial state.
    pub fn set_initial(&mut self, state: StateId) {
        self.initial = state;
    }

    /// Record the word-boundary time of `state`.
    pub fn set_word_boundary(&mut self, state: StateId, time: TimeframeIndex) {
        let s = state as usize;
        if s >= self.word_boundaries.len() {
            self.word_boundaries.resize(s + 1, INVALID_TIME);
        }
        self.word_boundaries[s] = time;
    }

    /// Word-boundary time of `state`, if recorded.
    #[must_use]
    pub fn word_boundary(&self, state: StateId) -> TimeframeIndex {
        self.word_boundaries
            .get(state as usize)
            .copied()
            .unwrap_or(INVALID_TIME)
    }

    /// The initial state, or `INVALID_STATE` for an empty lattice.
    #[must_use]
    pub fn initial(&self) -> StateId {
        self.initial
    }

    /// Whether the lattice has no states.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty() || self.initial == INVALID_STATE
    }

    /// Number of states.
    #[must_use]
    pub fn num_states(&self) -> u32 {
        self.states.len() as u32
    }

    /// Number of arcs.
    #[must_use]
    pub fn num_arcs(&self) -> usize {
        self.states.iter().map(|s| s.arcs.len()).sum()
    }

    /// State accessor.
    #[must_use]
    pub fn state(&self, id: StateId) -> &LatticeState {
        &self.states[id as usize]
    }

    /// Mutable state accessor.
    pub fn state_mut(&mut self, id: StateId) -> &mut LatticeState {
        &mut self.states[id as usize]
    }

    /// All states.
    #[must_use]
    pub fn states(&self) -> &[LatticeState] {
        &self.states
    }

    /// Which alphabet the output labels refer to.
    #[must_use]
    pub const fn output_type(&self) -> OutputType {
        self.output_type
    }

    /// Set the output alphabet kind.
    pub fn set_output_type(&mut self, t: OutputType) {
        self.output_type = t;
    }

    /// States in chronological order (boundary time first, ids breaking
    /// ties), restricted to a topological order: a state is emitted only
    /// after all its predecessors, so epsilon arcs between states of the
    /// same boundary time keep source before target.
    #[must_use]
    pub fn chronological_order(&self) -> Vec<StateId> {
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        let n = self.states.len();
        let mut in_degree = vec![0u32; n];
        for state in &self.states {
            for a in &state.arcs {
                in_degree[a.target as usize] += 1;
            }
        }
        let mut ready = BinaryHeap::new();
        for s in 0..n as StateId {
            if in_degree[s as usize] == 0 {
                ready.push(Reverse((self.word_boundary(s), s)));
            }
        }
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse((_, s))) = ready.pop() {
            order.push(s);
            for a in &self.states[s as usize].arcs {
                let t = a.target as usize;
                in_degree[t] -= 1;
                if in_degree[t] == 0 {
                    ready.push(Reverse((self.word_boundary(a.target), a.target)));
                }
            }
        }
        if order.len() < n {
            // Cycles violate the lattice invariants; keep the output
            // total anyway.
            let mut rest: Vec<StateId> =
                (0..n as StateId).filter(|s| !order.contains(s)).collect();
            rest.sort_by_key(|&s| (self.word_boundary(s), s));
            order.extend(rest);
        }
        order
    }

    /// Tropical forward scores (combined am+lm) from the initial state.
    #[must_use]
    pub fn forward_scores(&self, order: &[StateId]) -> Vec<Score> {
        let mut fwd = vec![Score::INFINITY; self.states.len()];
        if self.is_empty() {
            return fwd;
        }
        fwd[self.initial as usize] = 0.0;
        for &s in order {
            let base = fwd[s as usize];
            if base == Score::INFINITY {
                continue;
            }
            for a in &self.states[s as usize].arcs {
                let t = a.target as usize;
                let score = base + a.weight.combined();
                if score < fwd[t] {
                    fwd[t] = score;
                }
            }
        }
        fwd
    }

    /// Tropical backward scores (combined am+lm) towards the finals.
    #[must_use]
    pub fn backward_scores(&self, order: &[StateId]) -> Vec<Score> {
        let mut bwd = vec![Score::INFINITY; self.states.len()];
        for &s in order.iter().rev() {
            let state = &self.states[s as usize];
            if let Some(f) = state.final_weight {
                bwd[s as usize] = f.combined();
            }
            for a in &state.arcs {
                let score = a.weight.combined() + bwd[a.target as usize];
                if score < bwd[s as usize] {
                    bwd[s as usize] = score;
                }
            }
        }
        bwd
    }

    /// Best (lowest combined cost) complete path cost, if any.
    #[must_use]
    pub fn best_cost(&self) -> Option<Score> {
        if self.is_empty() {
            return None;
        }
        let order = self.chronological_order();
        let bwd = self.backward_scores(&order);
        let c = bwd[self.initial as usize];
        (c != Score::INFINITY).then_some(c)
    }

    /// Prune states and arcs whose best complete path exceeds the best
    /// cost by more than `threshold` (combined weight). States become
    /// disconnected rather than renumbered; arcs are removed.
    pub fn prune(&mut self, threshold: Score) {
        if self.is_empty() {
            return;
        }
        let order = self.chronological_order();
        let fwd = self.forward_scores(&order);
        let bwd = self.backward_scores(&order);
        let best = bwd[self.initial as usize];
        if best == Score::INFINITY {
            return;
        }
        let limit = best + threshold;
        for (s, state) in self.states.iter_mut().enumerate() {
            state.arcs.retain(|a| {
                fwd[s] + a.weight.combined() + bwd[a.target as usize] <= limit
            });
            if let Some(f) = state.final_weight {
                if fwd[s] + f.combined() > limit {
                    state.final_weight = None;
                }
            }
        }
    }

    /// Number of complete paths, saturating at `u64::MAX`.
    #[must_use]
    pub fn n_paths(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        let order = self.chronological_order();
        let mut paths = vec![0u64; self.states.len()];
        for &s in order.iter().rev() {
            let state = &self.states[s as usize];
            let mut n = u64::from(state.final_weight.is_some());
            for a in &state.arcs {
                n = n.saturating_add(paths[a.target as usize]);
            }
            paths[s as usize] = n;
        }
        paths[self.initial as usize]
    }

    /// Repeatedly tighten a geometric pruning threshold until the path
    /// count falls below `max_paths`. Returns the applied threshold.
    pub fn prune_to_path_count(&mut self, initial_threshold: Score, factor: f32, max_paths: u64) -> Score {
        let mut threshold = initial_threshold;
        while self.n_paths() > max_paths && threshold > 1e-3 {
            self.prune(threshold);
            threshold *= factor;
        }
        threshold
    }

    /// Best path as (output labels with boundary times, total cost).
    #[must_use]
    pub fn best_path(&self) -> Option<(Vec<(TimeframeIndex, Label)>, Score)> {
        if self.is_empty() {
            return None;
        }
        let order = self.chronological_order();
        let bwd = self.backward_scores(&order);
        let total = bwd[self.initial as usize];
        if total == Score::INFINITY {
            return None;
        }
        let mut items = Vec::new();
        let mut s = self.initial;
        loop {
            let state = &self.states[s as usize];
            if let Some(f) = state.final_weight {
                if (f.combined() - bwd[s as usize]).abs() <= 1e-4 {
                    break;
                }
            }
            let mut chosen: Option<&LatticeArc> = None;
            for a in &state.arcs {
                let rest = a.weight.combined() + bwd[a.target as usize];
                if (rest - bwd[s as usize]).abs() <= 1e-4 {
                    chosen = Some(a);
                    break;
                }
            }
            let a = chosen?;
            if a.output != trellis_core::types::EPSILON {
                items.push((self.word_boundary(a.target), a.output));
            }
            s = a.target;
        }
        Some((items, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::types::EPSILON;

    /// Diamond lattice: 0 -a-> 1 -c-> 3, 0 -b-> 2 -d-> 3.
    pub(crate) fn diamond() -> Lattice {
        let mut l = Lattice::new();
        let s0 = l.add_state();
        let s1 = l.add_state();
        let s2 = l.add_state();
        let s3 = l.add_state();
        l.set_initial(s0);
        l.set_final(s3, PairWeight::one());
        l.set_word_boundary(s0, 0);
        l.set_word_boundary(s1, 3);
        l.set_word_boundary(s2, 3);
        l.set_word_boundary(s3, 6);
        l.add_arc(s0, LatticeArc { input: 1, output: 10, weight: PairWeight::new(1.0, 0.5), target: s1 });
        l.add_arc(s0, LatticeArc { input: 2, output: 11, weight: PairWeight::new(2.0, 0.5), target: s2 });
        l.add_arc(s1, LatticeArc { input: 3, output: 12, weight: PairWeight::new(1.0, 1.0), target: s3 });
        l.add_arc(s2, LatticeArc { input: 4, output: 13, weight: PairWeight::new(0.5, 1.0), target: s3 });
        l
    }

    #[test]
    fn forward_backward_consistent() {
        let l = diamond();
        let order = l.chronological_order();
        let fwd = l.forward_scores(&order);
        let bwd = l.backward_scores(&order);
        assert!((fwd[3] - 3.5).abs() < 1e-6);
        assert!((bwd[0] - 3.5).abs() < 1e-6);
        assert_eq!(l.best_cost(), Some(3.5));
    }

    #[test]
    fn n_paths_counts_both_branches() {
        let l = diamond();
        assert_eq!(l.n_paths(), 2);
    }

    #[test]
    fn prune_drops_worse_branch() {
        let mut l = diamond();
        l.prune(0.25);
        assert_eq!(l.n_paths(), 1);
        let (items, cost) = l.best_path().unwrap();
        assert!((cost - 3.5).abs() < 1e-6);
        assert_eq!(items, vec![(3, 10), (6, 12)]);
    }

    #[test]
    fn best_path_skips_epsilon_outputs() {
        let mut l = Lattice::new();
        let s0 = l.add_state();
        let s1 = l.add_state();
        l.set_initial(s0);
        l.set_final(s1, PairWeight::one());
        l.set_word_boundary(s1, 2);
        l.add_arc(s0, LatticeArc { input: 1, output: EPSILON, weight: PairWeight::new(1.0, 0.0), target: s1 });
        let (items, _) = l.best_path().unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn empty_lattice_has_no_paths() {
        let l = Lattice::new();
        assert!(l.is_empty());
        assert_eq!(l.n_paths(), 0);
        assert!(l.best_path().is_none());
    }
}
