// crates/trellis-search/src/trace.rs

//! Trace bookkeeping: an arena of immutable trace nodes recording the
//! decisions of the search, with purge (mark-and-compact), best-path
//! extraction, and lattice materialization.
//!
//! A trace node records (predecessor, sibling, output, input, time,
//! unscaled score, arc score, word-end flag). Hypotheses hold the newest
//! node of a recombination point; its sibling chain holds the competing
//! predecessors of the same point (lattice mode only). Traces form a DAG
//! rooted at the sentinel created for the initial state.

use rustc_hash::FxHashMap;

use trellis_core::semiring::PairWeight;
use trellis_core::types::{Label, Score, TimeframeIndex, EPSILON};
use trellis_core::types::{BestPath, BestPathItem};
use trellis_lattice::{Lattice, LatticeArc};

/// Dense handle into the trace arena.
pub type TraceRef = u32;

/// Sentinel for "no trace".
pub const INVALID_TRACE: TraceRef = TraceRef::MAX;

/// One bookkeeping entry.
#[derive(Clone, Copy, Debug)]
pub struct TraceNode {
    pub predecessor: TraceRef,
    pub sibling: TraceRef,
    pub output: Label,
    /// State-sequence label of the arc, or epsilon.
    pub input: Label,
    pub time: TimeframeIndex,
    /// Unscaled path score up to this point.
    pub score: Score,
    /// Weight of the arc that emitted the output.
    pub arc_score: Score,
    pub word_end: bool,
}

/// First-best recording keeps one predecessor per recombination point;
/// lattice recording preserves the competitors as sibling chains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderMode {
    FirstBest,
    Lattice,
}

/// Arena recorder.
pub struct TraceRecorder {
    mode: RecorderMode,
    lattice_beam: Score,
    nodes: Vec<TraceNode>,
    // Purge state: refs notified since purge_begin, relocation table of
    // the last completed purge.
    notified: Vec<TraceRef>,
    relocation: Vec<TraceRef>,
    // Lattice-prune state.
    prune_notified: Vec<TraceRef>,
}

impl TraceRecorder {
    #[must_use]
    pub fn new(mode: RecorderMode, lattice_beam: Score) -> Self {
        Self {
            mode,
            lattice_beam,
            nodes: Vec::new(),
            notified: Vec::new(),
            relocation: Vec::new(),
            prune_notified: Vec::new(),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> RecorderMode {
        self.mode
    }

    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn node(&self, t: TraceRef) -> &TraceNode {
        &self.nodes[t as usize]
    }

    /// Drop everything (start of a new segment).
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.notified.clear();
        self.relocation.clear();
        self.prune_notified.clear();
    }

    /// Allocate a new node. In first-best mode the sibling link is not
    /// recorded. Never returns an invalid ref.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        sibling: TraceRef,
        predecessor: TraceRef,
        output: Label,
        input: Label,
        time: TimeframeIndex,
        score: Score,
        arc_score: Score,
        word_end: bool,
    ) -> TraceRef {
        let sibling = match self.mode {
            RecorderMode::FirstBest => INVALID_TRACE,
            RecorderMode::Lattice => sibling,
        };
        self.nodes.push(TraceNode {
            predecessor,
            sibling,
            output,
            input,
            time,
            score,
            arc_score,
            word_end,
        });
        (self.nodes.len() - 1) as TraceRef
    }

    /// Extend the sibling chain of `head` with a competing predecessor
    /// for the same recombination point. No-op in first-best mode.
    #[allow(clippy::too_many_arguments)]
    pub fn add_alternative(
        &mut self,
        head: TraceRef,
        predecessor: TraceRef,
        output: Label,
        input: Label,
        time: TimeframeIndex,
        score: Score,
        arc_score: Score,
        word_end: bool,
    ) -> TraceRef {
        if self.mode == RecorderMode::FirstBest {
            return INVALID_TRACE;
        }
        let chained = self.nodes[head as usize].sibling;
        self.nodes.push(TraceNode {
            predecessor,
            sibling: chained,
            output,
            input,
            time,
            score,
            arc_score,
            word_end,
        });
        let t = (self.nodes.len() - 1) as TraceRef;
        self.nodes[head as usize].sibling = t;
        t
    }

    // ---- purge: mark and compact ------------------------------------

    /// Start a purge round.
    pub fn purge_begin(&mut self) {
        self.notified.clear();
    }

    /// Declare `t` live.
    pub fn purge_notify(&mut self, t: TraceRef) {
        if t != INVALID_TRACE {
            self.notified.push(t);
        }
    }

    /// Compact the arena to the traces reachable from the notified set
    /// and rebuild all links. Old refs are afterwards resolved through
    /// [`TraceRecorder::relocate`].
    pub fn purge_end(&mut self) {
        let mark = self.reachable(&self.notified.clone());
        let mut relocation = vec![INVALID_TRACE; self.nodes.len()];
        let mut out = 0u32;
        for (i, live) in mark.iter().enumerate() {
            if *live {
                relocation[i] = out;
                out += 1;
            }
        }
        let mut compacted = Vec::with_capacity(out as usize);
        for (i, node) in self.nodes.iter().enumerate() {
            if !mark[i] {
                continue;
            }
            let mut n = *node;
            n.predecessor = remap(&relocation, n.predecessor);
            n.sibling = remap(&relocation, n.sibling);
            compacted.push(n);
        }
        self.nodes = compacted;
        self.relocation = relocation;
        self.notified.clear();
    }

    /// Map a pre-purge ref to its current position (identity when the
    /// last purge kept it, `INVALID_TRACE` when it was dropped).
    #[must_use]
    pub fn relocate(&self, t: TraceRef) -> TraceRef {
        if t == INVALID_TRACE {
            return INVALID_TRACE;
        }
        self.relocation
            .get(t as usize)
            .copied()
            .unwrap_or(INVALID_TRACE)
    }

    fn reachable(&self, roots: &[TraceRef]) -> Vec<bool> {
        let mut mark = vec![false; self.nodes.len()];
        let mut stack: Vec<TraceRef> = roots.to_vec();
        while let Some(t) = stack.pop() {
            if t == INVALID_TRACE || mark[t as usize] {
                continue;
            }
            mark[t as usize] = true;
            let n = &self.nodes[t as usize];
            stack.push(n.predecessor);
            stack.push(n.sibling);
        }
        mark
    }

    // ---- lattice-beam pruning of sibling chains ----------------------

    /// Start a lattice-prune round.
    pub fn prune_begin(&mut self) {
        self.prune_notified.clear();
    }

    /// Declare `t` alive for lattice pruning.
    pub fn prune_notify(&mut self, t: TraceRef) {
        if t != INVALID_TRACE {
            self.prune_notified.push(t);
        }
    }

    /// Unlink sibling-chain entries whose score exceeds the best alive
    /// score at the same time by more than the lattice beam.
    pub fn prune_end(&mut self) {
        if self.mode != RecorderMode::Lattice || self.lattice_beam == Score::INFINITY {
            return;
        }
        let mark = self.reachable(&self.prune_notified.clone());
        let mut best_at: FxHashMap<TimeframeIndex, Score> = FxHashMap::default();
        for (i, node) in self.nodes.iter().enumerate() {
            if mark[i] {
                let e = best_at.entry(node.time).or_insert(Score::INFINITY);
                if node.score < *e {
                    *e = node.score;
                }
            }
        }
        for i in 0..self.nodes.len() {
            if !mark[i] {
                continue;
            }
            // Skip over pruned chain members.
            let mut s = self.nodes[i].sibling;
            while s != INVALID_TRACE {
                let sib = &self.nodes[s as usize];
                let limit = best_at
                    .get(&sib.time)
                    .copied()
                    .unwrap_or(Score::INFINITY)
                    + self.lattice_beam;
                if sib.score <= limit {
                    break;
                }
                s = sib.sibling;
            }
            self.nodes[i].sibling = s;
        }
        self.prune_notified.clear();
    }

    // ---- outputs -----------------------------------------------------

    /// Word sequence along the predecessor chain of `final_trace`.
    #[must_use]
    pub fn create_best_path(&self, final_trace: TraceRef, ignore_last_output: bool) -> BestPath {
        let mut path = BestPath {
            items: Vec::new(),
            score: self.nodes[final_trace as usize].score,
        };
        let mut t = final_trace;
        let mut last_skipped = !ignore_last_output;
        while t != INVALID_TRACE {
            let n = &self.nodes[t as usize];
            if n.output != EPSILON && n.word_end {
                if last_skipped {
                    path.items.push(BestPathItem {
                        time: n.time,
                        label: n.output,
                    });
                } else {
                    last_skipped = true;
                }
            }
            t = n.predecessor;
        }
        path.items.reverse();
        path
    }

    /// Materialize the trace DAG reachable from `final_trace` as a
    /// lattice. Each recombination point (a chain head) becomes one
    /// state; every chain member contributes one arc from its
    /// predecessor's state, with the pair weight split so that
    /// `am + lm` equals the score delta along the arc and `lm` equals
    /// the stored arc score.
    #[must_use]
    pub fn create_lattice(&self, final_trace: TraceRef) -> Lattice {
        let mut lattice = Lattice::new();
        if final_trace == INVALID_TRACE {
            return lattice;
        }
        let mut state_of: FxHashMap<TraceRef, u32> = FxHashMap::default();
        let mut stack = vec![final_trace];
        let final_state = {
            let s = lattice.add_state();
            state_of.insert(final_trace, s);
            s
        };
        lattice.set_final(final_state, PairWeight::one());
        lattice.set_word_boundary(final_state, self.nodes[final_trace as usize].time);

        while let Some(head) = stack.pop() {
            let head_state = state_of[&head];
            // The head and its sibling chain are the competing arcs into
            // this recombination point.
            let mut member = head;
            while member != INVALID_TRACE {
                let node = self.nodes[member as usize];
                let pred = node.predecessor;
                if pred == INVALID_TRACE {
                    // Root sentinel: this point is the lattice start.
                    lattice.set_initial(head_state);
                    member = node.sibling;
                    continue;
                }
                let pred_state = match state_of.get(&pred) {
                    Some(&s) => s,
                    None => {
                        let s = lattice.add_state();
                        state_of.insert(pred, s);
                        lattice.set_word_boundary(s, self.nodes[pred as usize].time);
                        stack.push(pred);
                        s
                    }
                };
                let combined = node.score - self.nodes[pred as usize].score;
                let lm = node.arc_score;
                lattice.add_arc(
                    pred_state,
                    LatticeArc {
                        input: node.input,
                        output: node.output,
                        weight: PairWeight::new(combined - lm, lm),
                        target: head_state,
                    },
                );
                member = node.sibling;
            }
        }
        lattice
    }
}

#[inline]
fn remap(relocation: &[TraceRef], t: TraceRef) -> TraceRef {
    if t == INVALID_TRACE {
        INVALID_TRACE
    } else {
        relocation[t as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(rec: &mut TraceRecorder) -> TraceRef {
        let root = rec.add(INVALID_TRACE, INVALID_TRACE, EPSILON, EPSILON, 0, 0.0, 0.0, true);
        let w1 = rec.add(INVALID_TRACE, root, 5, 1, 3, 1.5, 0.5, true);
        rec.add(INVALID_TRACE, w1, 6, 2, 6, 3.0, 1.0, true)
    }

    #[test]
    fn best_path_walks_predecessors() {
        let mut rec = TraceRecorder::new(RecorderMode::FirstBest, Score::INFINITY);
        let end = chain(&mut rec);
        let path = rec.create_best_path(end, false);
        assert_eq!(path.score, 3.0);
        assert_eq!(
            path.items,
            vec![
                BestPathItem { time: 3, label: 5 },
                BestPathItem { time: 6, label: 6 }
            ]
        );
    }

    #[test]
    fn ignore_last_output_drops_newest_word() {
        let mut rec = TraceRecorder::new(RecorderMode::FirstBest, Score::INFINITY);
        let end = chain(&mut rec);
        let path = rec.create_best_path(end, true);
        assert_eq!(path.items, vec![BestPathItem { time: 3, label: 5 }]);
    }

    #[test]
    fn purge_keeps_best_path_identical() {
        let mut rec = TraceRecorder::new(RecorderMode::FirstBest, Score::INFINITY);
        // A dead branch that purge should drop.
        let dead = rec.add(INVALID_TRACE, INVALID_TRACE, 9, 9, 1, 9.0, 0.0, true);
        let _ = dead;
        let end = chain(&mut rec);
        let before = rec.create_best_path(end, false);
        rec.purge_begin();
        rec.purge_notify(end);
        rec.purge_end();
        let end2 = rec.relocate(end);
        assert_ne!(end2, INVALID_TRACE);
        assert_eq!(rec.n_nodes(), 3);
        let after = rec.create_best_path(end2, false);
        assert_eq!(before, after);
        assert_eq!(rec.relocate(dead), INVALID_TRACE);
    }

    #[test]
    fn purge_is_idempotent_between_beginnings() {
        let mut rec = TraceRecorder::new(RecorderMode::FirstBest, Score::INFINITY);
        let end = chain(&mut rec);
        rec.purge_begin();
        rec.purge_notify(end);
        rec.purge_end();
        let end1 = rec.relocate(end);
        let n1 = rec.n_nodes();
        rec.purge_begin();
        rec.purge_notify(end1);
        rec.purge_end();
        let end2 = rec.relocate(end1);
        assert_eq!(rec.n_nodes(), n1);
        assert_eq!(
            rec.create_best_path(end2, false),
            rec.create_best_path(end1, false)
        );
    }

    #[test]
    fn sibling_chains_become_parallel_arcs() {
        let mut rec = TraceRecorder::new(RecorderMode::Lattice, Score::INFINITY);
        let root = rec.add(INVALID_TRACE, INVALID_TRACE, EPSILON, EPSILON, 0, 0.0, 0.0, true);
        // Two competing arcs into the same point: first the worse one,
        // then the better one with the worse as sibling.
        let worse = rec.add(INVALID_TRACE, root, 8, 2, 4, 2.0, 1.0, true);
        let head = rec.add(worse, root, 7, 1, 4, 1.0, 0.5, true);
        let lattice = rec.create_lattice(head);
        assert_eq!(lattice.num_states(), 2);
        assert_eq!(lattice.num_arcs(), 2);
        // Pair weights reconstruct the score deltas.
        let arcs = &lattice.state(lattice.initial()).arcs;
        for a in arcs {
            let n = if a.output == 7 { (1.0, 0.5) } else { (2.0, 1.0) };
            assert!((a.weight.combined() - n.0).abs() < 1e-6);
            assert!((a.weight.lm - n.1).abs() < 1e-6);
        }
    }

    #[test]
    fn first_best_mode_drops_sibling_links() {
        let mut rec = TraceRecorder::new(RecorderMode::FirstBest, Score::INFINITY);
        let root = rec.add(INVALID_TRACE, INVALID_TRACE, EPSILON, EPSILON, 0, 0.0, 0.0, true);
        let t = rec.add(root, root, 3, 1, 1, 1.0, 0.0, true);
        assert_eq!(rec.node(t).sibling, INVALID_TRACE);
    }

    #[test]
    fn lattice_prune_unlinks_bad_siblings() {
        let mut rec = TraceRecorder::new(RecorderMode::Lattice, 1.5);
        let root = rec.add(INVALID_TRACE, INVALID_TRACE, EPSILON, EPSILON, 0, 0.0, 0.0, true);
        let bad = rec.add(INVALID_TRACE, root, 8, 2, 4, 9.0, 1.0, true);
        let head = rec.add(bad, root, 7, 1, 4, 1.0, 0.5, true);
        rec.prune_begin();
        rec.prune_notify(head);
        rec.prune_end();
        assert_eq!(rec.node(head).sibling, INVALID_TRACE);
        let lattice = rec.create_lattice(head);
        assert_eq!(lattice.num_arcs(), 1);
    }
}
