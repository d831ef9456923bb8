// crates/trellis-lookahead/src/table.rs

//! Dense and sparse look-ahead tables.
//!
//! Both map a look-ahead node id to the minimum remaining LM cost over
//! the word ends of its subtree. The dense variant is a flat array
//! filled bottom-up; the sparse variant is an open-addressing hash with
//! a background score for absent keys, chosen when few nodes carry a
//! non-trivial score.

use trellis_core::lm::{History, LanguageModel};
use trellis_core::types::Score;

use crate::structure::{LookaheadStructure, INVALID_NODE};

/// Per-history look-ahead table.
#[derive(Clone, Debug)]
pub enum Table {
    Dense(Vec<Score>),
    Sparse(SparseTable),
}

impl Table {
    /// Look-ahead score of `node`.
    #[inline]
    #[must_use]
    pub fn score(&self, node: u32) -> Score {
        match self {
            Self::Dense(v) => v.get(node as usize).copied().unwrap_or(Score::INFINITY),
            Self::Sparse(t) => t.score(node),
        }
    }

    /// Whether this is the sparse representation.
    #[must_use]
    pub const fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }
}

/// Open-addressing hash from node id to score with a background value.
#[derive(Clone, Debug)]
pub struct SparseTable {
    keys: Vec<u32>,
    values: Vec<Score>,
    mask: usize,
    len: usize,
    resize_at: usize,
    resize_at_fill: f32,
    background: Score,
    /// Number of grow operations performed.
    pub resizes: u32,
}

const EMPTY_KEY: u32 = u32::MAX;

#[inline]
fn slot_hash(key: u32) -> usize {
    // Multiplicative mixing; the mask reduction follows.
    (key.wrapping_mul(0x9e37_79b9)) as usize
}

impl SparseTable {
    /// Sized for `expected` entries scaled by `size_factor`, growing at
    /// `resize_at_fill` occupancy. Absent keys score `background`.
    #[must_use]
    pub fn new(expected: usize, size_factor: f32, resize_at_fill: f32, background: Score) -> Self {
        let want = ((expected.max(1) as f32) * size_factor).ceil() as usize;
        let capacity = want.next_power_of_two().max(8);
        Self {
            keys: vec![EMPTY_KEY; capacity],
            values: vec![0.0; capacity],
            mask: capacity - 1,
            len: 0,
            resize_at: ((capacity as f32) * resize_at_fill) as usize,
            resize_at_fill,
            background,
            resizes: 0,
        }
    }

    /// Background (unigram-backoff) score for absent nodes.
    #[must_use]
    pub const fn background(&self) -> Score {
        self.background
    }

    /// Number of explicit entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or update the score of `node` (minimum wins).
    pub fn insert(&mut self, node: u32, score: Score) {
        if self.len + 1 > self.resize_at {
            self.grow();
        }
        let mut slot = slot_hash(node) & self.mask;
        loop {
            if self.keys[slot] == EMPTY_KEY {
                self.keys[slot] = node;
                self.values[slot] = score;
                self.len += 1;
                return;
            }
            if self.keys[slot] == node {
                if score < self.values[slot] {
                    self.values[slot] = score;
                }
                return;
            }
            slot = (slot + 1) & self.mask;
        }
    }

    /// Score of `node`, or the background score when absent.
    #[inline]
    #[must_use]
    pub fn score(&self, node: u32) -> Score {
        let mut slot = slot_hash(node) & self.mask;
        loop {
            if self.keys[slot] == EMPTY_KEY {
                return self.background;
            }
            if self.keys[slot] == node {
                return self.values[slot];
            }
            slot = (slot + 1) & self.mask;
        }
    }

    fn grow(&mut self) {
        let capacity = (self.mask + 1) * 2;
        let old_keys = std::mem::replace(&mut self.keys, vec![EMPTY_KEY; capacity]);
        let old_values = std::mem::replace(&mut self.values, vec![0.0; capacity]);
        self.mask = capacity - 1;
        self.resize_at = ((capacity as f32) * self.resize_at_fill) as usize;
        self.len = 0;
        self.resizes += 1;
        for (k, v) in old_keys.into_iter().zip(old_values) {
            if k != EMPTY_KEY {
                self.insert(k, v);
            }
        }
    }
}

/// Per-word extras folded into the table scores. Pronunciation priors
/// fold in through the LM scores when the output alphabet is at
/// lemma-pronunciation granularity.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScoreExtras {
    /// Phoneme-exit penalty added to every word end.
    pub exit_penalty: Score,
}

/// Fill a dense table bottom-up: each node takes the minimum over its
/// own word ends and its children.
#[must_use]
pub fn fill_dense<L: LanguageModel>(
    structure: &LookaheadStructure,
    lm: &L,
    history: &History,
    scale: Score,
    extras: ScoreExtras,
) -> Vec<Score> {
    let n = structure.n_nodes();
    let mut scores = vec![Score::INFINITY; n];
    // Children have larger ids than parents: one reverse sweep suffices.
    for id in (0..n).rev() {
        let node = structure.node(id as u32);
        let mut best = scores[id];
        for &end in &node.ends {
            let cost = scale * lm.score(history, end) + extras.exit_penalty;
            if cost < best {
                best = cost;
            }
        }
        scores[id] = best;
        if node.parent != INVALID_NODE && best < scores[node.parent as usize] {
            scores[node.parent as usize] = best;
        }
    }
    scores
}

/// Fill a sparse table with the non-trivial node scores; nodes whose
/// subtree minimum equals the background keep no explicit entry.
#[must_use]
pub fn fill_sparse<L: LanguageModel>(
    structure: &LookaheadStructure,
    lm: &L,
    history: &History,
    scale: Score,
    extras: ScoreExtras,
    size_factor: f32,
    resize_at_fill: f32,
    background: Score,
) -> SparseTable {
    let dense = fill_dense(structure, lm, history, scale, extras);
    let expected = dense
        .iter()
        .filter(|&&s| s != Score::INFINITY && s < background)
        .count();
    let mut table = SparseTable::new(expected, size_factor, resize_at_fill, background);
    for (id, &score) in dense.iter().enumerate() {
        if score != Score::INFINITY && score < background {
            table.insert(id as u32, score);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::lm::NGramModel;
    use trellis_core::state_sequence::{HmmState, StateSequenceList};
    use trellis_network::StaticNetwork;

    fn setup() -> (LookaheadStructure, NGramModel) {
        let mut seqs = StateSequenceList::new();
        for e in 0..4 {
            seqs.push(&[HmmState { emission: e, transition: 0 }], true, true);
        }
        let mut n = StaticNetwork::with_states(4);
        n.add_arc(0, 1, trellis_core::types::EPSILON, 0.0, 1, &seqs);
        n.add_arc(1, 2, 1, 0.0, 2, &seqs);
        n.add_arc(1, 3, 2, 0.0, 3, &seqs);
        n.set_final(2, 0.0);
        n.set_final(3, 0.0);
        let structure = LookaheadStructure::build(&n, &seqs, u32::MAX, 1);
        let mut lm = NGramModel::new(1, 4);
        lm.insert(&[], 1, 1.0, 0.0);
        lm.insert(&[], 2, 3.0, 0.0);
        (structure, lm)
    }

    #[test]
    fn dense_scores_are_subtree_minima() {
        let (structure, lm) = setup();
        let h = History::empty();
        let scores = fill_dense(&structure, &lm, &h, 1.0, ScoreExtras::default());
        // The root subtree contains both words: min(1, 3) = 1.
        let root = structure.node_for_state(0);
        assert!((scores[root as usize] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sparse_matches_dense_below_background() {
        let (structure, lm) = setup();
        let h = History::empty();
        let dense = fill_dense(&structure, &lm, &h, 1.0, ScoreExtras::default());
        let sparse = fill_sparse(&structure, &lm, &h, 1.0, ScoreExtras::default(), 1.8, 0.75, 2.0);
        for (id, &d) in dense.iter().enumerate() {
            let s = sparse.score(id as u32);
            if d < 2.0 {
                assert!((s - d).abs() < 1e-6, "node {id}: {s} vs {d}");
            } else {
                assert!((s - 2.0).abs() < 1e-6, "background expected at {id}");
            }
        }
    }

    #[test]
    fn sparse_table_resizes_under_load() {
        let mut t = SparseTable::new(2, 1.0, 0.5, 9.0);
        for i in 0..64 {
            t.insert(i, i as Score);
        }
        assert!(t.resizes > 0);
        for i in 0..64 {
            assert!((t.score(i) - i as Score).abs() < 1e-6);
        }
        assert!((t.score(1000) - 9.0).abs() < 1e-6);
    }

    #[test]
    fn exit_penalty_folds_in() {
        let (structure, lm) = setup();
        let h = History::empty();
        let extras = ScoreExtras { exit_penalty: 0.5 };
        let scores = fill_dense(&structure, &lm, &h, 1.0, extras);
        let root = structure.node_for_state(0);
        assert!((scores[root as usize] - 1.5).abs() < 1e-6);
    }
}
