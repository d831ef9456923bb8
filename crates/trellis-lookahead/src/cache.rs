// crates/trellis-lookahead/src/cache.rs

//! Table construction and caching.
//!
//! Tables are deleted as soon as they are not immediately needed: the
//! table becomes inactive (reference count zero) and goes to the free
//! list. As long as fewer than `cache_size_high` tables exist, nothing
//! is deleted; above that mark the table that least recently became
//! inactive is dropped whenever one is released. When a new table is
//! requested and at least `cache_size_low` tables exist, an inactive
//! table is re-used (free hit); below that mark a new one is created.
//! `cache_size_high` is not a strict bound: the search may keep more
//! tables active than the mark.

use std::collections::VecDeque;
use std::path::PathBuf;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use trellis_core::lm::{History, LanguageModel};
use trellis_core::types::{Score, StateId};
use trellis_network::Network;

use crate::structure::{LookaheadStructure, INVALID_NODE, STRUCTURE_MAGIC};
use crate::table::{fill_dense, fill_sparse, ScoreExtras, Table};
use crate::LookaheadScorer;

/// Look-ahead configuration.
#[derive(Clone, Debug)]
pub struct LookaheadOptions {
    /// Effective m-grammity of the look-ahead model minus one;
    /// `None` keeps the unlimited history.
    pub history_limit: Option<u32>,
    /// Maximum network depth covered in detail (HMM states).
    pub tree_cutoff: u32,
    /// Minimum number of HMM states per look-ahead node.
    pub minimum_representation: u32,
    /// Tables retained before inactive tables are re-used.
    pub cache_size_low: u32,
    /// Tables allowed before inactive tables are deleted.
    pub cache_size_high: u32,
    /// Build a sparse table when the expected fraction of non-trivial
    /// entries is below this.
    pub sparse_threshold: f32,
    pub sparse_hash_size_factor: f32,
    pub sparse_hash_resize_at_fill: f32,
    /// Scale applied to the look-ahead scores.
    pub scale: Score,
    /// Fold the phoneme-exit penalty into the tables.
    pub exit_penalty: Score,
    /// Reserved direct-mapped slots of the history hash.
    pub collision_prevention_hash_size: u32,
    /// Reseed when the average predicted/observed deviation exceeds this.
    pub max_collision_deviation: f32,
    /// Optional archive for the offline structure.
    pub cache_archive: Option<PathBuf>,
}

impl Default for LookaheadOptions {
    fn default() -> Self {
        Self {
            history_limit: None,
            tree_cutoff: u32::MAX,
            minimum_representation: 1,
            cache_size_low: 3500,
            cache_size_high: 4500,
            sparse_threshold: 0.5,
            sparse_hash_size_factor: 1.8,
            sparse_hash_resize_at_fill: 0.75,
            scale: 1.0,
            exit_penalty: 0.0,
            collision_prevention_hash_size: 65536,
            max_collision_deviation: 1.3,
            cache_archive: None,
        }
    }
}

/// Cache event counters fed to the statistics channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStatistics {
    pub share_hits: u64,
    pub free_hits: u64,
    pub misses: u64,
    pub sparse_tables: u64,
    pub dense_tables: u64,
    pub evictions: u64,
    pub reseeds: u32,
}

impl CacheStatistics {
    /// Fraction of requests that constructed a table.
    #[must_use]
    pub fn miss_rate(&self) -> f64 {
        let total = self.share_hits + self.free_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.misses as f64 / total as f64
        }
    }
}

/// Handle of an acquired (active) table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableHandle(usize);

struct CachedTable {
    history: History,
    table: Table,
    refs: u32,
}

/// Monotone prediction of the number of non-trivial sparse entries,
/// keyed by the number of n-gram extensions of the history.
struct SparsePrediction {
    buckets: Vec<(u64, u64)>, // (sum of observed entries, observations)
    default: u64,
}

const PREDICTION_ARRAY_SIZE: usize = 100;

impl SparsePrediction {
    fn new(default: u64) -> Self {
        Self {
            buckets: vec![(0, 0); PREDICTION_ARRAY_SIZE],
            default,
        }
    }

    fn bucket(extensions: u32) -> usize {
        (extensions as usize).min(PREDICTION_ARRAY_SIZE - 1)
    }

    fn expected(&self, extensions: u32) -> u64 {
        let (sum, n) = self.buckets[Self::bucket(extensions)];
        if n == 0 {
            self.default.max(u64::from(extensions))
        } else {
            sum / n
        }
    }

    fn add(&mut self, extensions: u32, observed: u64) {
        let b = &mut self.buckets[Self::bucket(extensions)];
        b.0 += observed;
        b.1 += 1;
    }
}

/// Bounded history hash reserving direct-mapped slots so that two
/// frequently used histories collide at most once before a reseed.
struct CollisionGuard {
    size: u32,
    seed: u64,
    slot_owner: FxHashMap<u32, u64>,
    collisions: u64,
    probes: u64,
    max_average_deviation: f32,
    reseeds: u32,
}

impl CollisionGuard {
    fn new(size: u32, max_average_deviation: f32) -> Self {
        Self {
            size: size.max(1),
            seed: 0x9e37_79b9_7f4a_7c15,
            slot_owner: FxHashMap::default(),
            collisions: 0,
            probes: 0,
            max_average_deviation,
            reseeds: 0,
        }
    }

    fn history_hash(&self, history: &History) -> u64 {
        let mut h = self.seed;
        for &w in history.words() {
            h ^= u64::from(w).wrapping_add(0x9e37_79b9_7f4a_7c15);
            h = h.rotate_left(27).wrapping_mul(0x2545_f491_4f6c_dd1d);
        }
        h
    }

    /// Track slot usage; reseeds the hash when the average deviation
    /// (collisions per probe, relative to the reserved range) drifts
    /// beyond the configured maximum.
    fn observe(&mut self, history: &History) {
        let h = self.history_hash(history);
        let slot = (h % u64::from(self.size)) as u32;
        self.probes += 1;
        match self.slot_owner.get(&slot) {
            Some(&owner) if owner != h => {
                self.collisions += 1;
                self.slot_owner.insert(slot, h);
            }
            _ => {
                self.slot_owner.insert(slot, h);
            }
        }
        let average = 1.0 + self.collisions as f32 / self.probes.max(1) as f32;
        if self.probes > u64::from(self.size) && average > self.max_average_deviation {
            self.seed = self.seed.rotate_left(17) ^ 0xd6e8_feb8_6659_fd93;
            self.slot_owner.clear();
            self.collisions = 0;
            self.probes = 0;
            self.reseeds += 1;
        }
    }
}

/// LM look-ahead: the offline structure plus the per-history table cache.
pub struct LmLookahead<L: LanguageModel> {
    structure: LookaheadStructure,
    lm: L,
    options: LookaheadOptions,
    tables: Vec<Option<CachedTable>>,
    by_history: FxHashMap<History, usize>,
    // Front = least recently inactive.
    free: VecDeque<usize>,
    prediction: SparsePrediction,
    guard: CollisionGuard,
    statistics: CacheStatistics,
    // Per-segment binding of grammar states to histories.
    context_history: FxHashMap<StateId, History>,
    context_table: FxHashMap<StateId, TableHandle>,
    thrash_warned: bool,
}

impl<L: LanguageModel> LmLookahead<L> {
    /// Build the look-ahead over `network`, loading the structure from
    /// the cache archive when present and compatible.
    pub fn new<N: Network>(
        network: &N,
        sequences: &trellis_core::state_sequence::StateSequenceList,
        lm: L,
        options: LookaheadOptions,
    ) -> Self {
        let structure = Self::load_or_build(network, sequences, &options);
        debug!(
            nodes = structure.n_nodes(),
            states = network.num_states(),
            "look-ahead structure ready"
        );
        let default_expected = (f64::from(lm.vocab_size()).sqrt() as u64) + 1;
        let guard = CollisionGuard::new(
            options.collision_prevention_hash_size,
            options.max_collision_deviation,
        );
        Self {
            structure,
            lm,
            prediction: SparsePrediction::new(default_expected),
            guard,
            options,
            tables: Vec::new(),
            by_history: FxHashMap::default(),
            free: VecDeque::new(),
            statistics: CacheStatistics::default(),
            context_history: FxHashMap::default(),
            context_table: FxHashMap::default(),
            thrash_warned: false,
        }
    }

    fn load_or_build<N: Network>(
        network: &N,
        sequences: &trellis_core::state_sequence::StateSequenceList,
        options: &LookaheadOptions,
    ) -> LookaheadStructure {
        if let Some(path) = &options.cache_archive {
            if let Ok(bytes) = std::fs::read(path) {
                match bincode::deserialize::<LookaheadStructure>(&bytes) {
                    Ok(s) if s.magic == STRUCTURE_MAGIC => return s,
                    _ => warn!(path = %path.display(), "stale look-ahead archive, rebuilding"),
                }
            }
        }
        let s = LookaheadStructure::build(
            network,
            sequences,
            options.tree_cutoff,
            options.minimum_representation,
        );
        if let Some(path) = &options.cache_archive {
            match bincode::serialize(&s) {
                Ok(bytes) => {
                    if let Err(e) = std::fs::write(path, bytes) {
                        warn!(path = %path.display(), error = %e, "cannot write look-ahead archive");
                    }
                }
                Err(e) => warn!(error = %e, "cannot serialize look-ahead structure"),
            }
        }
        s
    }

    #[must_use]
    pub fn structure(&self) -> &LookaheadStructure {
        &self.structure
    }

    #[must_use]
    pub const fn statistics(&self) -> &CacheStatistics {
        &self.statistics
    }

    #[must_use]
    pub fn n_tables(&self) -> usize {
        self.tables.iter().filter(|t| t.is_some()).count()
    }

    /// Reduce `history` to the configured look-ahead history limit.
    #[must_use]
    pub fn reduced(&self, history: &History) -> History {
        match self.options.history_limit {
            Some(n) => self.lm.reduced_history(history, n),
            None => history.clone(),
        }
    }

    /// Acquire the table for `history` (activating it). Each request is
    /// a share hit, a free hit, or a miss.
    pub fn acquire(&mut self, history: &History) -> TableHandle {
        let history = self.reduced(history);
        self.guard.observe(&history);
        self.statistics.reseeds = self.guard.reseeds;
        if let Some(&idx) = self.by_history.get(&history) {
            self.statistics.share_hits += 1;
            let t = self.tables[idx].as_mut().map(|t| {
                t.refs += 1;
                t.refs
            });
            if t == Some(1) {
                // Was inactive: leave the free list.
                self.free.retain(|&i| i != idx);
            }
            return TableHandle(idx);
        }

        let table = self.build_table(&history);
        let idx = if self.n_tables() >= self.options.cache_size_low as usize {
            if let Some(reuse) = self.free.pop_front() {
                self.statistics.free_hits += 1;
                if let Some(old) = self.tables[reuse].take() {
                    self.by_history.remove(&old.history);
                }
                reuse
            } else {
                self.statistics.misses += 1;
                self.tables.push(None);
                self.tables.len() - 1
            }
        } else {
            self.statistics.misses += 1;
            self.tables.push(None);
            self.tables.len() - 1
        };
        self.tables[idx] = Some(CachedTable {
            history: history.clone(),
            table,
            refs: 1,
        });
        self.by_history.insert(history, idx);
        let built = self.statistics.misses + self.statistics.free_hits;
        if !self.thrash_warned
            && built > 2 * u64::from(self.options.cache_size_high.max(1))
            && self.statistics.miss_rate() > 0.5
        {
            self.thrash_warned = true;
            warn!(
                misses = self.statistics.misses,
                free_hits = self.statistics.free_hits,
                "look-ahead table cache is thrashing"
            );
        }
        TableHandle(idx)
    }

    /// Release an acquired table; at reference count zero it becomes
    /// inactive and eligible for re-use or eviction.
    pub fn release(&mut self, handle: TableHandle) {
        let Some(t) = self.tables[handle.0].as_mut() else {
            return;
        };
        t.refs = t.refs.saturating_sub(1);
        if t.refs == 0 {
            self.free.push_back(handle.0);
        }
        // Above the high mark, drop the least recently inactive table.
        while self.n_tables() > self.options.cache_size_high as usize {
            let Some(evict) = self.free.pop_front() else {
                break;
            };
            if let Some(old) = self.tables[evict].take() {
                self.by_history.remove(&old.history);
                self.statistics.evictions += 1;
            }
        }
    }

    /// Look-ahead score of `node` under an acquired table.
    #[must_use]
    pub fn score(&self, handle: TableHandle, node: u32) -> Score {
        self.tables[handle.0]
            .as_ref()
            .map_or(Score::INFINITY, |t| t.table.score(node))
    }

    fn build_table(&mut self, history: &History) -> Table {
        let extras = ScoreExtras {
            exit_penalty: self.options.exit_penalty,
        };
        let total_nodes = self.structure.n_nodes().max(1);
        let extensions = self.lm.num_extensions(history);
        let expected = self.prediction.expected(extensions);
        let sparse = (expected as f32) / (total_nodes as f32) < self.options.sparse_threshold;
        if sparse {
            // Background: unigram-backoff cost over the vocabulary.
            let background = self.options.scale * self.background_score(history);
            let table = fill_sparse(
                &self.structure,
                &self.lm,
                history,
                self.options.scale,
                extras,
                self.options.sparse_hash_size_factor,
                self.options.sparse_hash_resize_at_fill,
                background,
            );
            self.prediction.add(extensions, table.len() as u64);
            self.statistics.sparse_tables += 1;
            Table::Sparse(table)
        } else {
            let dense = fill_dense(
                &self.structure,
                &self.lm,
                history,
                self.options.scale,
                extras,
            );
            let non_trivial = dense.iter().filter(|&&s| s != Score::INFINITY).count();
            self.prediction.add(extensions, non_trivial as u64);
            self.statistics.dense_tables += 1;
            Table::Dense(dense)
        }
    }

    /// Minimum unigram cost: the admissible background of sparse tables.
    fn background_score(&self, history: &History) -> Score {
        let _ = history;
        let mut best = Score::INFINITY;
        for node in self.structure.nodes() {
            for &end in &node.ends {
                let s = self.lm.unigram_score(end);
                if s < best {
                    best = s;
                }
            }
        }
        best
    }

    /// Bind a grammar state to the LM history it represents. The search
    /// front end registers bindings as word ends are crossed.
    pub fn bind_context(&mut self, grammar_state: StateId, history: History) {
        self.context_history.insert(grammar_state, history);
    }
}

impl<L: LanguageModel> LookaheadScorer for LmLookahead<L> {
    fn anticipate(&mut self, grammar_state: StateId, node_state: StateId) -> Score {
        let node = self.structure.node_for_state(node_state);
        if node == INVALID_NODE {
            return 0.0;
        }
        let handle = match self.context_table.get(&grammar_state) {
            Some(&h) => h,
            None => {
                let history = self
                    .context_history
                    .get(&grammar_state)
                    .cloned()
                    .unwrap_or_else(|| self.lm.start_history());
                let h = self.acquire(&history);
                self.context_table.insert(grammar_state, h);
                h
            }
        };
        let s = self.score(handle, node);
        if s == Score::INFINITY {
            0.0
        } else {
            s
        }
    }

    fn reset(&mut self) {
        let handles: Vec<TableHandle> = self.context_table.values().copied().collect();
        for h in handles {
            self.release(h);
        }
        self.context_table.clear();
        self.context_history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::lm::NGramModel;
    use trellis_core::state_sequence::{HmmState, StateSequenceList};
    use trellis_network::StaticNetwork;

    fn setup(options: LookaheadOptions) -> LmLookahead<NGramModel> {
        let mut seqs = StateSequenceList::new();
        for e in 0..4 {
            seqs.push(&[HmmState { emission: e, transition: 0 }], true, true);
        }
        let mut n = StaticNetwork::with_states(3);
        n.add_arc(0, 1, 1, 0.0, 1, &seqs);
        n.add_arc(0, 2, 2, 0.0, 2, &seqs);
        n.set_final(1, 0.0);
        n.set_final(2, 0.0);
        let mut lm = NGramModel::new(2, 4);
        lm.insert(&[], 1, 1.0, 0.5);
        lm.insert(&[], 2, 2.0, 0.0);
        lm.insert(&[1], 2, 0.25, 0.0);
        LmLookahead::new(&n, &seqs, lm, options)
    }

    fn small_cache() -> LookaheadOptions {
        LookaheadOptions {
            cache_size_low: 1,
            cache_size_high: 2,
            ..LookaheadOptions::default()
        }
    }

    #[test]
    fn share_hit_on_same_history() {
        let mut la = setup(LookaheadOptions::default());
        let h = History::empty();
        let t1 = la.acquire(&h);
        let t2 = la.acquire(&h);
        assert_eq!(t1, t2);
        assert_eq!(la.statistics().share_hits, 1);
        assert_eq!(la.statistics().misses, 1);
        la.release(t1);
        la.release(t2);
    }

    #[test]
    fn free_hit_reuses_inactive_tables() {
        let mut la = setup(small_cache());
        let t1 = la.acquire(&History::empty());
        la.release(t1);
        let t2 = la.acquire(&History::from_words(&[1]));
        // Above the low mark with an inactive table: re-used slot.
        assert_eq!(la.statistics().free_hits, 1);
        la.release(t2);
    }

    #[test]
    fn eviction_respects_high_mark() {
        let mut la = setup(LookaheadOptions {
            cache_size_low: 64,
            cache_size_high: 2,
            ..LookaheadOptions::default()
        });
        let handles: Vec<_> = (0..4)
            .map(|w| la.acquire(&History::from_words(&[w])))
            .collect();
        assert_eq!(la.n_tables(), 4); // high mark is not strict while active
        for h in handles {
            la.release(h);
        }
        assert!(la.n_tables() <= 2);
        assert!(la.statistics().evictions >= 2);
    }

    #[test]
    fn admissibility_against_lm() {
        let mut la = setup(LookaheadOptions::default());
        let h = History::empty();
        let t = la.acquire(&h);
        // Root node covers words 1 and 2: bound must not exceed either cost.
        let root = la.structure().node_for_state(0);
        let s = la.score(t, root);
        assert!(s <= 1.0 + 1e-6);
        assert!(s <= 2.0 + 1e-6);
        la.release(t);
    }

    #[test]
    fn history_limit_shares_tables() {
        let mut la = setup(LookaheadOptions {
            history_limit: Some(0),
            ..LookaheadOptions::default()
        });
        let a = la.acquire(&History::from_words(&[1]));
        let b = la.acquire(&History::from_words(&[2]));
        assert_eq!(a, b, "zero-limit histories all reduce to the same table");
        la.release(a);
        la.release(b);
    }
}
