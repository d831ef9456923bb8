// crates/trellis-search/src/recombination.rs

//! Offline path-recombination analysis.
//!
//! Builds the recombination graph whose nodes are the states where two
//! incoming paths may first meet (fan-in ≥ 2, plus the root), and
//! precomputes per-state distances to the recombination states.
//! `interval(a, b)` estimates the number of frames until every followup
//! of one hypothesis has recombined with a followup of the other; the
//! estimate feeds lattice-pruning heuristics.

use std::num::NonZeroUsize;

use lru::LruCache;

use trellis_core::types::StateId;
use trellis_network::Network;

/// Analyzer configuration.
#[derive(Clone, Copy, Debug)]
pub struct RecombinationOptions {
    /// Frames per HMM state on the convergent (symmetric) phase.
    pub delta: f32,
    /// Convergence speed of the asymmetric phase.
    pub convergence_factor: f32,
    /// States per frame the longer path catches up on the shorter one.
    pub asymmetry_factor: f32,
    /// Distance exploration bound.
    pub max_depth: u32,
    /// Capacity of the interval cache.
    pub cache_size: usize,
}

impl Default for RecombinationOptions {
    fn default() -> Self {
        Self {
            delta: 1.0,
            convergence_factor: 1.0,
            asymmetry_factor: 2.0,
            max_depth: 1000,
            cache_size: 100_000,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct DistancePair {
    shortest: u32,
    longest: u32,
}

/// Precomputed recombination structure of a network.
pub struct PathRecombination {
    options: RecombinationOptions,
    /// 1-based recombination index per state; 0 for ordinary states.
    recombination_state_map: Vec<u32>,
    /// For every state, distances to each recombination state
    /// (`u32::MAX` when unreachable), indexed `[state][recombination]`.
    distances: Vec<Vec<DistancePair>>,
    n_recombination_states: usize,
    cache: std::cell::RefCell<LruCache<(StateId, StateId), u32>>,
    visits: std::cell::Cell<u64>,
}

impl PathRecombination {
    /// Analyze `network`.
    pub fn new<N: Network>(network: &N, options: RecombinationOptions) -> Self {
        let n = network.num_states() as usize;
        let mut fan_in = vec![0u32; n];
        for s in 0..network.num_states() {
            for i in 0..network.n_arcs_of(s) {
                fan_in[network.arc(s, i).target as usize] += 1;
            }
            for i in 0..network.n_epsilon_arcs_of(s) {
                fan_in[network.epsilon_arc(s, i).target as usize] += 1;
            }
        }
        let mut recombination_state_map = vec![0u32; n];
        let mut n_recombination_states = 0usize;
        for s in 0..n {
            let is_root = s as StateId == network.initial_state();
            if fan_in[s] >= 2 || is_root {
                n_recombination_states += 1;
                recombination_state_map[s] = n_recombination_states as u32;
            }
        }
        let mut analyzer = Self {
            options,
            recombination_state_map,
            distances: Vec::with_capacity(n),
            n_recombination_states,
            cache: std::cell::RefCell::new(LruCache::new(
                NonZeroUsize::new(options.cache_size.max(1)).unwrap_or(NonZeroUsize::MIN),
            )),
            visits: std::cell::Cell::new(0),
        };
        for s in 0..n {
            analyzer
                .distances
                .push(analyzer.compute_distances_for_state(network, s as StateId));
        }
        analyzer
    }

    /// Bounded forward exploration collecting shortest and longest
    /// distances (in states) to each recombination state.
    fn compute_distances_for_state<N: Network>(
        &self,
        network: &N,
        state: StateId,
    ) -> Vec<DistancePair> {
        let mut result = vec![
            DistancePair {
                shortest: u32::MAX,
                longest: 0,
            };
            self.n_recombination_states
        ];
        // (state, depth); breadth-first with a visit bound.
        let mut queue = std::collections::VecDeque::from([(state, 0u32)]);
        let mut expansions = 0u32;
        while let Some((s, d)) = queue.pop_front() {
            if d > 0 {
                let r = self.recombination_state_map[s as usize];
                if r != 0 {
                    let entry = &mut result[(r - 1) as usize];
                    entry.shortest = entry.shortest.min(d);
                    entry.longest = entry.longest.max(d);
                    continue; // distances beyond a recombination state
                              // belong to that state's own table
                }
            }
            expansions += 1;
            if d >= self.options.max_depth || expansions > 4 * self.options.max_depth {
                continue;
            }
            for i in 0..network.n_arcs_of(s) {
                queue.push_back((network.arc(s, i).target, d + 1));
            }
            for i in 0..network.n_epsilon_arcs_of(s) {
                queue.push_back((network.epsilon_arc(s, i).target, d + 1));
            }
        }
        result
    }

    /// Frames until symmetric recombination at pivot distance `d`.
    #[inline]
    fn t_s(&self, d: f32) -> f32 {
        d / self.options.delta
    }

    /// Frames until asymmetric recombination at pivot distance `d`.
    #[inline]
    fn t_a(&self, d: f32) -> f32 {
        d / self.options.asymmetry_factor
    }

    /// Frames until recombination on a pivot with distances d1 and d2.
    fn t(&self, d1: u32, d2: u32) -> u32 {
        let (d1, d2) = if d2 > d1 { (d2, d1) } else { (d1, d2) };
        let (d1, d2) = (d1 as f32, d2 as f32);
        let asymmetric = self.t_a(d1 - d2);
        let remaining =
            d1 - asymmetric * self.options.delta * self.options.convergence_factor;
        (asymmetric + self.t_s(remaining.max(0.0))).ceil() as u32
    }

    /// Expected number of frames until all followups of `a` and `b`
    /// have recombined; `u32::MAX` when they never meet within the
    /// exploration bound.
    pub fn interval(&self, a: StateId, b: StateId) -> u32 {
        if a == b {
            return 0;
        }
        let key = if a < b { (a, b) } else { (b, a) };
        if let Some(&v) = self.cache.borrow_mut().get(&key) {
            return v;
        }
        self.visits.set(self.visits.get() + 1);
        let da = &self.distances[a as usize];
        let db = &self.distances[b as usize];
        let mut best = u32::MAX;
        for r in 0..self.n_recombination_states {
            if da[r].shortest == u32::MAX || db[r].shortest == u32::MAX {
                continue;
            }
            // The pair recombines no earlier than its slowest followup
            // pair on this pivot.
            let worst = self.t(da[r].longest, db[r].longest);
            if worst < best {
                best = worst;
            }
        }
        self.cache.borrow_mut().put(key, best);
        best
    }

    /// Number of recombination states found.
    #[must_use]
    pub const fn n_recombination_states(&self) -> usize {
        self.n_recombination_states
    }

    /// Number of interval computations that missed the cache.
    #[must_use]
    pub fn n_visits(&self) -> u64 {
        self.visits.get()
    }
}
