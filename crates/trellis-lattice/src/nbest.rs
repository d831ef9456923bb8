// crates/trellis-lattice/src/nbest.rs

//! N-best path extraction from an acyclic lattice.
//!
//! A best-first expansion over partial paths with the exact tropical
//! backward score as heuristic, so hypotheses pop in cost order.
//! Hypotheses that collapse to the same output label sequence are
//! merged in the log semiring.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use trellis_core::semiring::log_add;
use trellis_core::types::{Label, Score, StateId, EPSILON};

use crate::lattice::Lattice;

/// One linear hypothesis: output labels, combined cost, and the negated
/// log posterior relative to its n-best list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NBestHypothesis {
    pub labels: Vec<Label>,
    pub score: Score,
    pub posterior: Score,
}

/// An n-best list in best-first order with normalized posteriors.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NBestList {
    pub hypotheses: Vec<NBestHypothesis>,
}

impl NBestList {
    /// Posterior of the MAP (first) hypothesis.
    #[must_use]
    pub fn map_posterior(&self) -> Score {
        self.hypotheses.first().map_or(Score::INFINITY, |h| h.posterior)
    }

    /// Renormalize posteriors over the list from the hypothesis scores,
    /// scaled by `scale`.
    pub fn normalize(&mut self, scale: f32) {
        let mut total = f64::INFINITY;
        for h in &self.hypotheses {
            total = log_add(total, f64::from(h.score * scale));
        }
        for h in &mut self.hypotheses {
            h.posterior = (f64::from(h.score * scale) - total) as Score;
        }
    }
}

struct Partial {
    state: StateId,
    cost: Score,
    prospect: Score,
    labels: Vec<Label>,
}

impl PartialEq for Partial {
    fn eq(&self, other: &Self) -> bool {
        self.prospect == other.prospect
    }
}
impl Eq for Partial {}
impl PartialOrd for Partial {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Partial {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse: BinaryHeap is a max-heap, we want the lowest prospect.
        other
            .prospect
            .partial_cmp(&self.prospect)
            .unwrap_or(Ordering::Equal)
    }
}

/// Extract up to `n` best distinct label sequences.
///
/// `expansion_limit` bounds the total number of pops as a safety net on
/// degenerate lattices.
#[must_use]
pub fn extract_nbest(l: &Lattice, n: usize, expansion_limit: usize) -> NBestList {
    let mut list = NBestList::default();
    if l.is_empty() || n == 0 {
        return list;
    }
    let order = l.chronological_order();
    let bwd = l.backward_scores(&order);
    if bwd[l.initial() as usize] == Score::INFINITY {
        return list;
    }

    let mut heap = BinaryHeap::new();
    heap.push(Partial {
        state: l.initial(),
        cost: 0.0,
        prospect: bwd[l.initial() as usize],
        labels: Vec::new(),
    });
    // Label sequence -> index in list, for log-domain mass merging.
    let mut seen: FxHashMap<Vec<Label>, usize> = FxHashMap::default();

    let mut pops = 0usize;
    while let Some(p) = heap.pop() {
        pops += 1;
        if pops > expansion_limit {
            break;
        }
        let state = l.state(p.state);
        if let Some(f) = state.final_weight {
            let total = p.cost + f.combined();
            match seen.get(&p.labels) {
                Some(&i) => {
                    let h = &mut list.hypotheses[i];
                    h.score = (log_add(f64::from(h.score), f64::from(total))) as Score;
                }
                None => {
                    if list.hypotheses.len() < n {
                        seen.insert(p.labels.clone(), list.hypotheses.len());
                        list.hypotheses.push(NBestHypothesis {
                            labels: p.labels.clone(),
                            score: total,
                            posterior: Score::INFINITY,
                        });
                    }
                }
            }
            if list.hypotheses.len() >= n && heap.is_empty() {
                break;
            }
        }
        if list.hypotheses.len() >= n {
            // Existing entries may still absorb mass; only follow arcs
            // that can reach a final at all.
            continue;
        }
        for a in &state.arcs {
            let rest = bwd[a.target as usize];
            if rest == Score::INFINITY {
                continue;
            }
            let mut labels = p.labels.clone();
            if a.output != EPSILON {
                labels.push(a.output);
            }
            heap.push(Partial {
                state: a.target,
                cost: p.cost + a.weight.combined(),
                prospect: p.cost + a.weight.combined() + rest,
                labels,
            });
        }
    }

    list.normalize(1.0);
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::LatticeArc;
    use trellis_core::semiring::PairWeight;

    fn diamond() -> Lattice {
        let mut l = Lattice::new();
        let s0 = l.add_state();
        let s1 = l.add_state();
        let s2 = l.add_state();
        let s3 = l.add_state();
        l.set_initial(s0);
        l.set_final(s3, PairWeight::one());
        for (s, t) in [(s0, 0), (s1, 3), (s2, 3), (s3, 6)] {
            l.set_word_boundary(s, t);
        }
        l.add_arc(s0, LatticeArc { input: 1, output: 10, weight: PairWeight::new(-(0.6f32.ln()), 0.0), target: s1 });
        l.add_arc(s0, LatticeArc { input: 2, output: 11, weight: PairWeight::new(-(0.4f32.ln()), 0.0), target: s2 });
        l.add_arc(s1, LatticeArc { input: 3, output: 20, weight: PairWeight::one(), target: s3 });
        l.add_arc(s2, LatticeArc { input: 4, output: 20, weight: PairWeight::one(), target: s3 });
        l
    }

    #[test]
    fn nbest_in_cost_order_with_posteriors() {
        let l = diamond();
        let list = extract_nbest(&l, 4, 1000);
        assert_eq!(list.hypotheses.len(), 2);
        assert_eq!(list.hypotheses[0].labels, vec![10, 20]);
        assert_eq!(list.hypotheses[1].labels, vec![11, 20]);
        let p0 = (-f64::from(list.hypotheses[0].posterior)).exp();
        assert!((p0 - 0.6).abs() < 1e-5);
    }

    #[test]
    fn n_limits_output() {
        let l = diamond();
        let list = extract_nbest(&l, 1, 1000);
        assert_eq!(list.hypotheses.len(), 1);
        assert_eq!(list.hypotheses[0].labels, vec![10, 20]);
    }
}
