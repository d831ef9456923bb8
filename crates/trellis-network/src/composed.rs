// crates/trellis-network/src/composed.rs

//! Lazy on-the-fly composition back-end.
//!
//! Composes a model transducer (outputs are word labels) with a grammar
//! acceptor, expanding composition states on first access and memoizing
//! them. An optional pruning threshold drops expanded arcs whose weight
//! lower bound exceeds it, keeping hopeless compositions out of memory.

use std::cell::RefCell;

use rustc_hash::FxHashMap;

use trellis_core::types::{Score, StateId, EPSILON};

use crate::static_net::StaticNetwork;
use crate::{Arc, EpsilonArc, Network};

#[derive(Clone, Debug, Default)]
struct ComposedState {
    left: StateId,
    right: StateId,
    arcs: Vec<Arc>,
    eps_arcs: Vec<EpsilonArc>,
    final_weight: Option<Score>,
    expanded: bool,
}

/// Composition of `model ∘ grammar`, expanded lazily.
pub struct ComposedNetwork {
    model: StaticNetwork,
    grammar: StaticNetwork,
    prune_threshold: Score,
    inner: RefCell<Inner>,
}

#[derive(Default)]
struct Inner {
    states: Vec<ComposedState>,
    index: FxHashMap<(StateId, StateId), StateId>,
    n_arcs: usize,
    n_eps_arcs: usize,
}

impl ComposedNetwork {
    /// Set up the composition; only the initial pair state exists until
    /// the search touches its successors.
    #[must_use]
    pub fn new(model: StaticNetwork, grammar: StaticNetwork, prune_threshold: Score) -> Self {
        let net = Self {
            model,
            grammar,
            prune_threshold,
            inner: RefCell::new(Inner::default()),
        };
        let initial = (net.model.initial_state(), net.grammar.initial_state());
        net.inner.borrow_mut().intern(initial);
        net
    }

    fn ensure_expanded(&self, state: StateId) {
        {
            let inner = self.inner.borrow();
            if inner.states[state as usize].expanded {
                return;
            }
        }
        let (left, right) = {
            let inner = self.inner.borrow();
            let s = &inner.states[state as usize];
            (s.left, s.right)
        };

        let mut arcs = Vec::new();
        let mut eps_arcs = Vec::new();

        // Non-epsilon model arcs; word outputs synchronize with the grammar.
        for a in self.model.state_arcs(left) {
            if a.output == EPSILON {
                let target = self.inner.borrow_mut().intern((a.target, right));
                arcs.push(Arc { target, ..*a });
            } else {
                for g in self.grammar.state_arcs(right) {
                    if g.input != a.output {
                        continue;
                    }
                    let weight = a.weight + g.weight;
                    if weight > self.prune_threshold {
                        continue;
                    }
                    let target = self.inner.borrow_mut().intern((a.target, g.target));
                    arcs.push(Arc {
                        input: a.input,
                        output: g.output,
                        weight,
                        target,
                    });
                }
            }
        }

        // Epsilon model arcs; epsilon outputs advance the left side only.
        for a in self.model.state_epsilon_arcs(left) {
            if a.output == EPSILON {
                let target = self.inner.borrow_mut().intern((a.target, right));
                eps_arcs.push(EpsilonArc { target, ..*a });
            } else {
                for g in self.grammar.state_arcs(right) {
                    if g.input != a.output {
                        continue;
                    }
                    let weight = a.weight + g.weight;
                    if weight > self.prune_threshold {
                        continue;
                    }
                    let target = self.inner.borrow_mut().intern((a.target, g.target));
                    eps_arcs.push(EpsilonArc {
                        output: g.output,
                        weight,
                        target,
                    });
                }
            }
        }

        // Grammar epsilon arcs (backoff transitions) advance the right side.
        for g in self.grammar.state_epsilon_arcs(right) {
            let target = self.inner.borrow_mut().intern((left, g.target));
            eps_arcs.push(EpsilonArc { target, ..*g });
        }

        let final_weight = if self.model.is_final(left) && self.grammar.is_final(right) {
            Some(self.model.final_weight(left) + self.grammar.final_weight(right))
        } else {
            None
        };

        let mut inner = self.inner.borrow_mut();
        inner.n_arcs += arcs.len();
        inner.n_eps_arcs += eps_arcs.len();
        let s = &mut inner.states[state as usize];
        s.arcs = arcs;
        s.eps_arcs = eps_arcs;
        s.final_weight = final_weight;
        s.expanded = true;
    }

    /// Number of composition states visited so far.
    #[must_use]
    pub fn num_visited_states(&self) -> u32 {
        self.inner.borrow().states.len() as u32
    }
}

impl Inner {
    fn intern(&mut self, pair: (StateId, StateId)) -> StateId {
        if let Some(&id) = self.index.get(&pair) {
            return id;
        }
        let id = self.states.len() as StateId;
        self.states.push(ComposedState {
            left: pair.0,
            right: pair.1,
            ..ComposedState::default()
        });
        self.index.insert(pair, id);
        id
    }
}

impl Network for ComposedNetwork {
    fn initial_state(&self) -> StateId {
        0
    }

    fn num_states(&self) -> u32 {
        self.num_visited_states()
    }

    fn num_arcs(&self) -> usize {
        self.inner.borrow().n_arcs
    }

    fn num_epsilon_arcs(&self) -> usize {
        self.inner.borrow().n_eps_arcs
    }

    fn n_arcs_of(&self, state: StateId) -> u32 {
        self.ensure_expanded(state);
        self.inner.borrow().states[state as usize].arcs.len() as u32
    }

    fn arc(&self, state: StateId, i: u32) -> Arc {
        self.inner.borrow().states[state as usize].arcs[i as usize]
    }

    fn n_epsilon_arcs_of(&self, state: StateId) -> u32 {
        self.ensure_expanded(state);
        self.inner.borrow().states[state as usize].eps_arcs.len() as u32
    }

    fn epsilon_arc(&self, state: StateId, i: u32) -> EpsilonArc {
        self.inner.borrow().states[state as usize].eps_arcs[i as usize]
    }

    fn is_final(&self, state: StateId) -> bool {
        self.ensure_expanded(state);
        self.inner.borrow().states[state as usize]
            .final_weight
            .is_some()
    }

    fn final_weight(&self, state: StateId) -> Score {
        self.ensure_expanded(state);
        self.inner.borrow().states[state as usize]
            .final_weight
            .unwrap_or(0.0)
    }

    fn grammar_state(&self, state: StateId) -> StateId {
        self.inner.borrow().states[state as usize].right
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::state_sequence::{HmmState, StateSequenceList};

    fn sequences() -> StateSequenceList {
        let mut l = StateSequenceList::new();
        for e in 0..4 {
            l.push(&[HmmState { emission: e, transition: 0 }], true, true);
        }
        l
    }

    /// Model: 0 -(seq1 : word1)-> 1(final); grammar over words 1, 2.
    fn compose_toy() -> ComposedNetwork {
        let seqs = sequences();
        let mut model = StaticNetwork::with_states(2);
        model.add_arc(0, 1, 1, 0.5, 1, &seqs);
        model.add_arc(0, 2, 2, 0.5, 1, &seqs);
        model.set_final(1, 0.0);
        let mut grammar = StaticNetwork::with_states(2);
        grammar.add_arc(0, 1, 1, 1.0, 1, &seqs); // word1, cost 1
        grammar.add_arc(0, 2, 2, 3.0, 1, &seqs); // word2, cost 3
        grammar.set_final(1, 0.0);
        ComposedNetwork::new(model, grammar, Score::INFINITY)
    }

    #[test]
    fn expands_lazily_and_memoizes() {
        let net = compose_toy();
        assert_eq!(net.num_visited_states(), 1);
        assert_eq!(net.n_arcs_of(0), 2);
        // Both words lead to the same (1, 1) pair.
        assert_eq!(net.num_visited_states(), 2);
        let a = net.arc(0, 0);
        assert_eq!(a.output, 1);
        assert!((a.weight - 1.5).abs() < 1e-6);
        assert!(net.is_final(a.target));
    }

    #[test]
    fn pruning_threshold_drops_expensive_arcs() {
        let seqs = sequences();
        let mut model = StaticNetwork::with_states(2);
        model.add_arc(0, 1, 1, 0.5, 1, &seqs);
        model.add_arc(0, 2, 2, 0.5, 1, &seqs);
        model.set_final(1, 0.0);
        let mut grammar = StaticNetwork::with_states(2);
        grammar.add_arc(0, 1, 1, 1.0, 1, &seqs);
        grammar.add_arc(0, 2, 2, 3.0, 1, &seqs);
        grammar.set_final(1, 0.0);
        let net = ComposedNetwork::new(model, grammar, 2.0);
        assert_eq!(net.n_arcs_of(0), 1);
    }

    #[test]
    fn grammar_state_projection() {
        let net = compose_toy();
        let _ = net.n_arcs_of(0);
        let a = net.arc(0, 0);
        assert_eq!(net.grammar_state(a.target), 1);
    }
}
