// crates/trellis-network/src/compressed.rs

//! Cache-friendly packed back-end.
//!
//! Arcs of all states live in one vector, addressed through a prefix-sum
//! offset array; epsilon arcs are segregated into a second block per
//! state so the hot non-epsilon iteration touches contiguous memory.

use trellis_core::types::{Score, StateId};

use crate::static_net::StaticNetwork;
use crate::{Arc, EpsilonArc, Network};

/// Packed network built from a [`StaticNetwork`].
#[derive(Clone, Debug)]
pub struct CompressedNetwork {
    arc_offsets: Vec<u32>, // len = n_states + 1
    arcs: Vec<Arc>,
    eps_offsets: Vec<u32>, // len = n_states + 1
    eps_arcs: Vec<EpsilonArc>,
    final_weights: Vec<Score>, // INFINITY = not final
    initial: StateId,
}

impl CompressedNetwork {
    /// Pack a static network. Arc order per state is preserved.
    #[must_use]
    pub fn from_static(net: &StaticNetwork) -> Self {
        let n = net.num_states() as usize;
        let mut arc_offsets = Vec::with_capacity(n + 1);
        let mut eps_offsets = Vec::with_capacity(n + 1);
        let mut arcs = Vec::with_capacity(net.num_arcs());
        let mut eps_arcs = Vec::with_capacity(net.num_epsilon_arcs());
        let mut final_weights = Vec::with_capacity(n);
        arc_offsets.push(0);
        eps_offsets.push(0);
        for s in 0..net.num_states() {
            arcs.extend_from_slice(net.state_arcs(s));
            eps_arcs.extend_from_slice(net.state_epsilon_arcs(s));
            arc_offsets.push(arcs.len() as u32);
            eps_offsets.push(eps_arcs.len() as u32);
            final_weights.push(if net.is_final(s) {
                net.final_weight(s)
            } else {
                Score::INFINITY
            });
        }
        Self {
            arc_offsets,
            arcs,
            eps_offsets,
            eps_arcs,
            final_weights,
            initial: net.initial_state(),
        }
    }

    /// Bytes used by the packed arc storage.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.arcs.capacity() * std::mem::size_of::<Arc>()
            + self.eps_arcs.capacity() * std::mem::size_of::<EpsilonArc>()
            + (self.arc_offsets.capacity() + self.eps_offsets.capacity()) * 4
            + self.final_weights.capacity() * 4
    }
}

impl Network for CompressedNetwork {
    fn initial_state(&self) -> StateId {
        self.initial
    }

    fn num_states(&self) -> u32 {
        self.final_weights.len() as u32
    }

    fn num_arcs(&self) -> usize {
        self.arcs.len()
    }

    fn num_epsilon_arcs(&self) -> usize {
        self.eps_arcs.len()
    }

    #[inline]
    fn n_arcs_of(&self, state: StateId) -> u32 {
        let s = state as usize;
        self.arc_offsets[s + 1] - self.arc_offsets[s]
    }

    #[inline]
    fn arc(&self, state: StateId, i: u32) -> Arc {
        self.arcs[(self.arc_offsets[state as usize] + i) as usize]
    }

    #[inline]
    fn n_epsilon_arcs_of(&self, state: StateId) -> u32 {
        let s = state as usize;
        self.eps_offsets[s + 1] - self.eps_offsets[s]
    }

    #[inline]
    fn epsilon_arc(&self, state: StateId, i: u32) -> EpsilonArc {
        self.eps_arcs[(self.eps_offsets[state as usize] + i) as usize]
    }

    fn is_final(&self, state: StateId) -> bool {
        self.final_weights[state as usize] != Score::INFINITY
    }

    fn final_weight(&self, state: StateId) -> Score {
        let w = self.final_weights[state as usize];
        if w == Score::INFINITY {
            0.0
        } else {
            w
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::state_sequence::{HmmState, StateSequenceList};
    use trellis_core::types::EPSILON;

    fn build() -> (StaticNetwork, CompressedNetwork) {
        let mut seqs = StateSequenceList::new();
        seqs.push(&[HmmState { emission: 0, transition: 0 }], true, true);
        seqs.push(&[HmmState { emission: 1, transition: 0 }], true, true);
        let mut n = StaticNetwork::with_states(3);
        n.add_arc(0, 1, 4, 0.25, 1, &seqs);
        n.add_arc(0, 2, 5, 0.75, 2, &seqs);
        n.add_arc(1, EPSILON, EPSILON, 0.1, 2, &seqs);
        n.set_final(2, 0.5);
        let c = CompressedNetwork::from_static(&n);
        (n, c)
    }

    #[test]
    fn packed_matches_static() {
        let (n, c) = build();
        assert_eq!(c.num_states(), n.num_states());
        assert_eq!(c.num_arcs(), n.num_arcs());
        assert_eq!(c.num_epsilon_arcs(), n.num_epsilon_arcs());
        for s in 0..n.num_states() {
            assert_eq!(c.n_arcs_of(s), n.n_arcs_of(s));
            for i in 0..n.n_arcs_of(s) {
                assert_eq!(c.arc(s, i), n.arc(s, i));
            }
            for i in 0..n.n_epsilon_arcs_of(s) {
                assert_eq!(c.epsilon_arc(s, i), n.epsilon_arc(s, i));
            }
            assert_eq!(c.is_final(s), n.is_final(s));
        }
        assert_eq!(c.final_weight(2), 0.5);
        assert_eq!(c.final_weight(0), 0.0);
    }
}
