// crates/trellis-network/src/lattice_net.rs

//! A previously emitted lattice used as the search graph for re-decoding.
//!
//! Acoustics are re-scored by the search, so arc weights expose only the
//! language-model component of the stored pair weight.

use tracing::warn;

use trellis_core::types::{Score, StateId, EPSILON};
use trellis_lattice::Lattice;

use crate::{Arc, EpsilonArc, Network};

/// Lattice-as-network back-end.
pub struct LatticeNetwork {
    arcs: Vec<Vec<Arc>>,
    eps_arcs: Vec<Vec<EpsilonArc>>,
    final_weights: Vec<Option<Score>>,
    initial: StateId,
    n_arcs: usize,
    n_eps_arcs: usize,
}

impl LatticeNetwork {
    /// Reinterpret `lattice` as a search network.
    #[must_use]
    pub fn from_lattice(lattice: &Lattice) -> Self {
        let n = lattice.num_states() as usize;
        let mut arcs = vec![Vec::new(); n];
        let mut eps_arcs = vec![Vec::new(); n];
        let mut final_weights = vec![None; n];
        let mut n_arcs = 0;
        let mut n_eps_arcs = 0;
        let mut zero_length_arcs = 0usize;
        for s in 0..lattice.num_states() {
            let state = lattice.state(s);
            final_weights[s as usize] = state.final_weight.map(|f| f.lm);
            for a in &state.arcs {
                if a.input != EPSILON && lattice.word_boundary(a.target) == lattice.word_boundary(s)
                {
                    zero_length_arcs += 1;
                }
                if a.input == EPSILON {
                    eps_arcs[s as usize].push(EpsilonArc {
                        output: a.output,
                        weight: a.weight.lm,
                        target: a.target,
                    });
                    n_eps_arcs += 1;
                } else {
                    arcs[s as usize].push(Arc {
                        input: a.input,
                        output: a.output,
                        weight: a.weight.lm,
                        target: a.target,
                    });
                    n_arcs += 1;
                }
            }
        }
        if zero_length_arcs > 0 {
            warn!(zero_length_arcs, "lattice contains arcs of zero length");
        }
        Self {
            arcs,
            eps_arcs,
            final_weights,
            initial: lattice.initial(),
            n_arcs,
            n_eps_arcs,
        }
    }
}

impl Network for LatticeNetwork {
    fn initial_state(&self) -> StateId {
        self.initial
    }

    fn num_states(&self) -> u32 {
        self.final_weights.len() as u32
    }

    fn num_arcs(&self) -> usize {
        self.n_arcs
    }

    fn num_epsilon_arcs(&self) -> usize {
        self.n_eps_arcs
    }

    #[inline]
    fn n_arcs_of(&self, state: StateId) -> u32 {
        self.arcs[state as usize].len() as u32
    }

    #[inline]
    fn arc(&self, state: StateId, i: u32) -> Arc {
        self.arcs[state as usize][i as usize]
    }

    #[inline]
    fn n_epsilon_arcs_of(&self, state: StateId) -> u32 {
        self.eps_arcs[state as usize].len() as u32
    }

    #[inline]
    fn epsilon_arc(&self, state: StateId, i: u32) -> EpsilonArc {
        self.eps_arcs[state as usize][i as usize]
    }

    fn is_final(&self, state: StateId) -> bool {
        self.final_weights[state as usize].is_some()
    }

    fn final_weight(&self, state: StateId) -> Score {
        self.final_weights[state as usize].unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::semiring::PairWeight;
    use trellis_lattice::LatticeArc;

    #[test]
    fn lm_component_becomes_arc_weight() {
        let mut l = Lattice::new();
        let s0 = l.add_state();
        let s1 = l.add_state();
        l.set_initial(s0);
        l.set_final(s1, PairWeight::new(0.0, 0.25));
        l.add_arc(s0, LatticeArc {
            input: 3,
            output: 9,
            weight: PairWeight::new(4.0, 1.5),
            target: s1,
        });
        l.add_arc(s0, LatticeArc {
            input: EPSILON,
            output: EPSILON,
            weight: PairWeight::new(0.0, 0.5),
            target: s1,
        });
        let n = LatticeNetwork::from_lattice(&l);
        assert_eq!(n.num_arcs(), 1);
        assert_eq!(n.num_epsilon_arcs(), 1);
        assert!((n.arc(0, 0).weight - 1.5).abs() < 1e-6);
        assert!((n.epsilon_arc(0, 0).weight - 0.5).abs() < 1e-6);
        assert!((n.final_weight(1) - 0.25).abs() < 1e-6);
    }
}
