// crates/trellis-network/src/static_net.rs

//! Straightforward adjacency-vector back-end and network builder.

use trellis_core::error::{Error, Result};
use trellis_core::state_sequence::StateSequenceList;
use trellis_core::types::{Label, Score, StateId, EPSILON};

use crate::{Arc, EpsilonArc, Network};

#[derive(Clone, Debug, Default)]
struct StateData {
    arcs: Vec<Arc>,
    epsilon_arcs: Vec<EpsilonArc>,
    final_weight: Option<Score>,
}

/// Adjacency-vector network. Also the canonical in-memory form produced
/// by the container reader; the other static back-ends convert from it.
#[derive(Clone, Debug, Default)]
pub struct StaticNetwork {
    states: Vec<StateData>,
    initial: StateId,
    n_arcs: usize,
    n_epsilon_arcs: usize,
}

impl StaticNetwork {
    /// Empty network with `n` states and initial state 0.
    #[must_use]
    pub fn with_states(n: u32) -> Self {
        Self {
            states: vec![StateData::default(); n as usize],
            initial: 0,
            n_arcs: 0,
            n_epsilon_arcs: 0,
        }
    }

    /// Add a state; returns its id.
    pub fn add_state(&mut self) -> StateId {
        self.states.push(StateData::default());
        (self.states.len() - 1) as StateId
    }

    /// Set the initial state.
    pub fn set_initial(&mut self, state: StateId) {
        self.initial = state;
    }

    /// Mark `state` final.
    pub fn set_final(&mut self, state: StateId, weight: Score) {
        self.states[state as usize].final_weight = Some(weight);
    }

    /// Add an arc; epsilon and disambiguator inputs go to the epsilon
    /// block, everything else to the non-epsilon block.
    pub fn add_arc(
        &mut self,
        from: StateId,
        input: Label,
        output: Label,
        weight: Score,
        target: StateId,
        sequences: &StateSequenceList,
    ) {
        if input == EPSILON || sequences.is_disambiguator(input) {
            self.states[from as usize].epsilon_arcs.push(EpsilonArc {
                output,
                weight,
                target,
            });
            self.n_epsilon_arcs += 1;
        } else {
            self.states[from as usize].arcs.push(Arc {
                input,
                output,
                weight,
                target,
            });
            self.n_arcs += 1;
        }
    }

    /// Validate the invariants of §3: a unique initial state inside the
    /// network, reachable finals, and arc targets in range.
    pub fn validate(&self) -> Result<()> {
        if self.states.is_empty() {
            return Err(Error::Search("empty network".into()));
        }
        let n = self.states.len() as u32;
        if self.initial >= n {
            return Err(Error::state_out_of_range(self.initial, n));
        }
        for (s, state) in self.states.iter().enumerate() {
            for target in state
                .arcs
                .iter()
                .map(|a| a.target)
                .chain(state.epsilon_arcs.iter().map(|a| a.target))
            {
                if target >= n {
                    return Err(Error::Format(format!(
                        "arc {s}→{target} leaves the network"
                    )));
                }
            }
        }
        // Reachability of at least one final from the initial state.
        let mut seen = vec![false; self.states.len()];
        let mut stack = vec![self.initial];
        seen[self.initial as usize] = true;
        while let Some(s) = stack.pop() {
            let state = &self.states[s as usize];
            if state.final_weight.is_some() {
                return Ok(());
            }
            for target in state
                .arcs
                .iter()
                .map(|a| a.target)
                .chain(state.epsilon_arcs.iter().map(|a| a.target))
            {
                if !seen[target as usize] {
                    seen[target as usize] = true;
                    stack.push(target);
                }
            }
        }
        Err(Error::Search("no final state reachable".into()))
    }

    pub(crate) fn state_arcs(&self, state: StateId) -> &[Arc] {
        &self.states[state as usize].arcs
    }

    pub(crate) fn state_epsilon_arcs(&self, state: StateId) -> &[EpsilonArc] {
        &self.states[state as usize].epsilon_arcs
    }
}

impl Network for StaticNetwork {
    fn initial_state(&self) -> StateId {
        self.initial
    }

    fn num_states(&self) -> u32 {
        self.states.len() as u32
    }

    fn num_arcs(&self) -> usize {
        self.n_arcs
    }

    fn num_epsilon_arcs(&self) -> usize {
        self.n_epsilon_arcs
    }

    #[inline]
    fn n_arcs_of(&self, state: StateId) -> u32 {
        self.states[state as usize].arcs.len() as u32
    }

    #[inline]
    fn arc(&self, state: StateId, i: u32) -> Arc {
        self.states[state as usize].arcs[i as usize]
    }

    #[inline]
    fn n_epsilon_arcs_of(&self, state: StateId) -> u32 {
        self.states[state as usize].epsilon_arcs.len() as u32
    }

    #[inline]
    fn epsilon_arc(&self, state: StateId, i: u32) -> EpsilonArc {
        self.states[state as usize].epsilon_arcs[i as usize]
    }

    fn is_final(&self, state: StateId) -> bool {
        self.states[state as usize].final_weight.is_some()
    }

    fn final_weight(&self, state: StateId) -> Score {
        self.states[state as usize].final_weight.unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequences() -> StateSequenceList {
        let mut l = StateSequenceList::new();
        l.push(
            &[trellis_core::state_sequence::HmmState { emission: 0, transition: 0 }],
            true,
            true,
        );
        l.set_disambiguator_range(50, 2);
        l
    }

    #[test]
    fn arcs_segregated_by_input() {
        let seqs = sequences();
        let mut n = StaticNetwork::with_states(2);
        n.add_arc(0, 1, 5, 0.5, 1, &seqs);
        n.add_arc(0, EPSILON, 6, 0.1, 1, &seqs);
        n.add_arc(0, 50, EPSILON, 0.0, 1, &seqs); // disambiguator
        n.set_final(1, 0.0);
        assert_eq!(n.n_arcs_of(0), 1);
        assert_eq!(n.n_epsilon_arcs_of(0), 2);
        assert_eq!(n.num_arcs(), 1);
        assert_eq!(n.num_epsilon_arcs(), 2);
        n.validate().unwrap();
    }

    #[test]
    fn empty_network_invalid() {
        let n = StaticNetwork::default();
        assert!(matches!(n.validate(), Err(Error::Search(_))));
    }

    #[test]
    fn unreachable_final_invalid() {
        let seqs = sequences();
        let mut n = StaticNetwork::with_states(3);
        n.add_arc(0, 1, EPSILON, 0.0, 1, &seqs);
        n.set_final(2, 0.0); // unreachable
        assert!(matches!(n.validate(), Err(Error::Search(_))));
    }
}
