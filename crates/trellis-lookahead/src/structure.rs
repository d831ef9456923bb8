// crates/trellis-lookahead/src/structure.rs

//! The look-ahead tree built over the search network.
//!
//! To enhance reuse, the tree structure is independent from the HMM
//! state structure of the network: non-branching chains collapse into
//! one node, chains whose minimum depth exceeds the cutoff merge with
//! their parent, and nodes representing fewer than
//! `minimum_representation` HMM states merge with their parent. Each
//! node keeps the word ends of its own region; subtree minimization
//! happens at table-fill time through the parent links.

use serde::{Deserialize, Serialize};

use trellis_core::state_sequence::StateSequenceList;
use trellis_core::types::{Label, StateId, EPSILON, INVALID_STATE};
use trellis_network::Network;

/// Sentinel node id.
pub const INVALID_NODE: u32 = u32::MAX;

/// One node of the look-ahead tree.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LookaheadNode {
    /// Parent node (`INVALID_NODE` at the root).
    pub parent: u32,
    /// Minimum depth of the node's region in HMM states.
    pub depth: u32,
    /// Number of network states represented by this node.
    pub n_states: u32,
    /// Output labels of word ends in this node's own region.
    pub ends: Vec<Label>,
}

/// File magic of the structure cache archive.
pub const STRUCTURE_MAGIC: u32 = 0x544c_4153; // "TLAS"

/// The look-ahead tree plus the network-state → node mapping.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LookaheadStructure {
    pub magic: u32,
    nodes: Vec<LookaheadNode>,
    node_for_state: Vec<u32>,
}

impl LookaheadStructure {
    /// Build the tree over `network`.
    ///
    /// `tree_cutoff` limits the network depth covered in detail;
    /// `minimum_representation` is the smallest region size kept as an
    /// own node.
    pub fn build<N: Network>(
        network: &N,
        sequences: &StateSequenceList,
        tree_cutoff: u32,
        minimum_representation: u32,
    ) -> Self {
        let n = network.num_states() as usize;
        let mut fan_in = vec![0u32; n];
        let mut fan_out = vec![0u32; n];
        // Unique predecessor, or INVALID_STATE for none / several.
        let mut pred = vec![INVALID_STATE; n];
        let mut depth = vec![u32::MAX; n];
        let mut order = Vec::with_capacity(n);

        // BFS from the initial state: minimum depth in HMM states,
        // fan-in/fan-out counts, unique predecessors.
        let root = network.initial_state();
        depth[root as usize] = 0;
        let mut queue = std::collections::VecDeque::from([root]);
        let mut enqueued = vec![false; n];
        enqueued[root as usize] = true;
        while let Some(s) = queue.pop_front() {
            order.push(s);
            let d = depth[s as usize];
            let mut note = |target: StateId, len: u32| {
                let t = target as usize;
                fan_in[t] += 1;
                fan_out[s as usize] += 1;
                pred[t] = if fan_in[t] == 1 { s } else { INVALID_STATE };
                if d + len < depth[t] {
                    depth[t] = d + len;
                }
                if !enqueued[t] {
                    enqueued[t] = true;
                    queue.push_back(target);
                }
            };
            for i in 0..network.n_arcs_of(s) {
                let a = network.arc(s, i);
                let len = sequences
                    .sequence_for_label(a.input)
                    .map_or(1, |id| sequences.len(id)) as u32;
                note(a.target, len);
            }
            for i in 0..network.n_epsilon_arcs_of(s) {
                note(network.epsilon_arc(s, i).target, 0);
            }
        }

        // Assign nodes in BFS order: a state opens a new node at the
        // root, at fan-in points, and where the predecessor branches;
        // plain chains collapse into the predecessor's node.
        let mut structure = Self {
            magic: STRUCTURE_MAGIC,
            nodes: Vec::new(),
            node_for_state: vec![INVALID_NODE; n],
        };
        for &s in &order {
            let su = s as usize;
            let parent_node = if pred[su] == INVALID_STATE {
                INVALID_NODE
            } else {
                structure.node_for_state[pred[su] as usize]
            };
            let collapse = s != root
                && parent_node != INVALID_NODE
                && fan_in[su] == 1
                && fan_out[pred[su] as usize] == 1;
            if collapse {
                structure.node_for_state[su] = parent_node;
                structure.nodes[parent_node as usize].n_states += 1;
            } else {
                let id = structure.nodes.len() as u32;
                structure.nodes.push(LookaheadNode {
                    parent: parent_node,
                    depth: depth[su],
                    n_states: 1,
                    ends: Vec::new(),
                });
                structure.node_for_state[su] = id;
            }
            // Word ends attach to the node of the arc's source region.
            let node = structure.node_for_state[su] as usize;
            for i in 0..network.n_arcs_of(s) {
                let a = network.arc(s, i);
                if a.output != EPSILON {
                    structure.nodes[node].ends.push(a.output);
                }
            }
            for i in 0..network.n_epsilon_arcs_of(s) {
                let a = network.epsilon_arc(s, i);
                if a.output != EPSILON {
                    structure.nodes[node].ends.push(a.output);
                }
            }
        }

        structure.merge_small_and_deep(tree_cutoff, minimum_representation);
        structure
    }

    /// Merge nodes beyond the depth cutoff or below the representation
    /// minimum into their parents, remapping the state table.
    fn merge_small_and_deep(&mut self, tree_cutoff: u32, minimum_representation: u32) {
        let mut remap: Vec<u32> = (0..self.nodes.len() as u32).collect();
        for id in (0..self.nodes.len()).rev() {
            let parent = self.nodes[id].parent;
            if parent == INVALID_NODE {
                continue;
            }
            let too_deep = self.nodes[id].depth > tree_cutoff;
            let too_small = self.nodes[id].n_states < minimum_representation;
            if too_deep || too_small {
                let target = resolve(&remap, parent);
                remap[id] = target;
                let (ends, n_states) = {
                    let node = &mut self.nodes[id];
                    (std::mem::take(&mut node.ends), node.n_states)
                };
                let t = &mut self.nodes[target as usize];
                t.ends.extend(ends);
                t.n_states += n_states;
            }
        }
        // Compact: renumber surviving nodes; parents precede children.
        let mut new_ids = vec![INVALID_NODE; self.nodes.len()];
        let mut kept = Vec::new();
        for id in 0..self.nodes.len() {
            if remap[id] == id as u32 {
                new_ids[id] = kept.len() as u32;
                kept.push(self.nodes[id].clone());
            }
        }
        for node in &mut kept {
            if node.parent != INVALID_NODE {
                node.parent = new_ids[resolve(&remap, node.parent) as usize];
            }
        }
        for entry in &mut self.node_for_state {
            if *entry != INVALID_NODE {
                *entry = new_ids[resolve(&remap, *entry) as usize];
            }
        }
        self.nodes = kept;
    }

    /// Number of look-ahead nodes.
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Node of a network state.
    #[must_use]
    pub fn node_for_state(&self, state: StateId) -> u32 {
        self.node_for_state
            .get(state as usize)
            .copied()
            .unwrap_or(INVALID_NODE)
    }

    /// Node accessor.
    #[must_use]
    pub fn node(&self, id: u32) -> &LookaheadNode {
        &self.nodes[id as usize]
    }

    /// All nodes; every parent id is smaller than its children's ids.
    #[must_use]
    pub fn nodes(&self) -> &[LookaheadNode] {
        &self.nodes
    }
}

fn resolve(remap: &[u32], mut id: u32) -> u32 {
    while remap[id as usize] != id {
        id = remap[id as usize];
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::state_sequence::{HmmState, StateSequenceList};
    use trellis_network::StaticNetwork;

    fn sequences() -> StateSequenceList {
        let mut l = StateSequenceList::new();
        for e in 0..6 {
            l.push(&[HmmState { emission: e, transition: 0 }], true, true);
        }
        l
    }

    /// 0 →1→ 2 branches to 3 (word 7) and 4 (word 8).
    fn chain_then_branch() -> (StaticNetwork, StateSequenceList) {
        let seqs = sequences();
        let mut n = StaticNetwork::with_states(5);
        n.add_arc(0, 1, EPSILON, 0.0, 1, &seqs);
        n.add_arc(1, 2, EPSILON, 0.0, 2, &seqs);
        n.add_arc(2, 3, 7, 0.0, 3, &seqs);
        n.add_arc(2, 4, 8, 0.0, 4, &seqs);
        n.set_final(3, 0.0);
        n.set_final(4, 0.0);
        (n, seqs)
    }

    #[test]
    fn chains_collapse_into_one_node() {
        let (n, seqs) = chain_then_branch();
        let s = LookaheadStructure::build(&n, &seqs, u32::MAX, 1);
        // The 0→1→2 chain shares a node; both words attach to it.
        assert_eq!(s.node_for_state(0), s.node_for_state(1));
        assert_eq!(s.node_for_state(1), s.node_for_state(2));
        let root = s.node_for_state(0);
        let mut ends = s.node(root).ends.clone();
        ends.sort_unstable();
        assert_eq!(ends, vec![7, 8]);
    }

    #[test]
    fn branch_targets_get_own_nodes() {
        let (n, seqs) = chain_then_branch();
        let s = LookaheadStructure::build(&n, &seqs, u32::MAX, 1);
        assert_ne!(s.node_for_state(3), s.node_for_state(4));
        assert_eq!(s.node(s.node_for_state(3)).parent, s.node_for_state(2));
    }

    #[test]
    fn cutoff_merges_deep_nodes() {
        let (n, seqs) = chain_then_branch();
        let full = LookaheadStructure::build(&n, &seqs, u32::MAX, 1);
        let cut = LookaheadStructure::build(&n, &seqs, 1, 1);
        assert!(cut.n_nodes() <= full.n_nodes());
        for state in 0..5 {
            assert_ne!(cut.node_for_state(state), INVALID_NODE);
        }
    }

    #[test]
    fn minimum_representation_merges_small_nodes() {
        let (n, seqs) = chain_then_branch();
        let merged = LookaheadStructure::build(&n, &seqs, u32::MAX, 16);
        assert_eq!(merged.n_nodes(), 1);
    }
}
