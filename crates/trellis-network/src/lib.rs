// crates/trellis-network/src/lib.rs

//! Uniform view over a weighted finite-state search network.
//!
//! Four interchangeable back-ends implement the [`Network`] contract:
//! [`StaticNetwork`] (adjacency vectors), [`CompressedNetwork`]
//! (prefix-sum packed arcs), [`ComposedNetwork`] (lazy on-the-fly
//! composition with a grammar), and [`LatticeNetwork`] (a first-pass
//! lattice re-interpreted as the search graph). Back-ends are used as
//! monomorphized generic parameters of the search, so the inner loop
//! has no dynamic dispatch.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod composed;
pub mod compressed;
pub mod file;
pub mod lattice_net;
pub mod static_net;

pub use composed::ComposedNetwork;
pub use compressed::CompressedNetwork;
pub use lattice_net::LatticeNetwork;
pub use static_net::StaticNetwork;

use trellis_core::types::{Label, Score, StateId};

/// A non-epsilon arc: consumes one state sequence worth of acoustics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Arc {
    /// State-sequence label (1-based; never epsilon or a disambiguator).
    pub input: Label,
    /// Output (word-level) label, possibly epsilon.
    pub output: Label,
    /// Tropical arc weight.
    pub weight: Score,
    /// Target state.
    pub target: StateId,
}

/// An epsilon arc: consumes no acoustics (epsilon or disambiguator input).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpsilonArc {
    /// Output (word-level) label, possibly epsilon.
    pub output: Label,
    /// Tropical arc weight.
    pub weight: Score,
    /// Target state.
    pub target: StateId,
}

/// Network back-end contract.
///
/// For each state the arc accessors yield arcs in a fixed order, stable
/// across runs, so pruning decisions are reproducible. Arc access is by
/// value: back-ends that expand lazily memoize internally.
pub trait Network {
    /// Unique initial state.
    fn initial_state(&self) -> StateId;
    /// Number of (expanded) states.
    fn num_states(&self) -> u32;
    /// Number of (expanded) non-epsilon arcs.
    fn num_arcs(&self) -> usize;
    /// Number of (expanded) epsilon arcs.
    fn num_epsilon_arcs(&self) -> usize;
    /// Number of non-epsilon arcs of `state`.
    fn n_arcs_of(&self, state: StateId) -> u32;
    /// The `i`-th non-epsilon arc of `state`.
    fn arc(&self, state: StateId, i: u32) -> Arc;
    /// Number of epsilon arcs of `state`.
    fn n_epsilon_arcs_of(&self, state: StateId) -> u32;
    /// The `i`-th epsilon arc of `state`.
    fn epsilon_arc(&self, state: StateId, i: u32) -> EpsilonArc;
    /// Whether `state` is final.
    fn is_final(&self, state: StateId) -> bool;
    /// Final weight of `state` (semiring one if not final).
    fn final_weight(&self, state: StateId) -> Score;
    /// Grammar (language-model context) projection of `state`, used for
    /// statistics; the identity when the back-end has no factored view.
    fn grammar_state(&self, state: StateId) -> StateId {
        state
    }
    /// Drop per-segment caches.
    fn reset(&mut self) {}
}
