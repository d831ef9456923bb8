// crates/trellis-lookahead/src/lib.rs

//! Language-model look-ahead.
//!
//! For every LM history required by the active beam, a table maps
//! look-ahead nodes of the search network to the minimum LM cost over
//! any word end reachable from that node. Scores are admissible lower
//! bounds, additive to the tropical arc cost of the search, and are
//! re-evaluated at word ends when the history changes.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod cache;
pub mod structure;
pub mod table;

pub use cache::{CacheStatistics, LmLookahead, LookaheadOptions, TableHandle};
pub use structure::{LookaheadStructure, INVALID_NODE};
pub use table::Table;

use trellis_core::types::{Score, StateId};

/// Anticipated-score provider consulted by the beam search when it
/// creates state hypotheses. The returned score is an admissible lower
/// bound on the remaining LM cost and is used for pruning only.
pub trait LookaheadScorer {
    /// Look-ahead score for `node_state` under the LM context identified
    /// by `grammar_state`.
    fn anticipate(&mut self, grammar_state: StateId, node_state: StateId) -> Score;

    /// Drop per-segment state (active tables, context bindings).
    fn reset(&mut self);
}
