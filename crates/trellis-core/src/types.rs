// crates/trellis-core/src/types.rs

//! Canonical core types used across the trellis workspace.
//!
//! These live in `trellis-core` and are broadly re-exported at the crate root
//! so other crates can import via `trellis_core::Label`, `trellis_core::Score`, etc.

use serde::{Deserialize, Serialize};

/// Symbol identifier in one of the alphabets (phoneme / HMM state / word /
/// lemma / pronunciation / syntactic token / disambiguator).
pub type Label = u32;

/// The distinguished "no symbol" label.
pub const EPSILON: Label = 0;

/// State identifier within a search network or lattice.
pub type StateId = u32;

/// Sentinel for "no state".
pub const INVALID_STATE: StateId = StateId::MAX;

/// Index of an acoustic frame within a segment (0-based).
pub type TimeframeIndex = u32;

/// Sentinel for "no timeframe".
pub const INVALID_TIME: TimeframeIndex = TimeframeIndex::MAX;

/// Tropical search score. Smaller is better; `Score::INFINITY` is the
/// semiring zero.
pub type Score = f32;

/// Sentinel score used to mark inactive hypotheses.
pub const INVALID_SCORE: Score = Score::INFINITY;

/// Index of an emission distribution of the acoustic model.
pub type EmissionId = u32;

/// Index into the transition-model table of the acoustic model.
pub type TransitionModelIndex = u32;

/// Identifier of a lemma in the lexicon.
pub type LemmaId = u32;

/// Which alphabet the output labels of a network or lattice refer to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    /// Lemma ids.
    Lemma,
    /// Lemma-pronunciation ids.
    LemmaPronunciation,
    /// Syntactic token ids.
    SyntacticToken,
}

impl Default for OutputType {
    fn default() -> Self {
        Self::LemmaPronunciation
    }
}

/// One entry of a recognized best path: the output label and the timeframe
/// of its word end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestPathItem {
    pub time: TimeframeIndex,
    pub label: Label,
}

/// Word sequence with word-end times and the total unscaled score,
/// as produced by trace-back.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BestPath {
    pub items: Vec<BestPathItem>,
    pub score: f32,
}

impl BestPath {
    /// Output labels without times.
    #[must_use]
    pub fn labels(&self) -> Vec<Label> {
        self.items.iter().map(|i| i.label).collect()
    }
}
