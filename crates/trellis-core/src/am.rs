// crates/trellis-core/src/am.rs

//! Acoustic model and feature scorer contracts.
//!
//! The decoder never evaluates acoustics itself; it consults a
//! [`FeatureScorer`] through a blocking contract. The contract is
//! buffered: all features of the current segment are added before the
//! first score request for the last frame; no other ordering is assumed.
//!
//! ## Contracts implementors should uphold
//! - `scorer_at(t)` must be callable for any `t < num_frames()` once the
//!   corresponding feature has been added.
//! - Scores are additive tropical costs (negated log likelihoods).
//!   Returning NaN is a contract violation and fatal for the decoder.
//! - `reset` drops all buffered features; in-flight requests become
//!   unobservable.

use crate::error::{Error, Result};
use crate::state_sequence::StateSequenceList;
use crate::types::{EmissionId, Score, TimeframeIndex, TransitionModelIndex};

/// Transition score indices within a [`TransitionModel`].
pub const TDP_LOOP: usize = 0;
pub const TDP_FORWARD: usize = 1;
pub const TDP_SKIP: usize = 2;
pub const TDP_EXIT: usize = 3;
pub const TDP_ENTRY_FORWARD: usize = 4;
pub const TDP_ENTRY_SKIP: usize = 5;

/// Additive tropical costs [loop, forward, skip, exit, entry-forward,
/// entry-skip] of one transition model.
pub type TransitionModel = [Score; 6];

/// Per-frame scorer handed out by a [`FeatureScorer`].
pub trait Scorer {
    /// Acoustic cost of `emission` at this frame.
    fn score(&self, emission: EmissionId) -> Score;
}

/// Buffered acoustic scoring contract.
pub trait FeatureScorer {
    /// Dimensionality of the emission index space.
    fn num_emissions(&self) -> u32;

    /// Buffer one feature vector.
    ///
    /// # Errors
    /// `Model` on a dimension mismatch.
    fn add_feature(&mut self, features: &[f32]) -> Result<()>;

    /// Signal that all features of the segment have been added.
    fn flush(&mut self);

    /// Number of buffered frames.
    fn num_frames(&self) -> TimeframeIndex;

    /// Scorer for the frame at `time`.
    ///
    /// # Errors
    /// `Model` if `time` is outside the buffered segment.
    fn scorer_at(&self, time: TimeframeIndex) -> Result<Box<dyn Scorer + '_>>;

    /// Abort the segment and drop buffered features.
    fn reset(&mut self);
}

/// Acoustic model bundle: state sequences, transition models, emission count.
pub struct AcousticModel {
    state_sequences: StateSequenceList,
    transition_models: Vec<TransitionModel>,
    num_emissions: u32,
    entry_model: TransitionModelIndex,
}

impl AcousticModel {
    /// Assemble a model.
    ///
    /// # Errors
    /// `Model` if the entry transition model is missing.
    pub fn new(
        state_sequences: StateSequenceList,
        transition_models: Vec<TransitionModel>,
        num_emissions: u32,
        entry_model: TransitionModelIndex,
    ) -> Result<Self> {
        if entry_model as usize >= transition_models.len() {
            return Err(Error::Model(format!(
                "entry transition model {entry_model} missing (have {})",
                transition_models.len()
            )));
        }
        Ok(Self {
            state_sequences,
            transition_models,
            num_emissions,
            entry_model,
        })
    }

    #[must_use]
    pub fn state_sequences(&self) -> &StateSequenceList {
        &self.state_sequences
    }

    #[must_use]
    pub fn num_emissions(&self) -> u32 {
        self.num_emissions
    }

    #[must_use]
    pub fn n_transition_models(&self) -> usize {
        self.transition_models.len()
    }

    /// Transition model by index.
    ///
    /// # Errors
    /// `Model` on a missing transition model.
    pub fn state_transition(&self, tdp: TransitionModelIndex) -> Result<&TransitionModel> {
        self.transition_models
            .get(tdp as usize)
            .ok_or_else(|| Error::Model(format!("missing transition model {tdp}")))
    }

    /// Forward cost of entering the first state of a word-initial allophone.
    #[must_use]
    pub fn entry_forward_score(&self) -> Score {
        self.transition_models[self.entry_model as usize][TDP_ENTRY_FORWARD]
    }

    /// Skip cost of entering the second state of a word-initial allophone.
    #[must_use]
    pub fn entry_skip_score(&self) -> Score {
        self.transition_models[self.entry_model as usize][TDP_ENTRY_SKIP]
    }
}

/// Matrix-backed feature scorer: row `t` holds the per-emission costs of
/// frame `t`. Backs the tests and file-driven recognition.
#[derive(Clone, Debug, Default)]
pub struct TableScorer {
    num_emissions: u32,
    rows: Vec<Vec<f32>>,
}

impl TableScorer {
    #[must_use]
    pub fn new(num_emissions: u32) -> Self {
        Self {
            num_emissions,
            rows: Vec::new(),
        }
    }

    /// Build a scorer from pre-computed rows.
    ///
    /// # Errors
    /// `Model` if any row has the wrong width or a NaN entry.
    pub fn from_rows(num_emissions: u32, rows: Vec<Vec<f32>>) -> Result<Self> {
        let mut s = Self::new(num_emissions);
        for row in rows {
            s.add_feature(&row)?;
        }
        Ok(s)
    }
}

struct TableFrame<'a> {
    row: &'a [f32],
}

impl Scorer for TableFrame<'_> {
    #[inline]
    fn score(&self, emission: EmissionId) -> Score {
        self.row[emission as usize]
    }
}

impl FeatureScorer for TableScorer {
    fn num_emissions(&self) -> u32 {
        self.num_emissions
    }

    fn add_feature(&mut self, features: &[f32]) -> Result<()> {
        if features.len() != self.num_emissions as usize {
            return Err(Error::Model(format!(
                "feature dimension {} does not match {} emissions",
                features.len(),
                self.num_emissions
            )));
        }
        if features.iter().any(|f| f.is_nan()) {
            return Err(Error::Model("NaN acoustic score".into()));
        }
        self.rows.push(features.to_vec());
        Ok(())
    }

    fn flush(&mut self) {}

    fn num_frames(&self) -> TimeframeIndex {
        self.rows.len() as TimeframeIndex
    }

    fn scorer_at(&self, time: TimeframeIndex) -> Result<Box<dyn Scorer + '_>> {
        let row = self
            .rows
            .get(time as usize)
            .ok_or_else(|| Error::Model(format!("no features for frame {time}")))?;
        Ok(Box::new(TableFrame { row }))
    }

    fn reset(&mut self) {
        self.rows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_scorer_contract() {
        let mut s = TableScorer::new(2);
        s.add_feature(&[0.5, 1.0]).unwrap();
        s.add_feature(&[0.0, 2.0]).unwrap();
        s.flush();
        assert_eq!(s.num_frames(), 2);
        assert_eq!(s.scorer_at(1).unwrap().score(1), 2.0);
        assert!(s.scorer_at(2).is_err());
        s.reset();
        assert_eq!(s.num_frames(), 0);
    }

    #[test]
    fn nan_feature_rejected() {
        let mut s = TableScorer::new(1);
        assert!(matches!(
            s.add_feature(&[f32::NAN]),
            Err(Error::Model(_))
        ));
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let mut s = TableScorer::new(3);
        assert!(s.add_feature(&[1.0]).is_err());
    }
}
