// crates/trellis-search/src/decoder.rs

//! Recognition front end: drives the search space over the buffered
//! feature scorer and produces best paths and lattices.

use std::sync::Arc as SharedArc;

use serde::{Deserialize, Serialize};
use tracing::info;

use trellis_core::am::{AcousticModel, FeatureScorer};
use trellis_core::error::{Error, Result};
use trellis_core::types::{BestPath, OutputType};
use trellis_lattice::Lattice;
use trellis_lookahead::LookaheadScorer;
use trellis_network::Network;

use crate::search_space::{SearchOptions, SearchSpace};

/// Recognizer configuration on top of the search options.
#[derive(Clone, Debug, Default)]
pub struct RecognizerOptions {
    pub search: SearchOptions,
    pub output_type: OutputType,
    /// Yield the sentinel (empty) result for zero-feature segments
    /// instead of an error.
    pub allow_empty_segment: bool,
}

/// One recognized segment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub best_path: BestPath,
    pub frames: u32,
    pub output_type: OutputType,
}

/// Decoder front end over a network back-end `N`.
pub struct Recognizer<N: Network> {
    space: SearchSpace<N>,
    options: RecognizerOptions,
}

impl<N: Network> Recognizer<N> {
    /// Assemble a recognizer.
    pub fn new(
        network: N,
        model: SharedArc<AcousticModel>,
        options: RecognizerOptions,
    ) -> Result<Self> {
        let space = SearchSpace::new(network, model, options.search.clone())?;
        Ok(Self { space, options })
    }

    /// Attach a look-ahead scorer.
    pub fn set_lookahead(&mut self, lookahead: Box<dyn LookaheadScorer>) {
        self.space.set_lookahead(lookahead);
    }

    /// Abort the current segment.
    pub fn reset(&mut self) {
        self.space.reset();
    }

    /// Direct access to the search space.
    pub fn search_space(&mut self) -> &mut SearchSpace<N> {
        &mut self.space
    }

    /// Decode one segment from an already fed feature scorer.
    ///
    /// All features must have been added (`add_feature` + `flush`)
    /// before the call; scores are requested frame-synchronously.
    pub fn recognize(&mut self, scorer: &dyn FeatureScorer) -> Result<RecognitionResult> {
        let frames = scorer.num_frames();
        if frames == 0 && !self.options.allow_empty_segment {
            return Err(Error::Search("segment has no features".into()));
        }
        for t in 0..frames {
            let frame = scorer.scorer_at(t)?;
            self.space.feed(frame.as_ref())?;
        }
        let best_path = self
            .space
            .traceback()
            .ok_or_else(|| Error::Search("no hypothesis survived".into()))?;
        self.space.statistics().log();
        info!(
            frames,
            words = best_path.items.len(),
            score = f64::from(best_path.score),
            "segment decoded"
        );
        Ok(RecognitionResult {
            best_path,
            frames,
            output_type: self.options.output_type,
        })
    }

    /// Lattice of the last decoded segment (lattice generation must be
    /// enabled in the search options).
    pub fn create_lattice(&mut self) -> Option<Lattice> {
        let mut lattice = self.space.create_lattice()?;
        lattice.set_output_type(self.options.output_type);
        Some(lattice)
    }
}
