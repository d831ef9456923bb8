// crates/trellis-core/src/lexicon.rs

//! Lexicon contract: alphabets, pronunciations, non-word lemmas.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::symbols::SymbolTable;
use crate::types::{Label, LemmaId, OutputType};

/// One pronunciation variant of a lemma.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pronunciation {
    pub lemma: LemmaId,
    pub phonemes: Vec<Label>,
    /// Negated log pronunciation probability.
    #[serde(default)]
    pub score: f32,
}

/// Alphabets and pronunciations of the recognition vocabulary.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Lexicon {
    pub phonemes: SymbolTable,
    pub lemmas: SymbolTable,
    pub syntactic_tokens: SymbolTable,
    pub pronunciations: Vec<Pronunciation>,
    /// Lemmas carrying no language-model probability (silence, noise).
    #[serde(default)]
    pub non_word_lemmas: Vec<LemmaId>,
    /// Lemma unknown input symbols are mapped to, when configured.
    #[serde(default)]
    pub unknown_lemma: Option<LemmaId>,
}

impl Lexicon {
    /// Rebuild symbol indices after deserialization.
    pub fn rebuild_indices(&mut self) {
        self.phonemes.rebuild_index();
        self.lemmas.rebuild_index();
        self.syntactic_tokens.rebuild_index();
    }

    /// Lemma id of `symbol`; maps to the unknown lemma when configured,
    /// otherwise a `Lexicon` error.
    pub fn lookup_lemma(&self, symbol: &str) -> Result<LemmaId> {
        match self.lemmas.lookup(symbol) {
            Ok(l) => Ok(l),
            Err(e) => self.unknown_lemma.ok_or(e),
        }
    }

    /// Pronunciations of one lemma.
    pub fn pronunciations_of(&self, lemma: LemmaId) -> impl Iterator<Item = &Pronunciation> {
        self.pronunciations.iter().filter(move |p| p.lemma == lemma)
    }

    /// Lemma-pronunciation labels are the 1-based indices into
    /// `pronunciations`; resolve one back to its lemma.
    pub fn lemma_of_pronunciation(&self, label: Label) -> Result<LemmaId> {
        self.pronunciations
            .get(label as usize - 1)
            .map(|p| p.lemma)
            .ok_or_else(|| Error::Lexicon(format!("lemma pronunciation {label}")))
    }

    /// Resolve an output label of the given type to a lemma id.
    pub fn output_to_lemma(&self, label: Label, output: OutputType) -> Result<LemmaId> {
        match output {
            OutputType::Lemma | OutputType::SyntacticToken => Ok(label),
            OutputType::LemmaPronunciation => self.lemma_of_pronunciation(label),
        }
    }

    /// Lemmas without LM probability.
    #[must_use]
    pub fn non_word_lemmas(&self) -> &[LemmaId] {
        &self.non_word_lemmas
    }

    /// Whether `lemma` is a non-word (silence/noise) entry.
    #[must_use]
    pub fn is_non_word(&self, lemma: LemmaId) -> bool {
        self.non_word_lemmas.contains(&lemma)
    }
}
