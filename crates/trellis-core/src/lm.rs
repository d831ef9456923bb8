// crates/trellis-core/src/lm.rs

//! Language model contract and a compact in-memory backoff n-gram.
//!
//! Histories are immutable shared word tuples; `extend` appends a lemma
//! and truncates to the model order, `reduced_history` truncates to a
//! shorter effective m-grammity for recombination and look-ahead.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::types::{LemmaId, Score};

/// Immutable LM history: the most recent lemmas, newest last.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct History(Arc<[LemmaId]>);

impl History {
    #[must_use]
    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    #[must_use]
    pub fn from_words(words: &[LemmaId]) -> Self {
        Self(Arc::from(words))
    }

    #[must_use]
    pub fn words(&self) -> &[LemmaId] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Language model contract (§6).
pub trait LanguageModel {
    /// History at sentence start.
    fn start_history(&self) -> History;

    /// History after observing `lemma`.
    fn extend(&self, history: &History, lemma: LemmaId) -> History;

    /// Negated log probability of `lemma` given `history`.
    fn score(&self, history: &History, lemma: LemmaId) -> Score;

    /// Negated log probability of the sentence end given `history`.
    fn sentence_end_score(&self, history: &History) -> Score;

    /// Truncate `history` to its `n` most recent lemmas.
    fn reduced_history(&self, history: &History, n: u32) -> History {
        let w = history.words();
        if w.len() <= n as usize {
            history.clone()
        } else {
            History::from_words(&w[w.len() - n as usize..])
        }
    }

    /// Number of lemmas with an explicit n-gram continuation of `history`.
    /// Used by the look-ahead sparseness prediction.
    fn num_extensions(&self, history: &History) -> u32;

    /// Backoff unigram cost of `lemma` (background score of sparse
    /// look-ahead tables).
    fn unigram_score(&self, lemma: LemmaId) -> Score;

    /// Vocabulary size.
    fn vocab_size(&self) -> u32;
}

/// Distinguished sentence-end lemma of [`NGramModel`] files.
pub const SENTENCE_END: LemmaId = LemmaId::MAX;

/// One n-gram entry: cost and backoff penalty of the context.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct NGram {
    pub score: Score,
    pub backoff: Score,
}

/// In-memory backoff n-gram model over integer lemmas.
///
/// Scoring follows the usual recursion: if `(history, lemma)` has an
/// explicit entry its score is used, otherwise the backoff penalty of
/// `history` is added and the history is shortened by its oldest word.
#[derive(Clone, Debug)]
pub struct NGramModel {
    order: u32,
    vocab_size: u32,
    /// Keyed by the full n-gram (context ++ word).
    entries: FxHashMap<Vec<LemmaId>, NGram>,
}

/// Serializable form of one n-gram line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NGramEntry {
    pub context: Vec<LemmaId>,
    pub word: LemmaId,
    pub score: Score,
    #[serde(default)]
    pub backoff: Score,
}

/// On-disk form of an [`NGramModel`] (JSON/CBOR via the io helpers).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NGramModelFile {
    pub order: u32,
    pub vocab_size: u32,
    pub entries: Vec<NGramEntry>,
}

impl From<NGramModelFile> for NGramModel {
    fn from(f: NGramModelFile) -> Self {
        let mut m = Self::new(f.order, f.vocab_size);
        for e in f.entries {
            m.insert(&e.context, e.word, e.score, e.backoff);
        }
        m
    }
}

impl NGramModel {
    #[must_use]
    pub fn new(order: u32, vocab_size: u32) -> Self {
        Self {
            order,
            vocab_size,
            entries: FxHashMap::default(),
        }
    }

    /// Insert an n-gram `context ++ [word]` with the given cost/backoff.
    pub fn insert(&mut self, context: &[LemmaId], word: LemmaId, score: Score, backoff: Score) {
        let mut key = context.to_vec();
        key.push(word);
        self.entries.insert(key, NGram { score, backoff });
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    fn lookup(&self, context: &[LemmaId], word: LemmaId) -> Option<&NGram> {
        let mut key = Vec::with_capacity(context.len() + 1);
        key.extend_from_slice(context);
        key.push(word);
        self.entries.get(&key)
    }

    fn backoff_weight(&self, context: &[LemmaId]) -> Score {
        if context.is_empty() {
            return 0.0;
        }
        self.entries
            .get(context)
            .map_or(0.0, |e| e.backoff)
    }

    fn score_context(&self, mut context: &[LemmaId], word: LemmaId) -> Score {
        let mut backoff = 0.0;
        loop {
            if let Some(e) = self.lookup(context, word) {
                return backoff + e.score;
            }
            if context.is_empty() {
                // Unseen even as a unigram: flat cost over the vocabulary.
                return backoff + (f64::from(self.vocab_size.max(1))).ln() as Score;
            }
            backoff += self.backoff_weight(context);
            context = &context[1..];
        }
    }
}

impl LanguageModel for NGramModel {
    fn start_history(&self) -> History {
        History::empty()
    }

    fn extend(&self, history: &History, lemma: LemmaId) -> History {
        let keep = (self.order.saturating_sub(1)) as usize;
        let mut next = history.words().to_vec();
        next.push(lemma);
        if next.len() > keep {
            next.drain(..next.len() - keep);
        }
        History::from_words(&next)
    }

    fn score(&self, history: &History, lemma: LemmaId) -> Score {
        self.score_context(history.words(), lemma)
    }

    fn sentence_end_score(&self, history: &History) -> Score {
        self.score_context(history.words(), SENTENCE_END)
    }

    fn num_extensions(&self, history: &History) -> u32 {
        let ctx = history.words();
        self.entries
            .keys()
            .filter(|k| k.len() == ctx.len() + 1 && k[..ctx.len()] == *ctx)
            .count() as u32
    }

    fn unigram_score(&self, lemma: LemmaId) -> Score {
        self.score_context(&[], lemma)
    }

    fn vocab_size(&self) -> u32 {
        self.vocab_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bigram() -> NGramModel {
        let mut m = NGramModel::new(2, 2);
        // p(A) = 0.6, p(B) = 0.4
        m.insert(&[], 0, -(0.6f32.ln()), 0.5);
        m.insert(&[], 1, -(0.4f32.ln()), 0.0);
        // p(B | A) = 0.9
        m.insert(&[0], 1, -(0.9f32.ln()), 0.0);
        m
    }

    #[test]
    fn explicit_ngram_wins() {
        let m = bigram();
        let h = m.extend(&m.start_history(), 0);
        assert!((m.score(&h, 1) - -(0.9f32.ln())).abs() < 1e-6);
    }

    #[test]
    fn backoff_adds_penalty() {
        let m = bigram();
        let h = m.extend(&m.start_history(), 0);
        // (A, A) unseen -> backoff(A) + p(A)
        let expected = 0.5 + -(0.6f32.ln());
        assert!((m.score(&h, 0) - expected).abs() < 1e-6);
    }

    #[test]
    fn history_truncated_to_order() {
        let m = bigram();
        let mut h = m.start_history();
        for w in [0, 1, 0, 1] {
            h = m.extend(&h, w);
        }
        assert_eq!(h.words(), &[1]);
    }

    #[test]
    fn reduced_history() {
        let m = NGramModel::new(4, 10);
        let mut h = m.start_history();
        for w in [1, 2, 3] {
            h = m.extend(&h, w);
        }
        assert_eq!(m.reduced_history(&h, 2).words(), &[2, 3]);
        assert_eq!(m.reduced_history(&h, 8), h);
    }

    #[test]
    fn num_extensions_counts_contexts() {
        let m = bigram();
        assert_eq!(m.num_extensions(&m.start_history()), 2);
        let h = m.extend(&m.start_history(), 0);
        assert_eq!(m.num_extensions(&h), 1);
    }
}
