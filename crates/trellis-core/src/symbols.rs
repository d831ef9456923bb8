// crates/trellis-core/src/symbols.rs

//! Bidirectional symbol tables.
//!
//! Label 0 is reserved for epsilon in every alphabet; the first added
//! symbol receives label 1.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Label, EPSILON};

/// String ↔ label mapping for one alphabet.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: Vec<String>,
    #[serde(skip)]
    index: FxHashMap<String, Label>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `symbol` if absent; returns its label (1-based).
    pub fn add(&mut self, symbol: &str) -> Label {
        if let Some(&l) = self.index.get(symbol) {
            return l;
        }
        self.symbols.push(symbol.to_owned());
        let label = self.symbols.len() as Label;
        self.index.insert(symbol.to_owned(), label);
        label
    }

    /// Label of `symbol`, or a `Lexicon` error.
    pub fn lookup(&self, symbol: &str) -> Result<Label> {
        self.index
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::Lexicon(symbol.to_owned()))
    }

    /// Symbol of `label`; `None` for epsilon or out-of-range labels.
    #[must_use]
    pub fn symbol(&self, label: Label) -> Option<&str> {
        if label == EPSILON {
            return None;
        }
        self.symbols.get(label as usize - 1).map(String::as_str)
    }

    /// Number of non-epsilon symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Rebuild the lookup index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.index = self
            .symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), (i + 1) as Label))
            .collect();
    }
}
