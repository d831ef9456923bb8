// crates/trellis-core/src/hmm_list.rs

//! Conversion of an HTK-style HMM list into a tied [`StateSequenceList`].
//!
//! Each input line names one allophone HMM followed by its per-state
//! emission symbols:
//!
//! ```text
//! a/sil_sil  a.0 a.1 a.2
//! ```
//!
//! Emission symbols are resolved through a symbol table. Sequences are
//! tied by their full (emissions, transitions, flags) key, so converting
//! the same list twice — or an extended list with unchanged tying —
//! yields the same ids for the shared sequences.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::state_sequence::{HmmState, StateSequenceList};
use crate::symbols::SymbolTable;

/// Tying key: the exact state sequence plus its flags.
#[derive(Clone, PartialEq, Eq, Hash)]
struct TieKey {
    states: Vec<HmmState>,
    initial: bool,
    is_final: bool,
}

/// Accumulates sequences, collapsing ties to the minimal set.
#[derive(Default)]
pub struct TiedStateSequenceMap {
    ids: FxHashMap<TieKey, usize>,
    list: StateSequenceList,
}

impl TiedStateSequenceMap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: FxHashMap::default(),
            list: StateSequenceList::new(),
        }
    }

    /// Id of the given sequence, inserting it if new.
    pub fn id_for(&mut self, states: &[HmmState], initial: bool, is_final: bool) -> usize {
        let key = TieKey {
            states: states.to_vec(),
            initial,
            is_final,
        };
        if let Some(&id) = self.ids.get(&key) {
            return id;
        }
        let id = self.list.push(states, initial, is_final);
        self.ids.insert(key, id);
        id
    }

    /// Finish and hand out the tied list.
    #[must_use]
    pub fn into_list(self) -> StateSequenceList {
        self.list
    }

    #[must_use]
    pub fn n_sequences(&self) -> usize {
        self.list.n_sequences()
    }
}

/// Converter state: symbol tables for HMM names and emission symbols.
pub struct HmmListConverter {
    hmm_symbols: SymbolTable,
    emission_symbols: SymbolTable,
    default_transition: u32,
}

impl HmmListConverter {
    #[must_use]
    pub fn new(default_transition: u32) -> Self {
        Self {
            hmm_symbols: SymbolTable::new(),
            emission_symbols: SymbolTable::new(),
            default_transition,
        }
    }

    /// Parse an HMM list and return the tied sequence store.
    ///
    /// # Errors
    /// `Format` on lines without emissions.
    pub fn convert(&mut self, text: &str) -> Result<StateSequenceList> {
        let mut tied = TiedStateSequenceMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let name = fields
                .next()
                .ok_or_else(|| Error::Format(format!("hmm list line {} empty", lineno + 1)))?;
            self.hmm_symbols.add(name);
            let states: Vec<HmmState> = fields
                .map(|sym| HmmState {
                    emission: self.emission_symbols.add(sym) - 1,
                    transition: self.default_transition,
                })
                .collect();
            if states.is_empty() {
                return Err(Error::Format(format!(
                    "hmm '{}' (line {}) has no states",
                    name,
                    lineno + 1
                )));
            }
            // Word-position flags come from the name suffix convention:
            // "@i" initial, "@f" final, both when unmarked.
            let initial = !name.contains("@f") || name.contains("@i");
            let is_final = !name.contains("@i") || name.contains("@f");
            tied.id_for(&states, initial, is_final);
        }
        Ok(tied.into_list())
    }

    #[must_use]
    pub fn emission_symbols(&self) -> &SymbolTable {
        &self.emission_symbols
    }

    #[must_use]
    pub fn hmm_symbols(&self) -> &SymbolTable {
        &self.hmm_symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_identical_sequences() {
        let mut c = HmmListConverter::new(1);
        let list = c
            .convert("a a.0 a.1 a.2\nb b.0 b.1\na2 a.0 a.1 a.2\n")
            .unwrap();
        // a and a2 share emissions -> tied to one sequence.
        assert_eq!(list.n_sequences(), 2);
        assert_eq!(list.len(0), 3);
        assert_eq!(list.len(1), 2);
    }

    #[test]
    fn ids_stable_under_extension() {
        let mut c1 = HmmListConverter::new(0);
        let l1 = c1.convert("a a.0 a.1\nb b.0\n").unwrap();
        let mut c2 = HmmListConverter::new(0);
        let l2 = c2.convert("a a.0 a.1\nb b.0\nc c.0\n").unwrap();
        for id in 0..l1.n_sequences() {
            assert_eq!(l1.states(id), l2.states(id));
        }
    }

    #[test]
    fn empty_line_and_comment_skipped() {
        let mut c = HmmListConverter::new(0);
        let l = c.convert("# header\n\na a.0\n").unwrap();
        assert_eq!(l.n_sequences(), 1);
    }
}
