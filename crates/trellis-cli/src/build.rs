// crates/trellis-cli/src/build.rs

//! Textual network construction for `build-network`.
//!
//! The HMM list is converted through the tying converter; the arc list
//! is a plain line format:
//!
//! ```text
//! initial 0
//! arc 0 1 a/word1 word1 0.51
//! final 1 0.0
//! ```
//!
//! Arc inputs name HMMs from the list (or `eps`); outputs are word
//! symbols interned into their own table, or `eps`.

use std::path::Path;

use anyhow::{bail, Context, Result};

use trellis_core::hmm_list::HmmListConverter;
use trellis_core::state_sequence::StateSequenceList;
use trellis_core::symbols::SymbolTable;
use trellis_core::types::EPSILON;
use trellis_network::file::{NetworkDescription, RawArc};

/// Parse the two text files into the state-sequence store and the
/// network description.
pub fn build_from_files(
    hmm_list: &Path,
    arcs: &Path,
) -> Result<(StateSequenceList, NetworkDescription)> {
    let hmm_text = std::fs::read_to_string(hmm_list)
        .with_context(|| format!("reading {}", hmm_list.display()))?;
    let arc_text =
        std::fs::read_to_string(arcs).with_context(|| format!("reading {}", arcs.display()))?;
    build_from_text(&hmm_text, &arc_text)
}

/// Text-level builder (separated for tests).
pub fn build_from_text(hmm_text: &str, arc_text: &str) -> Result<(StateSequenceList, NetworkDescription)> {
    let mut converter = HmmListConverter::new(0);
    let sequences = converter.convert(hmm_text)?;

    let mut words = SymbolTable::new();
    let mut description = NetworkDescription::default();

    for (lineno, line) in arc_text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            ["initial", state] => {
                description.initial = parse_state(state, lineno)?;
            }
            ["final", state, weight] => {
                let s = parse_state(state, lineno)? as usize;
                ensure_state(&mut description, s);
                description.states[s].0 = Some(parse_weight(weight, lineno)?);
            }
            ["arc", from, to, input, output, weight] => {
                let from = parse_state(from, lineno)? as usize;
                let to = parse_state(to, lineno)?;
                ensure_state(&mut description, from);
                ensure_state(&mut description, to as usize);
                // HMM symbols resolve to 1-based state-sequence labels.
                let input = if *input == "eps" {
                    EPSILON
                } else {
                    converter
                        .hmm_symbols()
                        .lookup(input)
                        .with_context(|| format!("arc line {}: unknown hmm", lineno + 1))?
                };
                let output = if *output == "eps" {
                    EPSILON
                } else {
                    words.add(output)
                };
                description.states[from].1.push(RawArc {
                    input,
                    output,
                    weight: parse_weight(weight, lineno)?,
                    target: to,
                });
            }
            _ => bail!("arc list line {}: unrecognized directive", lineno + 1),
        }
    }
    if description.states.is_empty() {
        bail!("arc list defines no states");
    }
    Ok((sequences, description))
}

fn ensure_state(description: &mut NetworkDescription, state: usize) {
    if state >= description.states.len() {
        description.states.resize(state + 1, (None, Vec::new()));
    }
}

fn parse_state(field: &str, lineno: usize) -> Result<u32> {
    field
        .parse()
        .with_context(|| format!("arc list line {}: bad state id", lineno + 1))
}

fn parse_weight(field: &str, lineno: usize) -> Result<f32> {
    field
        .parse()
        .with_context(|| format!("arc list line {}: bad weight", lineno + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HMMS: &str = "a a.0 a.1 a.2\nb b.0 b.1 b.2\n";
    const ARCS: &str = "\
initial 0
arc 0 1 a wordA 0.51
arc 0 1 b wordB 0.92
final 1 0.0
";

    #[test]
    fn builds_two_word_network() {
        let (sequences, description) = build_from_text(HMMS, ARCS).unwrap();
        assert_eq!(sequences.n_sequences(), 2);
        assert_eq!(description.states.len(), 2);
        assert_eq!(description.states[0].1.len(), 2);
        assert_eq!(description.states[0].1[0].input, 1);
        assert_eq!(description.states[0].1[1].input, 2);
        assert!(description.states[1].0.is_some());
    }

    #[test]
    fn epsilon_arcs_and_unknown_hmms() {
        let (_, description) =
            build_from_text(HMMS, "initial 0\narc 0 1 eps eps 0.0\nfinal 1 0.0\n").unwrap();
        assert_eq!(description.states[0].1[0].input, EPSILON);
        assert!(build_from_text(HMMS, "initial 0\narc 0 1 zz w 0.0\nfinal 1 0.0\n").is_err());
    }

    #[test]
    fn bad_directive_is_rejected()  {
        assert!(build_from_text(HMMS, "nonsense 1 2\n").is_err());
    }
}
