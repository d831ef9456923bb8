// crates/trellis-core/src/error.rs

//! Error taxonomy shared by the whole workspace.
//!
//! Startup errors (`Config`, `Io`, `Format`, `Model`) are fatal; the CLI
//! terminates with a diagnostic. `Lexicon` errors during input processing
//! may be mapped to the unknown token when configured. `Search` errors are
//! fatal for the current segment only, except "no final state reached",
//! which triggers the sentence-end fallback inside the search itself.

use crate::types::{EmissionId, StateId};

/// Workspace-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad parameter value or incompatible option combination.
    #[error("configuration error: {0}")]
    Config(String),

    /// File open/read/write failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad magic, truncated file, or inconsistent counts.
    #[error("format error: {0}")]
    Format(String),

    /// Unknown symbol during input processing.
    #[error("unknown symbol: {0}")]
    Lexicon(String),

    /// Scorer dimension mismatch, missing transition model, NaN score.
    #[error("model error: {0}")]
    Model(String),

    /// Empty network, unreachable finals, or an ill-formed search space.
    #[error("search error: {0}")]
    Search(String),
}

impl Error {
    /// Model error for an emission index outside the scorer's range.
    #[must_use]
    pub fn emission_out_of_range(emission: EmissionId, n: u32) -> Self {
        Self::Model(format!("emission {emission} out of range (have {n})"))
    }

    /// Search error for a state index outside the network.
    #[must_use]
    pub fn state_out_of_range(state: StateId, n: u32) -> Self {
        Self::Search(format!("state {state} out of range (have {n})"))
    }
}

/// Workspace-wide result type.
pub type Result<T> = std::result::Result<T, Error>;
