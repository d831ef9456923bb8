// crates/trellis-search/src/lib.rs

//! Beam search core: token passing over a WFSN with trace bookkeeping,
//! beam/histogram/word-end pruning, epsilon expansion, and lattice
//! emission, plus the offline path-recombination analyzer.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod decoder;
pub mod histogram;
pub mod recombination;
pub mod search_space;
pub mod statistics;
pub mod trace;

pub use decoder::{RecognitionResult, Recognizer, RecognizerOptions};
pub use recombination::{PathRecombination, RecombinationOptions};
pub use search_space::{SearchOptions, SearchSpace};
pub use statistics::SearchStatistics;
pub use trace::{RecorderMode, TraceRecorder, TraceRef, INVALID_TRACE};
