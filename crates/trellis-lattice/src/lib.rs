// crates/trellis-lattice/src/lib.rs

//! Word lattices with (am, lm) pair weights and word-boundary times.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]

pub mod io;
pub mod lattice;
pub mod nbest;
pub mod posterior;

pub use lattice::{Lattice, LatticeArc, LatticeState};
pub use nbest::{NBestHypothesis, NBestList};
