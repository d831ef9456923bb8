// crates/trellis-mbr/src/lib.rs

//! Minimum-Bayes-risk search: the hypothesis minimizing the
//! expected Levenshtein loss under the posterior, computed either over
//! an N-best list or by A* search over the prefix tree.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod astar;
pub mod levenshtein;
pub mod nbest;

pub use astar::AStarMbrOptions;
pub use nbest::{MbrResult, NBestMbrOptions};

use trellis_lattice::{nbest::extract_nbest, Lattice, NBestList};

/// Which engine runs the MBR decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MbrEngine {
    NBestList,
    AStar,
}

/// Lattice front-end configuration.
#[derive(Clone, Copy, Debug)]
pub struct LatticeMbrOptions {
    pub engine: MbrEngine,
    pub nbest: NBestMbrOptions,
    pub astar: AStarMbrOptions,
    /// Path-count cap reached by geometric pre-pruning.
    pub maximum_number_hypotheses: u64,
    /// Starting lattice-pruning threshold.
    pub initial_pruning_threshold: f32,
    /// Geometric tightening factor (< 1).
    pub threshold_factor: f32,
    /// Posterior scale of the n-best normalization.
    pub posterior_scale: f32,
}

impl Default for LatticeMbrOptions {
    fn default() -> Self {
        Self {
            engine: MbrEngine::NBestList,
            nbest: NBestMbrOptions::default(),
            astar: AStarMbrOptions::default(),
            maximum_number_hypotheses: 1000,
            initial_pruning_threshold: 100.0,
            threshold_factor: 0.5,
            posterior_scale: 1.0,
        }
    }
}

/// Pre-prune a lattice, extract its hypothesis space, and run the
/// selected engine.
#[must_use]
pub fn lattice_mbr(lattice: &mut Lattice, options: &LatticeMbrOptions) -> Option<MbrResult> {
    lattice.prune_to_path_count(
        options.initial_pruning_threshold,
        options.threshold_factor,
        options.maximum_number_hypotheses,
    );
    let cap = options
        .nbest
        .summation_space
        .max(options.nbest.evaluation_space)
        .min(options.maximum_number_hypotheses as usize)
        .max(1);
    let mut list = extract_nbest(lattice, cap, cap.saturating_mul(64));
    list.normalize(options.posterior_scale);
    search_list(&list, options)
}

/// Run the selected engine over an already extracted list.
#[must_use]
pub fn search_list(list: &NBestList, options: &LatticeMbrOptions) -> Option<MbrResult> {
    match options.engine {
        MbrEngine::NBestList => nbest::search(list, options.nbest),
        MbrEngine::AStar => astar::search(list, options.astar),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::semiring::PairWeight;
    use trellis_lattice::LatticeArc;

    /// Two-branch lattice with posterior 0.6 / 0.4.
    fn toy_lattice() -> Lattice {
        let mut l = Lattice::new();
        let s0 = l.add_state();
        let s1 = l.add_state();
        l.set_initial(s0);
        l.set_final(s1, PairWeight::one());
        l.set_word_boundary(s1, 2);
        l.add_arc(s0, LatticeArc {
            input: 1,
            output: 7,
            weight: PairWeight::new(-(0.6f32.ln()), 0.0),
            target: s1,
        });
        l.add_arc(s0, LatticeArc {
            input: 2,
            output: 8,
            weight: PairWeight::new(-(0.4f32.ln()), 0.0),
            target: s1,
        });
        l
    }

    #[test]
    fn lattice_front_end_runs_both_engines() {
        for engine in [MbrEngine::NBestList, MbrEngine::AStar] {
            let mut l = toy_lattice();
            let r = lattice_mbr(
                &mut l,
                &LatticeMbrOptions {
                    engine,
                    ..LatticeMbrOptions::default()
                },
            )
            .unwrap();
            assert_eq!(r.hypothesis, vec![7], "engine {engine:?}");
            assert!(r.one_half_criterion);
        }
    }

    #[test]
    fn pre_pruning_respects_path_cap() {
        let mut l = toy_lattice();
        let r = lattice_mbr(
            &mut l,
            &LatticeMbrOptions {
                maximum_number_hypotheses: 1,
                initial_pruning_threshold: 10.0,
                ..LatticeMbrOptions::default()
            },
        )
        .unwrap();
        assert!(l.n_paths() <= 1);
        assert_eq!(r.hypothesis, vec![7]);
    }
}
