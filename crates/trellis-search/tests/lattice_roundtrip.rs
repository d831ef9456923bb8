// crates/trellis-search/tests/lattice_roundtrip.rs

//! Decode with lattice generation on, then re-decode the emitted
//! lattice as the search network with the same features: the best path
//! and total score must be reproduced.

use std::sync::Arc;

use trellis_core::am::{AcousticModel, FeatureScorer, TableScorer};
use trellis_core::state_sequence::{HmmState, StateSequenceList};
use trellis_network::{LatticeNetwork, StaticNetwork};
use trellis_search::{Recognizer, RecognizerOptions, SearchOptions};

fn sequences() -> StateSequenceList {
    let mut seqs = StateSequenceList::new();
    seqs.push(
        &[
            HmmState { emission: 0, transition: 0 },
            HmmState { emission: 1, transition: 0 },
            HmmState { emission: 2, transition: 0 },
        ],
        true,
        true,
    );
    seqs.push(
        &[
            HmmState { emission: 3, transition: 0 },
            HmmState { emission: 4, transition: 0 },
            HmmState { emission: 5, transition: 0 },
        ],
        true,
        true,
    );
    seqs
}

fn acoustic_model() -> Arc<AcousticModel> {
    Arc::new(AcousticModel::new(sequences(), vec![[0.0; 6]], 6, 0).unwrap())
}

/// Words A (label 1) and B (label 2) between state 0 and the final 1.
fn network() -> StaticNetwork {
    let seqs = sequences();
    let mut net = StaticNetwork::with_states(2);
    net.add_arc(0, 1, 1, -(0.6f32.ln()), 1, &seqs);
    net.add_arc(0, 2, 2, -(0.4f32.ln()), 1, &seqs);
    net.set_final(1, 0.0);
    net
}

fn features() -> TableScorer {
    let mut scorer = TableScorer::new(6);
    for _ in 0..6 {
        scorer.add_feature(&[0.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap();
    }
    scorer.flush();
    scorer
}

fn first_pass_options() -> RecognizerOptions {
    RecognizerOptions {
        search: SearchOptions {
            beam: 100.0,
            create_lattice: true,
            ..SearchOptions::default()
        },
        allow_empty_segment: true,
        ..RecognizerOptions::default()
    }
}

#[test]
fn lattice_redecode_reproduces_best_path() {
    let scorer = features();
    let mut first = Recognizer::new(network(), acoustic_model(), first_pass_options()).unwrap();
    let result = first.recognize(&scorer).unwrap();
    let lattice = first.create_lattice().unwrap();
    assert!(lattice.num_arcs() >= 2, "both words survive in the lattice");

    let mut second = Recognizer::new(
        LatticeNetwork::from_lattice(&lattice),
        acoustic_model(),
        RecognizerOptions {
            search: SearchOptions::default(),
            allow_empty_segment: true,
            ..RecognizerOptions::default()
        },
    )
    .unwrap();
    let redecoded = second.recognize(&scorer).unwrap();

    assert_eq!(result.best_path.labels(), redecoded.best_path.labels());
    assert!(
        (result.best_path.score - redecoded.best_path.score).abs() < 1e-4,
        "scores {} vs {}",
        result.best_path.score,
        redecoded.best_path.score
    );
}

#[test]
fn lattice_pair_weights_reconstruct_path_scores() {
    let scorer = features();
    let mut recognizer =
        Recognizer::new(network(), acoustic_model(), first_pass_options()).unwrap();
    let result = recognizer.recognize(&scorer).unwrap();
    let lattice = recognizer.create_lattice().unwrap();

    // The combined cost of the best lattice path equals the decoded
    // score: arc pair weights sum to the unscaled score deltas.
    let (items, cost) = lattice.best_path().unwrap();
    assert!((cost - result.best_path.score).abs() < 1e-4);
    assert_eq!(
        items
            .iter()
            .map(|(_, label)| *label)
            .collect::<Vec<_>>(),
        result.best_path.labels()
    );
}

#[test]
fn word_boundaries_carry_trace_times() {
    let scorer = features();
    let mut recognizer =
        Recognizer::new(network(), acoustic_model(), first_pass_options()).unwrap();
    let result = recognizer.recognize(&scorer).unwrap();
    let lattice = recognizer.create_lattice().unwrap();
    let (items, _) = lattice.best_path().unwrap();
    assert_eq!(items[0].0, result.best_path.items[0].time);
}

#[test]
fn empty_segment_yields_empty_path() {
    let mut scorer = TableScorer::new(6);
    scorer.flush();
    let mut recognizer =
        Recognizer::new(network(), acoustic_model(), first_pass_options()).unwrap();
    let result = recognizer.recognize(&scorer).unwrap();
    assert!(result.best_path.items.is_empty());
    assert_eq!(result.frames, 0);
}

#[test]
fn randomized_features_decode_deterministically() {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(7);
    let mut scorer = TableScorer::new(6);
    for _ in 0..24 {
        let row: Vec<f32> = (0..6).map(|_| rng.random_range(0.0f32..2.0)).collect();
        scorer.add_feature(&row).unwrap();
    }
    scorer.flush();

    let decode = |scorer: &TableScorer| {
        let mut recognizer = Recognizer::new(
            network(),
            acoustic_model(),
            RecognizerOptions {
                search: SearchOptions {
                    beam: 5.0,
                    purge_interval: 5,
                    ..SearchOptions::default()
                },
                allow_empty_segment: true,
                ..RecognizerOptions::default()
            },
        )
        .unwrap();
        let r = recognizer.recognize(scorer).unwrap();
        (r.best_path.items, r.best_path.score.to_bits())
    };
    assert_eq!(decode(&scorer), decode(&scorer));
}
