// crates/trellis-cli/tests/pipeline.rs

//! End-to-end pipeline over the library crates: container round trips,
//! first-pass decoding into a lattice, push-forward rescoring, and MBR
//! selection on the rescored lattice.

use std::sync::Arc;

use trellis_core::am::{AcousticModel, FeatureScorer, TableScorer};
use trellis_core::lexicon::Lexicon;
use trellis_core::lm::NGramModel;
use trellis_core::state_sequence::{HmmState, StateSequenceList};
use trellis_core::types::OutputType;
use trellis_lattice::io::{read_lattice, write_lattice};
use trellis_mbr::{lattice_mbr, LatticeMbrOptions, MbrEngine};
use trellis_network::file::{read_network, write_network, NetworkDescription, RawArc};
use trellis_network::CompressedNetwork;
use trellis_rescore::{PushForwardRescorer, RescoreOptions, RescorerType};
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

fn network_description() -> NetworkDescription {
    NetworkDescription {
        initial: 0,
        states: vec![
            (
                None,
                vec![
                    RawArc { input: 1, output: 1, weight: -(0.6f32.ln()), target: 1 },
                    RawArc { input: 2, output: 2, weight: -(0.4f32.ln()), target: 1 },
                ],
            ),
            (Some(0.0), vec![]),
        ],
    }
}

fn features() -> TableScorer {
    let mut scorer = TableScorer::new(6);
    for _ in 0..6 {
        scorer.add_feature(&[0.0, 0.0, 0.0, 0.2, 0.2, 0.2]).unwrap();
    }
    scorer.flush();
    scorer
}

fn lexicon() -> Lexicon {
    let mut lex = Lexicon::default();
    lex.lemmas.add("wordA");
    lex.lemmas.add("wordB");
    lex
}

#[test]
fn decode_rescore_mbr_pipeline() {
    let seqs = sequences();

    // Network container round trip stands in for the on-disk step.
    let mut network_bytes = Vec::new();
    write_network(&network_description(), &mut network_bytes).unwrap();
    let static_net = read_network(&mut network_bytes.as_slice(), &seqs).unwrap();
    let net = CompressedNetwork::from_static(&static_net);

    let model = Arc::new(AcousticModel::new(seqs, vec![[0.0; 6]], 6, 0).unwrap());
    let mut recognizer = Recognizer::new(
        net,
        model,
        RecognizerOptions {
            search: SearchOptions {
                beam: 100.0,
                create_lattice: true,
                ..SearchOptions::default()
            },
            output_type: OutputType::Lemma,
            allow_empty_segment: false,
        },
    )
    .unwrap();

    let result = recognizer.recognize(&features()).unwrap();
    assert_eq!(result.best_path.labels(), vec![1]);

    // Lattice file round trip.
    let lattice = recognizer.create_lattice().unwrap();
    let mut lattice_bytes = Vec::new();
    write_lattice(&lattice, &mut lattice_bytes).unwrap();
    let lattice = read_lattice(&mut lattice_bytes.as_slice()).unwrap();

    // The richer LM inverts the preference: wordB becomes cheap.
    let mut lm = NGramModel::new(1, 3);
    lm.insert(&[], 1, 4.0, 0.0);
    lm.insert(&[], 2, 0.1, 0.0);
    let lex = lexicon();
    let rescorer = PushForwardRescorer::new(
        &lm,
        &lex,
        RescoreOptions {
            rescorer_type: RescorerType::TracebackApproximation,
            ..RescoreOptions::default()
        },
    );
    let mut rescored = rescorer.rescore(&lattice).unwrap();
    let (items, _) = rescored.best_path().unwrap();
    assert_eq!(
        items.iter().map(|(_, l)| *l).collect::<Vec<_>>(),
        vec![2],
        "rescoring flips the decision to wordB"
    );

    // MBR on the rescored lattice agrees (clear posterior winner).
    let mbr = lattice_mbr(
        &mut rescored,
        &LatticeMbrOptions {
            engine: MbrEngine::AStar,
            ..LatticeMbrOptions::default()
        },
    )
    .unwrap();
    assert_eq!(mbr.hypothesis, vec![2]);
}

#[test]
fn replacement_approximation_keeps_shape() {
    let seqs = sequences();
    let mut network_bytes = Vec::new();
    write_network(&network_description(), &mut network_bytes).unwrap();
    let static_net = read_network(&mut network_bytes.as_slice(), &seqs).unwrap();

    let model = Arc::new(AcousticModel::new(seqs, vec![[0.0; 6]], 6, 0).unwrap());
    let mut recognizer = Recognizer::new(
        static_net,
        model,
        RecognizerOptions {
            search: SearchOptions {
                beam: 100.0,
                create_lattice: true,
                ..SearchOptions::default()
            },
            output_type: OutputType::Lemma,
            allow_empty_segment: false,
        },
    )
    .unwrap();
    recognizer.recognize(&features()).unwrap();
    let lattice = recognizer.create_lattice().unwrap();

    let mut lm = NGramModel::new(1, 3);
    lm.insert(&[], 1, 1.5, 0.0);
    lm.insert(&[], 2, 2.5, 0.0);
    let lex = lexicon();
    let rescorer = PushForwardRescorer::new(
        &lm,
        &lex,
        RescoreOptions {
            rescorer_type: RescorerType::ReplacementApproximation,
            ..RescoreOptions::default()
        },
    );
    let rescored = rescorer.rescore(&lattice).unwrap();
    assert_eq!(rescored.num_states(), lattice.num_states());
    assert_eq!(rescored.num_arcs(), lattice.num_arcs());
    // Visited word arcs carry the replacement scores.
    let word_arcs: Vec<f32> = rescored
        .states()
        .iter()
        .flat_map(|s| s.arcs.iter())
        .filter(|a| a.output == 1)
        .map(|a| a.weight.lm)
        .collect();
    assert!(word_arcs.iter().any(|&s| (s - 1.5).abs() < 1e-6));
}
