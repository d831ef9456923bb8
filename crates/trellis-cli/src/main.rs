// crates/trellis-cli/src/main.rs

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trellis_core::am::{AcousticModel, TableScorer, TransitionModel};
use trellis_core::io::{read_auto, write_auto};
use trellis_core::lexicon::Lexicon;
use trellis_core::lm::{NGramModel, NGramModelFile};
use trellis_core::state_sequence::StateSequenceList;
use trellis_core::types::OutputType;
use trellis_lattice::io::{read_lattice_file, write_lattice_file};
use trellis_lookahead::{LmLookahead, LookaheadOptions};
use trellis_network::file::{read_grammar_file, read_network_file, write_network_file};
use trellis_network::{ComposedNetwork, CompressedNetwork, LatticeNetwork, Network};
use trellis_rescore::{PushForwardRescorer, RescoreOptions, RescorerType};
use trellis_search::{Recognizer, RecognizerOptions, SearchOptions};

mod build;

/// Exit code for "no hypothesis found".
const EXIT_NO_HYPOTHESIS: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "trellis",
    about = "trellis WFSN speech decoder CLI",
    long_about = "trellis WFSN speech decoder CLI.\n\nUse this tool to build search networks, decode feature segments into word hypotheses and lattices, rescore lattices with a richer LM, and select minimum-Bayes-risk hypotheses.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Decode a feature segment into the best word sequence.
    Recognize {
        /// Search network container (TWFN)
        #[arg(long)]
        network: PathBuf,

        /// State-sequence container (TSSQ)
        #[arg(long)]
        state_sequences: PathBuf,

        /// Acoustic model description (JSON/CBOR)
        #[arg(long)]
        acoustic_model: PathBuf,

        /// Per-frame emission scores (JSON/CBOR matrix)
        #[arg(long)]
        features: PathBuf,

        /// Network back-end
        #[arg(long, value_enum, default_value_t = NetworkTypeOpt::Compressed)]
        network_type: NetworkTypeOpt,

        /// Grammar acceptor for the composed back-end (TWFN)
        #[arg(long)]
        grammar: Option<PathBuf>,

        /// Pruning bound of the on-the-fly composition
        #[arg(long, default_value_t = f32::INFINITY)]
        composition_pruning: f32,

        /// Beam pruning threshold
        #[arg(long, default_value_t = f32::INFINITY)]
        beam: f32,

        /// Histogram pruning limit
        #[arg(long, default_value_t = u32::MAX)]
        pruning_limit: u32,

        /// Word-end pruning threshold (enables word-end pruning)
        #[arg(long)]
        word_end_beam: Option<f32>,

        /// Enable skip transitions
        #[arg(long, default_value_t = false)]
        skips: bool,

        /// Generate a lattice and write it here
        #[arg(long)]
        lattice_out: Option<PathBuf>,

        /// Lattice beam
        #[arg(long, default_value_t = f32::INFINITY)]
        lattice_pruning: f32,

        /// Output label interpretation
        #[arg(long, value_enum, default_value_t = OutputTypeOpt::Lemma)]
        output_type: OutputTypeOpt,

        /// Enable LM look-ahead (requires --lm)
        #[arg(long, default_value_t = false)]
        lookahead: bool,

        /// Language model for the look-ahead (JSON/CBOR)
        #[arg(long)]
        lm: Option<PathBuf>,

        /// Look-ahead table cache watermarks
        #[arg(long, default_value_t = 3500)]
        cache_size_low: u32,
        #[arg(long, default_value_t = 4500)]
        cache_size_high: u32,

        /// Recognition result output (JSON/CBOR)
        #[arg(long, default_value = "result.json")]
        out: PathBuf,
    },

    /// Convert an HMM list and a textual arc list into the binary
    /// network and state-sequence containers.
    BuildNetwork {
        /// HMM list: `name emission-symbol...` per line
        #[arg(long)]
        hmm_list: PathBuf,

        /// Arc list: `arc FROM TO INPUT OUTPUT WEIGHT`,
        /// `final STATE WEIGHT`, `initial STATE` per line
        #[arg(long)]
        arcs: PathBuf,

        /// Output network container
        #[arg(long, default_value = "network.twfn")]
        out_network: PathBuf,

        /// Output state-sequence container
        #[arg(long, default_value = "states.tssq")]
        out_state_sequences: PathBuf,
    },

    /// Rescore a lattice with a richer language model.
    Rescore {
        /// Input lattice
        #[arg(long)]
        lattice: PathBuf,

        /// Replacement language model (JSON/CBOR)
        #[arg(long)]
        lm: PathBuf,

        /// Lexicon (JSON/CBOR)
        #[arg(long)]
        lexicon: PathBuf,

        /// Output form of the rescoring pass
        #[arg(long, value_enum, default_value_t = RescorerTypeOpt::SingleBest)]
        rescorer_type: RescorerTypeOpt,

        /// Maximum hypotheses per lattice state
        #[arg(long, default_value_t = 5)]
        max_hypotheses: usize,

        /// Pruning threshold relative to the LM scale
        #[arg(long, default_value_t = 14.0)]
        pruning_threshold: f32,

        /// Recombination history limit (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        history_limit: u32,

        /// Delay LM evaluation for batching
        #[arg(long, default_value_t = false)]
        delayed_rescoring: bool,

        /// Output lattice
        #[arg(long, default_value = "rescored.lat")]
        out: PathBuf,
    },

    /// Select the minimum-Bayes-risk hypothesis of a lattice.
    MbrSearch {
        /// Input lattice
        #[arg(long)]
        lattice: PathBuf,

        /// MBR engine
        #[arg(long, value_enum, default_value_t = MbrEngineOpt::Nbest)]
        engine: MbrEngineOpt,

        /// Path-count cap for the geometric pre-pruning
        #[arg(long, default_value_t = 1000)]
        maximum_number_hypotheses: u64,

        /// Summation space cap
        #[arg(long, default_value_t = usize::MAX)]
        number_hypotheses_summation: usize,

        /// Evaluation space cap
        #[arg(long, default_value_t = usize::MAX)]
        number_hypotheses_evaluation: usize,

        /// Per-length stack bound of the A* engine
        #[arg(long, default_value_t = 100)]
        max_stack_size: usize,

        /// Result output (JSON/CBOR)
        #[arg(long, default_value = "mbr.json")]
        out: PathBuf,
    },
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum NetworkTypeOpt {
    /// Plain adjacency vectors
    Static,
    /// Prefix-sum packed arcs
    Compressed,
    /// Lazy composition with a grammar acceptor
    Composed,
    /// Re-decode a previously emitted lattice
    Lattice,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum OutputTypeOpt {
    Lemma,
    LemmaPronunciation,
    SyntacticToken,
}

impl From<OutputTypeOpt> for OutputType {
    fn from(o: OutputTypeOpt) -> Self {
        match o {
            OutputTypeOpt::Lemma => Self::Lemma,
            OutputTypeOpt::LemmaPronunciation => Self::LemmaPronunciation,
            OutputTypeOpt::SyntacticToken => Self::SyntacticToken,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum RescorerTypeOpt {
    SingleBest,
    ReplacementApproximation,
    TracebackApproximation,
}

impl From<RescorerTypeOpt> for RescorerType {
    fn from(o: RescorerTypeOpt) -> Self {
        match o {
            RescorerTypeOpt::SingleBest => Self::SingleBest,
            RescorerTypeOpt::ReplacementApproximation => Self::ReplacementApproximation,
            RescorerTypeOpt::TracebackApproximation => Self::TracebackApproximation,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum MbrEngineOpt {
    Nbest,
    Astar,
}

/// Acoustic model description file.
#[derive(serde::Serialize, serde::Deserialize)]
struct AcousticModelFile {
    num_emissions: u32,
    entry_model: u32,
    transition_models: Vec<TransitionModel>,
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.cmd {
        Cmd::Recognize {
            network,
            state_sequences,
            acoustic_model,
            features,
            network_type,
            grammar,
            composition_pruning,
            beam,
            pruning_limit,
            word_end_beam,
            skips,
            lattice_out,
            lattice_pruning,
            output_type,
            lookahead,
            lm,
            cache_size_low,
            cache_size_high,
            out,
        } => recognize(RecognizeArgs {
            network,
            state_sequences,
            acoustic_model,
            features,
            network_type,
            grammar,
            composition_pruning,
            beam,
            pruning_limit,
            word_end_beam,
            skips,
            lattice_out,
            lattice_pruning,
            output_type,
            lookahead,
            lm,
            cache_size_low,
            cache_size_high,
            out,
        }),

        Cmd::BuildNetwork {
            hmm_list,
            arcs,
            out_network,
            out_state_sequences,
        } => build_network(&hmm_list, &arcs, &out_network, &out_state_sequences),

        Cmd::Rescore {
            lattice,
            lm,
            lexicon,
            rescorer_type,
            max_hypotheses,
            pruning_threshold,
            history_limit,
            delayed_rescoring,
            out,
        } => rescore(
            &lattice,
            &lm,
            &lexicon,
            rescorer_type,
            max_hypotheses,
            pruning_threshold,
            history_limit,
            delayed_rescoring,
            &out,
        ),

        Cmd::MbrSearch {
            lattice,
            engine,
            maximum_number_hypotheses,
            number_hypotheses_summation,
            number_hypotheses_evaluation,
            max_stack_size,
            out,
        } => mbr_search(
            &lattice,
            engine,
            maximum_number_hypotheses,
            number_hypotheses_summation,
            number_hypotheses_evaluation,
            max_stack_size,
            &out,
        ),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing with an env-driven filter (default INFO).
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_level(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

struct RecognizeArgs {
    network: PathBuf,
    state_sequences: PathBuf,
    acoustic_model: PathBuf,
    features: PathBuf,
    network_type: NetworkTypeOpt,
    grammar: Option<PathBuf>,
    composition_pruning: f32,
    beam: f32,
    pruning_limit: u32,
    word_end_beam: Option<f32>,
    skips: bool,
    lattice_out: Option<PathBuf>,
    lattice_pruning: f32,
    output_type: OutputTypeOpt,
    lookahead: bool,
    lm: Option<PathBuf>,
    cache_size_low: u32,
    cache_size_high: u32,
    out: PathBuf,
}

fn recognize(args: RecognizeArgs) -> Result<ExitCode> {
    let sequences = StateSequenceList::read_file(&args.state_sequences)
        .with_context(|| format!("reading state sequences {}", args.state_sequences.display()))?;
    let am_file: AcousticModelFile = read_auto(&args.acoustic_model)
        .with_context(|| format!("reading acoustic model {}", args.acoustic_model.display()))?;
    let rows: Vec<Vec<f32>> =
        read_auto(&args.features).with_context(|| format!("reading features {}", args.features.display()))?;

    let model = Arc::new(
        AcousticModel::new(
            sequences,
            am_file.transition_models,
            am_file.num_emissions,
            am_file.entry_model,
        )
        .context("assembling acoustic model")?,
    );
    let scorer = TableScorer::from_rows(am_file.num_emissions, rows).context("buffering features")?;

    let search = SearchOptions {
        beam: args.beam,
        pruning_limit: args.pruning_limit,
        word_end_pruning: args.word_end_beam.is_some(),
        word_end_threshold: args.word_end_beam.unwrap_or(f32::INFINITY),
        create_lattice: args.lattice_out.is_some(),
        lattice_pruning: args.lattice_pruning,
        allow_skips: args.skips,
        ..SearchOptions::default()
    };
    let options = RecognizerOptions {
        search,
        output_type: args.output_type.into(),
        allow_empty_segment: true,
    };

    info!(network = %args.network.display(), network_type = ?args.network_type, "recognizing");

    // The back-end is selected up front and monomorphized below.
    match args.network_type {
        NetworkTypeOpt::Static => {
            let net = read_network_file(&args.network, model.state_sequences())
                .with_context(|| format!("reading network {}", args.network.display()))?;
            run_recognizer(net, model, options, &args, &scorer)
        }
        NetworkTypeOpt::Compressed => {
            let net = read_network_file(&args.network, model.state_sequences())
                .with_context(|| format!("reading network {}", args.network.display()))?;
            let net = CompressedNetwork::from_static(&net);
            run_recognizer(net, model, options, &args, &scorer)
        }
        NetworkTypeOpt::Composed => {
            let grammar_path = args
                .grammar
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("--network-type composed requires --grammar"))?;
            let left = read_network_file(&args.network, model.state_sequences())
                .with_context(|| format!("reading network {}", args.network.display()))?;
            let grammar = read_grammar_file(grammar_path)
                .with_context(|| format!("reading grammar {}", grammar_path.display()))?;
            let net = ComposedNetwork::new(left, grammar, args.composition_pruning);
            run_recognizer(net, model, options, &args, &scorer)
        }
        NetworkTypeOpt::Lattice => {
            let lattice = read_lattice_file(&args.network)
                .with_context(|| format!("reading lattice {}", args.network.display()))?;
            let net = LatticeNetwork::from_lattice(&lattice);
            run_recognizer(net, model, options, &args, &scorer)
        }
    }
}

fn run_recognizer<N: Network>(
    network: N,
    model: Arc<AcousticModel>,
    options: RecognizerOptions,
    args: &RecognizeArgs,
    scorer: &TableScorer,
) -> Result<ExitCode> {
    let lookahead = if args.lookahead {
        let lm_path = args
            .lm
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("--lookahead requires --lm"))?;
        let lm_file: NGramModelFile =
            read_auto(lm_path).with_context(|| format!("reading LM {}", lm_path.display()))?;
        let lm: NGramModel = lm_file.into();
        Some(Box::new(LmLookahead::new(
            &network,
            model.state_sequences(),
            lm,
            LookaheadOptions {
                cache_size_low: args.cache_size_low,
                cache_size_high: args.cache_size_high,
                ..LookaheadOptions::default()
            },
        )))
    } else {
        None
    };

    let mut recognizer = Recognizer::new(network, model, options)?;
    if let Some(la) = lookahead {
        recognizer.set_lookahead(la);
    }

    let result = match recognizer.recognize(scorer) {
        Ok(r) => r,
        Err(trellis_core::Error::Search(msg)) => {
            eprintln!("no hypothesis found: {msg}");
            return Ok(ExitCode::from(EXIT_NO_HYPOTHESIS));
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(lattice_out) = &args.lattice_out {
        let lattice = recognizer
            .create_lattice()
            .ok_or_else(|| anyhow::anyhow!("lattice generation produced nothing"))?;
        write_lattice_file(&lattice, lattice_out)
            .with_context(|| format!("writing lattice {}", lattice_out.display()))?;
        println!(
            "Lattice: {} states, {} arcs → {}",
            lattice.num_states(),
            lattice.num_arcs(),
            lattice_out.display()
        );
    }

    write_auto(&args.out, &result)
        .with_context(|| format!("writing result {}", args.out.display()))?;
    println!(
        "Recognized {} frames → {} words (score {:.3}) → {}",
        result.frames,
        result.best_path.items.len(),
        result.best_path.score,
        args.out.display()
    );
    Ok(ExitCode::SUCCESS)
}

fn build_network(
    hmm_list: &Path,
    arcs: &Path,
    out_network: &Path,
    out_state_sequences: &Path,
) -> Result<ExitCode> {
    info!(hmm_list = %hmm_list.display(), arcs = %arcs.display(), "building network");
    let (sequences, description) = build::build_from_files(hmm_list, arcs)?;
    sequences
        .write_file(out_state_sequences)
        .with_context(|| format!("writing state sequences {}", out_state_sequences.display()))?;
    write_network_file(&description, out_network)
        .with_context(|| format!("writing network {}", out_network.display()))?;
    println!(
        "Built network: {} states, {} sequences → {}, {}",
        description.states.len(),
        sequences.n_sequences(),
        out_network.display(),
        out_state_sequences.display()
    );
    Ok(ExitCode::SUCCESS)
}

#[allow(clippy::too_many_arguments)]
fn rescore(
    lattice_path: &Path,
    lm_path: &Path,
    lexicon_path: &Path,
    rescorer_type: RescorerTypeOpt,
    max_hypotheses: usize,
    pruning_threshold: f32,
    history_limit: u32,
    delayed_rescoring: bool,
    out: &Path,
) -> Result<ExitCode> {
    let lattice = read_lattice_file(lattice_path)
        .with_context(|| format!("reading lattice {}", lattice_path.display()))?;
    let lm_file: NGramModelFile =
        read_auto(lm_path).with_context(|| format!("reading LM {}", lm_path.display()))?;
    let lm: NGramModel = lm_file.into();
    let mut lexicon: Lexicon = read_auto(lexicon_path)
        .with_context(|| format!("reading lexicon {}", lexicon_path.display()))?;
    lexicon.rebuild_indices();

    info!(lattice = %lattice_path.display(), ?rescorer_type, "rescoring");
    let rescorer = PushForwardRescorer::new(
        &lm,
        &lexicon,
        RescoreOptions {
            rescorer_type: rescorer_type.into(),
            max_hypotheses,
            pruning_threshold,
            history_limit,
            delayed_rescoring,
            ..RescoreOptions::default()
        },
    );
    let rescored = rescorer.rescore(&lattice)?;
    write_lattice_file(&rescored, out)
        .with_context(|| format!("writing rescored lattice {}", out.display()))?;
    println!(
        "Rescored: {} states, {} arcs → {}",
        rescored.num_states(),
        rescored.num_arcs(),
        out.display()
    );
    Ok(ExitCode::SUCCESS)
}

fn mbr_search(
    lattice_path: &Path,
    engine: MbrEngineOpt,
    maximum_number_hypotheses: u64,
    number_hypotheses_summation: usize,
    number_hypotheses_evaluation: usize,
    max_stack_size: usize,
    out: &Path,
) -> Result<ExitCode> {
    let mut lattice = read_lattice_file(lattice_path)
        .with_context(|| format!("reading lattice {}", lattice_path.display()))?;
    info!(lattice = %lattice_path.display(), ?engine, "MBR search");

    let options = trellis_mbr::LatticeMbrOptions {
        engine: match engine {
            MbrEngineOpt::Nbest => trellis_mbr::MbrEngine::NBestList,
            MbrEngineOpt::Astar => trellis_mbr::MbrEngine::AStar,
        },
        nbest: trellis_mbr::NBestMbrOptions {
            summation_space: number_hypotheses_summation,
            evaluation_space: number_hypotheses_evaluation,
        },
        astar: trellis_mbr::AStarMbrOptions {
            max_stack_size,
            summation_space: number_hypotheses_summation,
            ..trellis_mbr::AStarMbrOptions::default()
        },
        maximum_number_hypotheses,
        ..trellis_mbr::LatticeMbrOptions::default()
    };

    let Some(result) = trellis_mbr::lattice_mbr(&mut lattice, &options) else {
        eprintln!("no hypothesis found: empty lattice");
        return Ok(ExitCode::from(EXIT_NO_HYPOTHESIS));
    };

    #[derive(serde::Serialize)]
    struct MbrOutput<'a> {
        hypothesis: &'a [u32],
        risk: f64,
        posterior: f32,
        position: usize,
        one_half_criterion: bool,
        distance_one_criterion: bool,
    }
    write_auto(
        out,
        &MbrOutput {
            hypothesis: &result.hypothesis,
            risk: result.risk,
            posterior: result.posterior,
            position: result.position,
            one_half_criterion: result.one_half_criterion,
            distance_one_criterion: result.distance_one_criterion,
        },
    )
    .with_context(|| format!("writing MBR result {}", out.display()))?;
    println!(
        "MBR hypothesis at position {} (risk {:.4}) → {}",
        result.position,
        result.risk,
        out.display()
    );
    Ok(ExitCode::SUCCESS)
}
