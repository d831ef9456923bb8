// crates/trellis-search/src/search_space.rs

//! The token-passing expansion loop.
//!
//! Per frame: interleaved expansion of incoming state hypotheses and
//! active arc hypotheses, acoustic scoring, beam and histogram pruning
//! with score rescaling, inter-arc transitions with trace recording,
//! depth-first epsilon expansion, and optional word-end pruning.
//!
//! Scores are stored scaled: the unscaled score of a hypothesis equals
//! `score + current_scale`, with the scale accumulated in f64.

use rustc_hash::FxHashMap;
use std::sync::Arc as SharedArc;
use tracing::warn;

use trellis_core::am::{
    AcousticModel, Scorer, TransitionModel, TDP_EXIT, TDP_FORWARD, TDP_LOOP, TDP_SKIP,
};
use trellis_core::error::{Error, Result};
use trellis_core::types::{
    BestPath, Label, Score, StateId, TimeframeIndex, EPSILON, INVALID_SCORE,
};
use trellis_lattice::Lattice;
use trellis_lookahead::LookaheadScorer;
use trellis_network::Network;

use crate::histogram::Histogram;
use crate::statistics::SearchStatistics;
use crate::trace::{RecorderMode, TraceRecorder, TraceRef, INVALID_TRACE};

const HMM_SIZE_INCREMENT: usize = 1024;
const ARC_SIZE_INCREMENT: usize = 256;
const HMM_SIZE_INCREASE_FACTOR: usize = 2;
const ARC_SIZE_INCREASE_FACTOR: usize = 2;

/// Search configuration.
#[derive(Clone, Debug)]
pub struct SearchOptions {
    /// Beam threshold relative to the best score of the frame.
    pub beam: Score,
    /// Histogram pruning limit (maximum surviving HMM state hypotheses).
    pub pruning_limit: u32,
    /// Apply histogram pruning in a second pass after beam pruning.
    pub two_pass_pruning: bool,
    /// Prune word-end hypotheses against the best word end.
    pub word_end_pruning: bool,
    /// Word-end beam, relative to the best word-end score.
    pub word_end_threshold: Score,
    /// Record a lattice instead of first-best traces.
    pub create_lattice: bool,
    /// Lattice beam for sibling-chain pruning.
    pub lattice_pruning: Score,
    /// Trace purge (and lattice prune) interval in frames.
    pub purge_interval: u32,
    /// Enable skip transitions (two incoming slots).
    pub allow_skips: bool,
    /// Recombine epsilon paths by visited target state.
    pub merge_eps_paths: bool,
    /// Prune epsilon expansion against the frame threshold.
    pub epsilon_arc_pruning: bool,
    /// Prune the initial epsilon closure.
    pub initial_eps_pruning: bool,
    /// Track the frame best during expansion to tighten the threshold.
    pub prospective_pruning: bool,
    /// Scale applied to network arc and final weights.
    pub weight_scale: Score,
    /// Treat any non-epsilon output as a word end (otherwise the final
    /// flag of the state sequence decides).
    pub output_is_word_end: bool,
    /// Drop the last output on trace-back.
    pub ignore_last_output: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            beam: Score::INFINITY,
            pruning_limit: u32::MAX,
            two_pass_pruning: false,
            word_end_pruning: false,
            word_end_threshold: Score::INFINITY,
            create_lattice: false,
            lattice_pruning: Score::INFINITY,
            purge_interval: 50,
            allow_skips: false,
            merge_eps_paths: false,
            epsilon_arc_pruning: true,
            initial_eps_pruning: false,
            prospective_pruning: true,
            weight_scale: 1.0,
            output_is_word_end: true,
            ignore_last_output: false,
        }
    }
}

/// Incoming entry of a state hypothesis (slot 0 forward, slot 1 skip).
#[derive(Clone, Copy, Debug)]
struct IncomingHyp {
    score: Score,
    trace: TraceRef,
}

impl IncomingHyp {
    const INACTIVE: Self = Self {
        score: INVALID_SCORE,
        trace: INVALID_TRACE,
    };

    #[inline]
    const fn is_active(&self) -> bool {
        self.trace != INVALID_TRACE
    }
}

/// Active network state with its incoming entries.
#[derive(Clone, Copy, Debug)]
struct StateHyp {
    state: StateId,
    incoming: [IncomingHyp; 2],
}

/// Active arc: a span of HMM state hypotheses of one allophone.
#[derive(Clone, Copy, Debug, Default)]
struct ArcHyp {
    state: StateId,
    target: StateId,
    /// State-sequence id of the allophone.
    seq: u32,
    /// Input label (for trace bookkeeping).
    input: Label,
    output: Label,
    /// Scaled arc weight.
    score: Score,
    /// Arc index at the source state (merge-walk identity).
    arc: u32,
    /// One past the last HMM state hypothesis of this arc.
    end: usize,
}

/// One HMM state hypothesis.
#[derive(Clone, Copy, Debug)]
struct HmmStateHyp {
    score: Score,
    trace: TraceRef,
}

impl HmmStateHyp {
    const INACTIVE: Self = Self {
        score: INVALID_SCORE,
        trace: INVALID_TRACE,
    };

    #[inline]
    const fn is_active(&self) -> bool {
        self.trace != INVALID_TRACE
    }
}

/// Epsilon-path hypothesis of the depth-first expansion.
#[derive(Clone, Copy, Debug)]
struct EpsArcHyp {
    target: StateId,
    output: Label,
    /// Path cost relative to the source state hypothesis.
    score: Score,
    trace: [TraceRef; 2],
}

/// The search space over a network back-end `N`.
pub struct SearchSpace<N: Network> {
    network: N,
    model: SharedArc<AcousticModel>,
    transition_models: Vec<TransitionModel>,
    entry_forward: Score,
    entry_skip: Score,
    options: SearchOptions,
    recorder: TraceRecorder,
    lookahead: Option<Box<dyn LookaheadScorer>>,

    active_states: Vec<StateHyp>,
    state_to_hyp: FxHashMap<StateId, usize>,
    state_tdp: FxHashMap<StateId, u32>,
    word_end_hyp: FxHashMap<StateId, bool>,
    active_arcs: Vec<ArcHyp>,
    new_active_arcs: Vec<ArcHyp>,
    hmm_hyps: Vec<HmmStateHyp>,
    new_hmm_hyps: Vec<HmmStateHyp>,

    cur_hmm_base: usize,
    cur_hmm_size: usize,
    cur_arc_size: usize,
    n_active_hmm: usize,
    current_best: Score,
    current_max: Score,
    current_threshold: Score,
    current_scale: f64,
    time: TimeframeIndex,
    sentence_end: TraceRef,

    histogram: Histogram,
    statistics: SearchStatistics,
}

impl<N: Network> SearchSpace<N> {
    /// Set up a search space; the initial hypothesis is created by
    /// [`SearchSpace::reset`].
    pub fn new(network: N, model: SharedArc<AcousticModel>, options: SearchOptions) -> Result<Self> {
        if network.num_states() == 0 {
            return Err(Error::Search("empty network".into()));
        }
        let transition_models: Vec<TransitionModel> = (0..model.n_transition_models())
            .map(|t| *model.state_transition(t as u32).unwrap_or(&[0.0; 6]))
            .collect();
        let mode = if options.create_lattice {
            RecorderMode::Lattice
        } else {
            RecorderMode::FirstBest
        };
        let recorder = TraceRecorder::new(mode, options.lattice_pruning);
        let mut space = Self {
            network,
            entry_forward: model.entry_forward_score(),
            entry_skip: model.entry_skip_score(),
            model,
            transition_models,
            options,
            recorder,
            lookahead: None,
            active_states: Vec::new(),
            state_to_hyp: FxHashMap::default(),
            state_tdp: FxHashMap::default(),
            word_end_hyp: FxHashMap::default(),
            active_arcs: Vec::new(),
            new_active_arcs: Vec::new(),
            hmm_hyps: Vec::new(),
            new_hmm_hyps: Vec::new(),
            cur_hmm_base: 0,
            cur_hmm_size: 0,
            cur_arc_size: 0,
            n_active_hmm: 0,
            current_best: INVALID_SCORE,
            current_max: 0.0,
            current_threshold: INVALID_SCORE,
            current_scale: 0.0,
            time: 0,
            sentence_end: INVALID_TRACE,
            histogram: Histogram::new(),
            statistics: SearchStatistics::default(),
        };
        space.reset();
        Ok(space)
    }

    /// Attach a look-ahead scorer; its scores tighten the beam at state
    /// hypothesis creation.
    pub fn set_lookahead(&mut self, lookahead: Box<dyn LookaheadScorer>) {
        self.lookahead = Some(lookahead);
    }

    /// Abort the current segment and restart at the initial state.
    pub fn reset(&mut self) {
        self.time = 0;
        self.current_scale = 0.0;
        self.current_best = INVALID_SCORE;
        self.sentence_end = INVALID_TRACE;
        self.n_active_hmm = 0;
        self.active_states.clear();
        self.state_to_hyp.clear();
        self.state_tdp.clear();
        self.word_end_hyp.clear();
        self.active_arcs.clear();
        self.hmm_hyps.clear();
        self.recorder.clear();
        self.network.reset();
        if let Some(la) = &mut self.lookahead {
            la.reset();
        }
        self.statistics.reset();
        self.add_initial_state_hypothesis();
        let threshold = if self.options.initial_eps_pruning {
            self.options.beam
        } else {
            Score::INFINITY
        };
        self.expand_epsilon_arcs(threshold, self.options.initial_eps_pruning);
    }

    /// Number of active state hypotheses.
    #[must_use]
    pub fn n_active_states(&self) -> usize {
        self.active_states.len()
    }

    /// Number of active HMM state hypotheses.
    #[must_use]
    pub fn n_active_hmm_states(&self) -> usize {
        self.n_active_hmm
    }

    /// Frames consumed so far.
    #[must_use]
    pub const fn time(&self) -> TimeframeIndex {
        self.time
    }

    /// Segment statistics.
    #[must_use]
    pub const fn statistics(&self) -> &SearchStatistics {
        &self.statistics
    }

    #[must_use]
    pub fn network(&self) -> &N {
        &self.network
    }

    #[inline]
    fn unscaled(&self, score: Score) -> Score {
        (f64::from(score) + self.current_scale) as Score
    }

    #[inline]
    const fn n_incoming(&self) -> usize {
        if self.options.allow_skips {
            2
        } else {
            1
        }
    }

    fn sequences(&self) -> &trellis_core::state_sequence::StateSequenceList {
        self.model.state_sequences()
    }

    /// Anticipated (look-ahead) score of entering `state`; zero without
    /// an attached look-ahead.
    fn anticipation(&mut self, state: StateId) -> Score {
        match &mut self.lookahead {
            Some(la) => la.anticipate(self.network.grammar_state(state), state),
            None => 0.0,
        }
    }

    // ---- frame expansion --------------------------------------------

    /// Consume one acoustic frame.
    pub fn feed(&mut self, scorer: &dyn Scorer) -> Result<()> {
        self.expand_states_and_arcs();
        self.add_acoustic_scores(scorer)?;
        if self.n_active_hmm == 0 {
            return Err(Error::Search("all hypotheses pruned".into()));
        }
        self.statistics
            .hmm_hyps_before_pruning
            .add(self.n_active_hmm as u64);

        let mut threshold = self.current_best + self.options.beam;
        if !self.options.two_pass_pruning && self.cur_hmm_size > self.options.pruning_limit as usize
        {
            let histogram_threshold = self.quantile_state_score(
                0,
                self.cur_hmm_size,
                self.current_best,
                threshold.min(self.current_max),
                self.options.pruning_limit,
            );
            threshold = threshold.min(histogram_threshold);
        }
        if self.options.beam < Score::INFINITY {
            self.prune_hmm_states(threshold);
            self.current_scale += f64::from(self.current_best);
            threshold -= self.current_best;
        } else {
            threshold = Score::INFINITY;
            std::mem::swap(&mut self.hmm_hyps, &mut self.new_hmm_hyps);
            self.hmm_hyps.truncate(self.cur_hmm_size);
            std::mem::swap(&mut self.active_arcs, &mut self.new_active_arcs);
            self.active_arcs.truncate(self.cur_arc_size);
        }
        if self.options.two_pass_pruning && self.hmm_hyps.len() > self.options.pruning_limit as usize
        {
            let histogram_threshold = self.quantile_in_place(self.options.pruning_limit, threshold);
            self.prune_hmm_states_in_place(histogram_threshold);
        }
        self.statistics
            .hmm_hyps_after_pruning
            .add(self.n_active_hmm as u64);
        self.statistics
            .arc_hyps_after_pruning
            .add(self.active_arcs.len() as u64);

        self.time += 1;
        if self.time % self.options.purge_interval == 0 {
            self.purge_traces();
        }
        self.expand_inter_arc_transitions(threshold);
        let eps_threshold = if self.options.epsilon_arc_pruning {
            threshold
        } else {
            self.options.beam
        };
        self.expand_epsilon_arcs(eps_threshold, !self.options.epsilon_arc_pruning);
        if self.options.word_end_pruning {
            self.prune_word_ends(self.options.word_end_threshold);
        }
        if self.options.create_lattice && self.time % self.options.purge_interval == 0 {
            self.prune_lattice();
        }
        self.statistics.state_hyps.add(self.active_states.len() as u64);
        self.statistics.trace_nodes.add(self.recorder.n_nodes() as u64);
        self.statistics.frames += 1;
        Ok(())
    }

    /// Activate the initial state hypothesis and the root trace.
    fn add_initial_state_hypothesis(&mut self) {
        let t = self.recorder.add(
            INVALID_TRACE,
            INVALID_TRACE,
            EPSILON,
            EPSILON,
            0,
            0.0,
            0.0,
            true,
        );
        let root = self.network.initial_state();
        let idx = self.get_state_hyp(root);
        self.active_states[idx].incoming[0] = IncomingHyp { score: 0.0, trace: t };
    }

    /// Create or look up the state hypothesis of `state`.
    fn get_state_hyp(&mut self, state: StateId) -> usize {
        if let Some(&idx) = self.state_to_hyp.get(&state) {
            return idx;
        }
        let idx = self.active_states.len();
        self.active_states.push(StateHyp {
            state,
            incoming: [IncomingHyp::INACTIVE; 2],
        });
        self.state_to_hyp.insert(state, idx);
        idx
    }

    /// Add or recombine an HMM state hypothesis of the current arc block.
    fn activate_or_update_hmm_state(&mut self, hmm_state: usize, score: Score, trace: TraceRef) {
        let idx = self.cur_hmm_base + hmm_state;
        if idx < self.cur_hmm_size {
            // Recombine; updated even above the threshold so the stored
            // score stays correct.
            let hyp = &mut self.new_hmm_hyps[idx];
            if score < hyp.score {
                hyp.score = score;
                hyp.trace = trace;
            }
        } else if score < self.current_threshold {
            let old_size = self.cur_hmm_size;
            self.cur_hmm_size = idx + 1;
            if self.cur_hmm_size > self.new_hmm_hyps.len() {
                self.new_hmm_hyps
                    .resize(self.cur_hmm_size + HMM_SIZE_INCREMENT, HmmStateHyp::INACTIVE);
            }
            for i in old_size..idx {
                self.new_hmm_hyps[i] = HmmStateHyp::INACTIVE;
            }
            self.new_hmm_hyps[idx] = HmmStateHyp { score, trace };
        }
        if score < self.current_best {
            self.current_best = score;
            self.current_threshold = score + self.options.beam;
        }
    }

    /// Append a new arc hypothesis covering `[.., hmm_end)`.
    #[allow(clippy::too_many_arguments)]
    fn add_arc_hyp(
        &mut self,
        hmm_end: usize,
        state: StateId,
        target: StateId,
        seq: u32,
        input: Label,
        output: Label,
        score: Score,
        arc: u32,
    ) {
        if self.cur_arc_size + 1 > self.new_active_arcs.len() {
            self.new_active_arcs
                .resize(self.cur_arc_size + ARC_SIZE_INCREMENT, ArcHyp::default());
        }
        self.new_active_arcs[self.cur_arc_size] = ArcHyp {
            state,
            target,
            seq,
            input,
            output,
            score,
            arc,
            end: hmm_end,
        };
        self.cur_arc_size += 1;
    }

    /// Intra-arc transitions (loop, forward, skip) of an active arc.
    fn expand_arc(&mut self, arc: &ArcHyp, hmm_begin: usize) {
        let n_states = self.sequences().len(arc.seq as usize);
        for (hmm_state, idx) in (hmm_begin..arc.end).enumerate() {
            let hyp = self.hmm_hyps[idx];
            if !hyp.is_active() {
                continue;
            }
            let st = self.sequences().state(arc.seq as usize, hmm_state);
            let tdp = self.transition_models[st.transition as usize];
            let base = hyp.score;
            self.activate_or_update_hmm_state(hmm_state, base + tdp[TDP_LOOP], hyp.trace);
            if hmm_state + 1 < n_states {
                self.activate_or_update_hmm_state(hmm_state + 1, base + tdp[TDP_FORWARD], hyp.trace);
                if self.options.allow_skips && hmm_state + 2 < n_states {
                    self.activate_or_update_hmm_state(hmm_state + 2, base + tdp[TDP_SKIP], hyp.trace);
                }
            }
        }
    }

    /// Expand one state hypothesis: seed the HMM entry states of every
    /// outgoing arc and expand existing arc hypotheses of this state.
    fn expand_state(&mut self, state_hyp: &StateHyp, expand_arcs: bool, arc_hyp_index: &mut usize) {
        let incoming = state_hyp.incoming[0].is_active();
        let incoming_skip = self.options.allow_skips && state_hyp.incoming[1].is_active();
        let mut prev_arc_end = if *arc_hyp_index > 0 {
            self.active_arcs[*arc_hyp_index - 1].end
        } else {
            0
        };
        let n_arcs = self.network.n_arcs_of(state_hyp.state);
        for arc_index in 0..n_arcs {
            let arc = self.network.arc(state_hyp.state, arc_index);
            let Some(seq) = self.sequences().sequence_for_label(arc.input) else {
                debug_assert!(false, "arc input {} has no state sequence", arc.input);
                continue;
            };
            let n_states = self.sequences().len(seq);
            let is_initial = self.sequences().is_initial(seq);
            self.cur_hmm_base = self.cur_hmm_size;
            let arc_weight = arc.weight * self.options.weight_scale;
            if incoming {
                let mut score = state_hyp.incoming[0].score + arc_weight;
                if is_initial {
                    score += self.entry_forward;
                }
                self.activate_or_update_hmm_state(0, score, state_hyp.incoming[0].trace);
            }
            if incoming_skip && n_states > 1 {
                let mut score = state_hyp.incoming[1].score + arc_weight;
                if is_initial {
                    score += self.entry_skip;
                }
                self.activate_or_update_hmm_state(1, score, state_hyp.incoming[1].trace);
            }
            if expand_arcs && *arc_hyp_index < self.active_arcs.len() {
                let arc_hyp = self.active_arcs[*arc_hyp_index];
                if arc_hyp.arc == arc_index && arc_hyp.state == state_hyp.state {
                    self.expand_arc(&arc_hyp, prev_arc_end);
                    prev_arc_end = arc_hyp.end;
                    *arc_hyp_index += 1;
                }
            }
            if self.cur_hmm_size != self.cur_hmm_base {
                self.add_arc_hyp(
                    self.cur_hmm_size,
                    state_hyp.state,
                    arc.target,
                    seq as u32,
                    arc.input,
                    arc.output,
                    arc_weight,
                    arc_index,
                );
            }
        }
    }

    /// Interleaved expansion of incoming state hypotheses and active
    /// arc hypotheses into the scratch arrays.
    fn expand_states_and_arcs(&mut self) {
        let approx = (self.hmm_hyps.len() + 1) * HMM_SIZE_INCREASE_FACTOR;
        if approx > self.new_hmm_hyps.len() {
            self.new_hmm_hyps.resize(approx, HmmStateHyp::INACTIVE);
        }
        let approx_arcs = (self.active_arcs.len() + 1) * ARC_SIZE_INCREASE_FACTOR;
        if approx_arcs > self.new_active_arcs.len() {
            self.new_active_arcs.resize(approx_arcs, ArcHyp::default());
        }
        self.cur_hmm_size = 0;
        self.cur_arc_size = 0;
        // With prospective pruning disabled the threshold never tightens
        // during expansion.
        self.current_best = if self.options.prospective_pruning {
            INVALID_SCORE
        } else {
            0.0
        };
        self.current_threshold = INVALID_SCORE;

        // Sorting by state id lets the merge walk detect whether an arc
        // hypothesis matches an active incoming state hypothesis.
        self.active_states.sort_by_key(|h| h.state);

        let n_arc_hyps = self.active_arcs.len();
        let mut arc_idx = 0usize;
        let mut state_idx = 0usize;
        while state_idx < self.active_states.len() || arc_idx < n_arc_hyps {
            let state_has_incoming = state_idx < self.active_states.len() && {
                let h = &self.active_states[state_idx];
                h.incoming[0].is_active()
                    || (self.options.allow_skips && h.incoming[1].is_active())
            };
            if state_idx < self.active_states.len() && !state_has_incoming {
                state_idx += 1;
                continue;
            }
            let arc_state = (arc_idx < n_arc_hyps).then(|| self.active_arcs[arc_idx].state);
            let expand_arc_only = state_idx >= self.active_states.len()
                || arc_state.is_some_and(|s| s < self.active_states[state_idx].state);
            if expand_arc_only {
                // No incoming hypotheses at the source of this arc.
                let mut prev_end = if arc_idx > 0 {
                    self.active_arcs[arc_idx - 1].end
                } else {
                    0
                };
                loop {
                    let arc = self.active_arcs[arc_idx];
                    self.cur_hmm_base = self.cur_hmm_size;
                    self.expand_arc(&arc, prev_end);
                    if self.cur_hmm_base != self.cur_hmm_size {
                        self.add_arc_hyp(
                            self.cur_hmm_size,
                            arc.state,
                            arc.target,
                            arc.seq,
                            arc.input,
                            arc.output,
                            arc.score,
                            arc.arc,
                        );
                    }
                    prev_end = arc.end;
                    arc_idx += 1;
                    if arc_idx >= n_arc_hyps {
                        break;
                    }
                    let next_state = self.active_arcs[arc_idx].state;
                    if state_idx < self.active_states.len()
                        && next_state >= self.active_states[state_idx].state
                    {
                        break;
                    }
                }
            } else {
                let expand_arcs = arc_idx < n_arc_hyps
                    && self.active_arcs[arc_idx].state == self.active_states[state_idx].state;
                let state_hyp = self.active_states[state_idx];
                self.expand_state(&state_hyp, expand_arcs, &mut arc_idx);
                state_idx += 1;
            }
        }
    }

    /// Add the frame's acoustic scores to every live HMM state
    /// hypothesis; tracks the best and worst frame score.
    fn add_acoustic_scores(&mut self, scorer: &dyn Scorer) -> Result<()> {
        self.current_best = INVALID_SCORE;
        self.current_max = Score::NEG_INFINITY;
        self.n_active_hmm = 0;
        let num_emissions = self.model.num_emissions();
        let mut hmm_idx = 0usize;
        for arc_i in 0..self.cur_arc_size {
            let arc = self.new_active_arcs[arc_i];
            let mut hmm_state = 0usize;
            while hmm_idx < arc.end {
                if self.new_hmm_hyps[hmm_idx].is_active() {
                    let emission = self.sequences().state(arc.seq as usize, hmm_state).emission;
                    if emission >= num_emissions {
                        return Err(Error::emission_out_of_range(emission, num_emissions));
                    }
                    let acoustic = scorer.score(emission);
                    if acoustic.is_nan() {
                        return Err(Error::Model(format!(
                            "NaN acoustic score for emission {emission}"
                        )));
                    }
                    let hyp = &mut self.new_hmm_hyps[hmm_idx];
                    hyp.score += acoustic;
                    if hyp.score < self.current_best {
                        self.current_best = hyp.score;
                    }
                    if hyp.score > self.current_max {
                        self.current_max = hyp.score;
                    }
                    self.n_active_hmm += 1;
                }
                hmm_idx += 1;
                hmm_state += 1;
            }
        }
        Ok(())
    }

    /// Histogram threshold over a span of the scratch hypotheses.
    fn quantile_state_score(
        &mut self,
        begin: usize,
        end: usize,
        min_score: Score,
        max_score: Score,
        n_hyps: u32,
    ) -> Score {
        self.histogram.clear();
        self.histogram.set_limits(min_score, max_score);
        let mut n_active = 0u32;
        for hyp in &self.new_hmm_hyps[begin..end] {
            if hyp.is_active() && hyp.score < max_score {
                self.histogram.add(hyp.score);
                n_active += 1;
            }
        }
        if n_active < n_hyps {
            max_score
        } else {
            self.histogram.quantile(n_hyps)
        }
    }

    /// Histogram threshold over the compacted arrays (two-pass mode).
    fn quantile_in_place(&mut self, n_hyps: u32, max_score: Score) -> Score {
        self.histogram.clear();
        self.histogram.set_limits(0.0, max_score);
        let mut n_active = 0u32;
        for hyp in &self.hmm_hyps {
            if hyp.is_active() && hyp.score < max_score {
                self.histogram.add(hyp.score);
                n_active += 1;
            }
        }
        if n_active < n_hyps {
            max_score
        } else {
            self.histogram.quantile(n_hyps)
        }
    }

    /// Beam-prune the scratch hypotheses into the live arrays, rescaling
    /// scores to `[0, ..)` by subtracting the frame best. An arc
    /// hypothesis survives iff one of its HMM states survives.
    fn prune_hmm_states(&mut self, threshold: Score) {
        self.hmm_hyps.resize(self.cur_hmm_size, HmmStateHyp::INACTIVE);
        self.active_arcs.resize(self.cur_arc_size, ArcHyp::default());
        let mut state_out = 0usize;
        let mut arc_out = 0usize;
        let mut hmm_idx = 0usize;
        self.n_active_hmm = 0;
        for arc_i in 0..self.cur_arc_size {
            let mut arc = self.new_active_arcs[arc_i];
            let mut has_active = false;
            let states_begin = state_out;
            while hmm_idx < arc.end {
                let hyp = self.new_hmm_hyps[hmm_idx];
                let out = &mut self.hmm_hyps[state_out];
                state_out += 1;
                if hyp.is_active() && hyp.score < threshold {
                    has_active = true;
                    out.score = hyp.score - self.current_best;
                    out.trace = hyp.trace;
                    self.n_active_hmm += 1;
                } else {
                    out.trace = INVALID_TRACE;
                    out.score = INVALID_SCORE;
                }
                hmm_idx += 1;
            }
            if has_active {
                arc.end = state_out;
                self.active_arcs[arc_out] = arc;
                arc_out += 1;
            } else {
                // The whole arc hypothesis is pruned.
                state_out = states_begin;
            }
        }
        self.hmm_hyps.truncate(state_out);
        self.active_arcs.truncate(arc_out);
    }

    /// Second-pass pruning on the already compacted arrays.
    fn prune_hmm_states_in_place(&mut self, threshold: Score) {
        let mut state_out = 0usize;
        let mut arc_out = 0usize;
        let mut hmm_idx = 0usize;
        self.n_active_hmm = 0;
        for arc_i in 0..self.active_arcs.len() {
            let mut arc = self.active_arcs[arc_i];
            let mut has_active = false;
            let states_begin = state_out;
            while hmm_idx < arc.end {
                let hyp = self.hmm_hyps[hmm_idx];
                let keep = hyp.is_active() && hyp.score < threshold;
                self.hmm_hyps[state_out] = if keep {
                    self.n_active_hmm += 1;
                    has_active = true;
                    hyp
                } else {
                    HmmStateHyp::INACTIVE
                };
                state_out += 1;
                hmm_idx += 1;
            }
            if has_active {
                arc.end = state_out;
                self.active_arcs[arc_out] = arc;
                arc_out += 1;
            } else {
                state_out = states_begin;
            }
        }
        self.hmm_hyps.truncate(state_out);
        self.active_arcs.truncate(arc_out);
    }

    // ---- inter-arc transitions --------------------------------------

    /// Recombine into an incoming slot of a state hypothesis, recording
    /// a trace. Returns whether the hypothesis improved.
    #[allow(clippy::too_many_arguments)]
    fn activate_or_update_incoming(
        &mut self,
        state_hyp_idx: usize,
        slot: usize,
        trace: TraceRef,
        output: Label,
        input: Label,
        score: Score,
        arc_score: Score,
        word_end: bool,
    ) -> bool {
        let incoming = self.active_states[state_hyp_idx].incoming[slot];
        let update = score < incoming.score;
        let unscaled = self.unscaled(score);
        if update {
            let t = self.recorder.add(
                incoming.trace,
                trace,
                output,
                input,
                self.time,
                unscaled,
                arc_score,
                word_end,
            );
            self.active_states[state_hyp_idx].incoming[slot] = IncomingHyp { score, trace: t };
        } else if self.options.create_lattice && incoming.trace != INVALID_TRACE {
            self.recorder.add_alternative(
                incoming.trace,
                trace,
                output,
                input,
                self.time,
                unscaled,
                arc_score,
                word_end,
            );
        }
        update
    }

    /// Create incoming hypotheses for arcs whose last (or penultimate,
    /// with skips) HMM state survived.
    fn expand_inter_arc_transitions(&mut self, threshold: Score) {
        self.active_states.clear();
        self.state_to_hyp.clear();
        self.state_tdp.clear();
        self.word_end_hyp.clear();
        let mut prev_end = 0usize;
        for arc_i in 0..self.active_arcs.len() {
            let arc = self.active_arcs[arc_i];
            self.expand_transition(&arc, prev_end, threshold);
            prev_end = arc.end;
        }
    }

    fn expand_transition(&mut self, arc: &ArcHyp, states_begin: usize, threshold: Score) {
        let n_state_hyps = arc.end - states_begin;
        let n_states = self.sequences().len(arc.seq as usize);
        let is_final_phone = self.sequences().is_final(arc.seq as usize);
        let is_word_end = self.is_word_end(is_final_phone, arc.output);
        //                    last hmm state        the state before that
        let has_last = [
            n_state_hyps == n_states,
            n_states > 1 && n_state_hyps >= n_states - 1,
        ];
        if self.options.allow_skips {
            if !(has_last[0] || has_last[1]) || (!has_last[0] && has_last[1] && is_final_phone) {
                return;
            }
        } else if !has_last[0] {
            return;
        }
        let mut next_state_hyp: Option<usize> = None;
        for i in 0..self.n_incoming() {
            if !has_last[i] {
                continue;
            }
            let hmm_state = n_states - (i + 1);
            let hyp = self.hmm_hyps[states_begin + hmm_state];
            if hyp.is_active() {
                next_state_hyp = self.expand_trans_hyp(
                    hyp,
                    arc,
                    hmm_state,
                    threshold,
                    is_final_phone,
                    is_word_end,
                    i == 0,
                    next_state_hyp,
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_trans_hyp(
        &mut self,
        hyp: HmmStateHyp,
        arc: &ArcHyp,
        hmm_state: usize,
        threshold: Score,
        is_final_phone: bool,
        is_word_end: bool,
        is_last_state: bool,
        mut next_state_hyp: Option<usize>,
    ) -> Option<usize> {
        let st = self.sequences().state(arc.seq as usize, hmm_state);
        let tdp = self.transition_models[st.transition as usize];
        let mut base = hyp.score;

        if is_last_state {
            // Forward transitions leave only from the last state; the
            // forward penalty is not added when leaving the word.
            let score = if is_word_end {
                base += tdp[TDP_EXIT];
                base
            } else {
                base + tdp[TDP_FORWARD]
            };
            if score + self.anticipation(arc.target) < threshold {
                let idx = match next_state_hyp {
                    Some(i) => i,
                    None => self.get_state_hyp(arc.target),
                };
                next_state_hyp = Some(idx);
                if self.activate_or_update_incoming(
                    idx, 0, hyp.trace, arc.output, arc.input, score, arc.score, is_word_end,
                ) {
                    if self.options.output_is_word_end {
                        self.state_tdp.insert(arc.target, st.transition);
                    }
                    if self.options.word_end_pruning {
                        self.word_end_hyp.insert(arc.target, is_word_end);
                    }
                }
            }
        }
        if self.options.allow_skips {
            // Skips land only in the first (from the penultimate state)
            // or second (from the last state) HMM state of the next
            // allophone; the last state of a word cannot be skipped.
            let skip_tdp = tdp[TDP_SKIP];
            if (!is_final_phone || is_last_state) && skip_tdp < Score::INFINITY {
                let slot = usize::from(is_last_state);
                let score = if is_final_phone { base } else { base + skip_tdp };
                if score + self.anticipation(arc.target) < threshold {
                    let idx = match next_state_hyp {
                        Some(i) => i,
                        None => self.get_state_hyp(arc.target),
                    };
                    next_state_hyp = Some(idx);
                    if self.activate_or_update_incoming(
                        idx,
                        slot,
                        hyp.trace,
                        arc.output,
                        arc.input,
                        score,
                        arc.score,
                        is_final_phone,
                    ) {
                        if self.options.output_is_word_end {
                            self.state_tdp.insert(arc.target, st.transition);
                        }
                        if self.options.word_end_pruning {
                            self.word_end_hyp.insert(arc.target, is_word_end);
                        }
                    }
                }
            }
        }
        next_state_hyp
    }

    #[inline]
    fn is_word_end(&self, final_phone: bool, output: Label) -> bool {
        if self.options.output_is_word_end {
            output != EPSILON
        } else {
            final_phone
        }
    }

    // ---- epsilon expansion ------------------------------------------

    /// Depth-first expansion along epsilon arcs from every active state
    /// hypothesis. With `merge_eps_paths`, paths recombine by visited
    /// target state.
    fn expand_epsilon_arcs(&mut self, threshold: Score, anticipated_pruning: bool) {
        let merge = self.options.merge_eps_paths;
        let mut visited: FxHashMap<StateId, Score> = FxHashMap::default();
        let mut stack: Vec<EpsArcHyp> = Vec::new();
        let n_active = self.active_states.len();
        let mut total_best = INVALID_SCORE;
        let mut current_threshold = if anticipated_pruning {
            INVALID_SCORE
        } else {
            threshold
        };
        for state_hyp_index in 0..n_active {
            let state_hyp = self.active_states[state_hyp_index];
            let tdp_index = if self.options.output_is_word_end {
                self.state_tdp
                    .get(&state_hyp.state)
                    .copied()
                    .unwrap_or_default()
            } else {
                0
            };
            let has_incoming = [
                state_hyp.incoming[0].is_active(),
                self.options.allow_skips && state_hyp.incoming[1].is_active(),
            ];
            if !(has_incoming[0] || has_incoming[1]) {
                // Scores only grow along epsilon arcs; nothing to expand.
                continue;
            }
            let n_eps = self.network.n_epsilon_arcs_of(state_hyp.state);
            for i in 0..n_eps {
                let a = self.network.epsilon_arc(state_hyp.state, i);
                stack.push(EpsArcHyp {
                    target: a.target,
                    output: a.output,
                    score: a.weight * self.options.weight_scale,
                    trace: [
                        state_hyp.incoming[0].trace,
                        state_hyp.incoming[1].trace,
                    ],
                });
            }
            while let Some(arc) = stack.pop() {
                let is_word_end = arc.output != EPSILON && self.options.output_is_word_end;
                let mut best_score = INVALID_SCORE;
                for i in 0..self.n_incoming() {
                    if !has_incoming[i] {
                        continue;
                    }
                    // The indexed access is deliberate: the state hyp
                    // vector may have grown since the copy above.
                    let mut score = self.active_states[state_hyp_index].incoming[i].score
                        + arc.score;
                    if is_word_end {
                        score += self.transition_models[tdp_index as usize][TDP_EXIT];
                    }
                    if score < best_score {
                        best_score = score;
                    }
                    let already_better = merge
                        && visited
                            .get(&arc.target)
                            .is_some_and(|&v| v < score);
                    if !already_better
                        && score + self.anticipation(arc.target) < current_threshold
                    {
                        let idx = self.get_state_hyp(arc.target);
                        let updated = self.activate_or_update_incoming(
                            idx,
                            i,
                            arc.trace[i],
                            arc.output,
                            EPSILON,
                            score,
                            arc.score,
                            is_word_end,
                        );
                        if updated {
                            if self.options.output_is_word_end {
                                self.state_tdp.insert(arc.target, tdp_index);
                            }
                            if self.options.word_end_pruning {
                                self.word_end_hyp.insert(arc.target, is_word_end);
                            }
                        }
                        if merge {
                            visited.insert(arc.target, score);
                        }
                    }
                }
                if anticipated_pruning && best_score < total_best {
                    total_best = best_score;
                    current_threshold = total_best + threshold;
                }
                if best_score < current_threshold {
                    self.follow_epsilon_paths(&arc, &visited, current_threshold, merge, &mut stack);
                }
            }
        }
    }

    /// Push the epsilon continuations of `arc` onto the exploration
    /// stack; a second output label along one path forces an extra
    /// bookkeeping entry.
    fn follow_epsilon_paths(
        &mut self,
        arc: &EpsArcHyp,
        visited: &FxHashMap<StateId, Score>,
        threshold: Score,
        merge: bool,
        stack: &mut Vec<EpsArcHyp>,
    ) {
        let n = self.network.n_epsilon_arcs_of(arc.target);
        for i in 0..n {
            let next = self.network.epsilon_arc(arc.target, i);
            let score = arc.score + next.weight * self.options.weight_scale;
            let already_better = merge
                && visited
                    .get(&next.target)
                    .is_some_and(|&v| v < score);
            if already_better || score >= threshold {
                continue;
            }
            let output = if next.output == EPSILON {
                arc.output
            } else {
                next.output
            };
            let mut hyp = EpsArcHyp {
                target: next.target,
                output,
                score,
                trace: arc.trace,
            };
            if next.output != EPSILON && arc.output != EPSILON {
                // More than one output label on one epsilon path.
                let unscaled = self.unscaled(score);
                for (slot, t) in arc.trace.iter().enumerate().take(self.n_incoming()) {
                    if *t != INVALID_TRACE {
                        hyp.trace[slot] = self.recorder.add(
                            INVALID_TRACE,
                            *t,
                            arc.output,
                            EPSILON,
                            self.time,
                            unscaled,
                            arc.score,
                            false,
                        );
                    }
                }
            }
            stack.push(hyp);
        }
    }

    // ---- word-end pruning, purge, lattice ---------------------------

    /// Keep only word-end hypotheses within `threshold` of the best
    /// word end.
    fn prune_word_ends(&mut self, threshold: Score) {
        let mut best = INVALID_SCORE;
        for s in &self.active_states {
            if self.word_end_hyp.get(&s.state).copied().unwrap_or(false) {
                for slot in 0..self.n_incoming() {
                    if s.incoming[slot].is_active() && s.incoming[slot].score < best {
                        best = s.incoming[slot].score;
                    }
                }
            }
        }
        let limit = best + threshold;
        let word_end_hyp = std::mem::take(&mut self.word_end_hyp);
        let n_incoming = self.n_incoming();
        self.active_states.retain(|s| {
            if !word_end_hyp.get(&s.state).copied().unwrap_or(false) {
                return true;
            }
            (0..n_incoming).any(|i| s.incoming[i].is_active() && s.incoming[i].score < limit)
        });
        self.word_end_hyp = word_end_hyp;
        // Indices into active_states changed; the map is rebuilt on the
        // next frame before use.
        self.state_to_hyp.clear();
        for (i, s) in self.active_states.iter().enumerate() {
            self.state_to_hyp.insert(s.state, i);
        }
    }

    /// Remove bookkeeping of pruned hypotheses and rewrite live refs.
    fn purge_traces(&mut self) {
        self.recorder.purge_begin();
        for hyp in &self.hmm_hyps {
            if hyp.trace != INVALID_TRACE {
                self.recorder.purge_notify(hyp.trace);
            }
        }
        for s in &self.active_states {
            for slot in &s.incoming {
                if slot.trace != INVALID_TRACE {
                    self.recorder.purge_notify(slot.trace);
                }
            }
        }
        self.recorder.purge_end();
        for hyp in &mut self.hmm_hyps {
            if hyp.trace != INVALID_TRACE {
                hyp.trace = self.recorder.relocate(hyp.trace);
            }
        }
        for s in &mut self.active_states {
            for slot in &mut s.incoming {
                if slot.trace != INVALID_TRACE {
                    slot.trace = self.recorder.relocate(slot.trace);
                }
            }
        }
        self.statistics.purges += 1;
    }

    /// Prune sibling chains of the recorded lattice.
    fn prune_lattice(&mut self) {
        self.recorder.prune_begin();
        for s in &self.active_states {
            for slot in 0..self.n_incoming() {
                if s.incoming[slot].is_active() {
                    self.recorder.prune_notify(s.incoming[slot].trace);
                }
            }
        }
        self.recorder.prune_end();
    }

    // ---- end of utterance -------------------------------------------

    /// Sentence-end trace over all active final states, or the fallback
    /// over all hypotheses when no final was reached.
    pub fn finish(&mut self) -> Option<TraceRef> {
        if self.sentence_end == INVALID_TRACE {
            self.sentence_end = self.get_sentence_end();
            if self.sentence_end == INVALID_TRACE {
                warn!("no word end at sentence end found, using fallback");
                self.sentence_end = self.get_sentence_end_fallback();
            }
        }
        (self.sentence_end != INVALID_TRACE).then_some(self.sentence_end)
    }

    fn get_sentence_end(&mut self) -> TraceRef {
        let mut best = IncomingHyp::INACTIVE;
        for idx in 0..self.active_states.len() {
            let hyp = self.active_states[idx];
            if !self.network.is_final(hyp.state) {
                continue;
            }
            let state_weight = self.options.weight_scale * self.network.final_weight(hyp.state);
            for i in 0..self.n_incoming() {
                if !hyp.incoming[i].is_active() {
                    continue;
                }
                let final_score = hyp.incoming[i].score + state_weight;
                let update = final_score < best.score;
                let unscaled = self.unscaled(final_score);
                if update {
                    let t = self.recorder.add(
                        best.trace,
                        hyp.incoming[i].trace,
                        EPSILON,
                        EPSILON,
                        self.time,
                        unscaled,
                        state_weight,
                        false,
                    );
                    best = IncomingHyp { score: final_score, trace: t };
                } else if self.options.create_lattice && best.trace != INVALID_TRACE {
                    self.recorder.add_alternative(
                        best.trace,
                        hyp.incoming[i].trace,
                        EPSILON,
                        EPSILON,
                        self.time,
                        unscaled,
                        state_weight,
                        false,
                    );
                }
            }
        }
        best.trace
    }

    /// Best active hypothesis with a synthetic end trace at the current
    /// time.
    fn get_sentence_end_fallback(&mut self) -> TraceRef {
        let mut best = IncomingHyp::INACTIVE;
        for idx in 0..self.active_states.len() {
            let hyp = self.active_states[idx];
            for i in 0..self.n_incoming() {
                if !hyp.incoming[i].is_active() {
                    continue;
                }
                let score = hyp.incoming[i].score;
                let unscaled = self.unscaled(score);
                if score < best.score {
                    let t = self.recorder.add(
                        best.trace,
                        hyp.incoming[i].trace,
                        EPSILON,
                        EPSILON,
                        self.time,
                        unscaled,
                        0.0,
                        false,
                    );
                    best = IncomingHyp { score, trace: t };
                } else if self.options.create_lattice && best.trace != INVALID_TRACE {
                    self.recorder.add_alternative(
                        best.trace,
                        hyp.incoming[i].trace,
                        EPSILON,
                        EPSILON,
                        self.time,
                        unscaled,
                        0.0,
                        false,
                    );
                }
            }
        }
        best.trace
    }

    /// Best path after [`SearchSpace::finish`].
    pub fn traceback(&mut self) -> Option<BestPath> {
        let end = self.finish()?;
        Some(
            self.recorder
                .create_best_path(end, self.options.ignore_last_output),
        )
    }

    /// Materialize the recorded lattice after [`SearchSpace::finish`].
    pub fn create_lattice(&mut self) -> Option<Lattice> {
        let end = self.finish()?;
        Some(self.recorder.create_lattice(end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::state_sequence::{HmmState, StateSequenceList};
    use trellis_network::StaticNetwork;

    struct FrameScorer(Vec<f32>);

    impl Scorer for FrameScorer {
        fn score(&self, emission: u32) -> Score {
            self.0[emission as usize]
        }
    }

    fn model(sequences: StateSequenceList, num_emissions: u32) -> SharedArc<AcousticModel> {
        SharedArc::new(
            AcousticModel::new(sequences, vec![[0.0; 6]], num_emissions, 0)
                .unwrap(),
        )
    }

    /// Words A (emissions 0..3) and B (emissions 3..6), three HMM
    /// states each, from state 0 to the final state 1.
    fn two_word_network() -> (StaticNetwork, SharedArc<AcousticModel>) {
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
        let mut net = StaticNetwork::with_states(2);
        net.add_arc(0, 1, 1, -(0.6f32.ln()), 1, &seqs);
        net.add_arc(0, 2, 2, -(0.4f32.ln()), 1, &seqs);
        net.set_final(1, 0.0);
        (net, model(seqs, 6))
    }

    fn a_frames() -> FrameScorer {
        FrameScorer(vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0])
    }

    #[test]
    fn two_word_toy_prefers_cheap_word() {
        let (net, am) = two_word_network();
        let mut space = SearchSpace::new(net, am, SearchOptions::default()).unwrap();
        for _ in 0..6 {
            space.feed(&a_frames()).unwrap();
        }
        let path = space.traceback().unwrap();
        assert_eq!(path.items.len(), 1);
        assert_eq!(path.items[0].label, 1);
        assert_eq!(path.items[0].time, 6);
        assert!((path.score - -(0.6f32.ln())).abs() < 1e-5);
    }

    #[test]
    fn beam_invariant_after_pruning() {
        let (net, am) = two_word_network();
        let beam = 0.75;
        let mut space = SearchSpace::new(
            net,
            am,
            SearchOptions { beam, ..SearchOptions::default() },
        )
        .unwrap();
        for _ in 0..6 {
            space.feed(&a_frames()).unwrap();
            // Scores are rescaled so the frame best is zero.
            for hyp in &space.hmm_hyps {
                if hyp.is_active() {
                    assert!(hyp.score >= 0.0);
                    assert!(hyp.score <= beam + 1e-5, "score {}", hyp.score);
                }
            }
        }
    }

    #[test]
    fn unscaled_scores_match_infinite_beam_run() {
        let (net1, am1) = two_word_network();
        let mut exhaustive = SearchSpace::new(net1, am1, SearchOptions::default()).unwrap();
        let (net2, am2) = two_word_network();
        let mut pruned = SearchSpace::new(
            net2,
            am2,
            SearchOptions { beam: 100.0, ..SearchOptions::default() },
        )
        .unwrap();
        for _ in 0..6 {
            exhaustive.feed(&a_frames()).unwrap();
            pruned.feed(&a_frames()).unwrap();
            // A generous beam prunes nothing: identical hypothesis sets.
            assert_eq!(exhaustive.n_active_hmm_states(), pruned.n_active_hmm_states());
        }
        let a = exhaustive.traceback().unwrap();
        let b = pruned.traceback().unwrap();
        assert_eq!(a.items, b.items);
        assert!((a.score - b.score).abs() < 1e-4);
    }

    #[test]
    fn histogram_pruning_bounds_hypotheses() {
        // Eight parallel one-state words with distinct scores.
        let mut seqs = StateSequenceList::new();
        for e in 0..8 {
            seqs.push(&[HmmState { emission: e, transition: 0 }], true, true);
        }
        let mut net = StaticNetwork::with_states(2);
        for w in 0..8u32 {
            net.add_arc(0, w + 1, w + 1, 0.1 * w as f32, 1, &seqs);
        }
        net.set_final(1, 0.0);
        let am = model(seqs, 8);
        let limit = 3;
        let mut space = SearchSpace::new(
            net,
            am,
            SearchOptions {
                beam: 1000.0,
                pruning_limit: limit,
                ..SearchOptions::default()
            },
        )
        .unwrap();
        let scorer = FrameScorer((0..8).map(|e| e as f32 * 0.01).collect());
        space.feed(&scorer).unwrap();
        // Bin resolution admits a small overshoot beyond the limit.
        assert!(space.n_active_hmm_states() <= limit as usize + 2);
        assert!(space.n_active_hmm_states() >= 1);
    }

    #[test]
    fn epsilon_self_loop_stays_bounded() {
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
        let mut net = StaticNetwork::with_states(2);
        net.add_arc(0, 1, 1, 0.0, 1, &seqs);
        net.add_arc(1, EPSILON, EPSILON, 0.1, 1, &seqs); // positive eps self-loop
        net.set_final(1, 0.0);
        let am = model(seqs, 3);
        let mut space = SearchSpace::new(
            net,
            am,
            SearchOptions {
                merge_eps_paths: true,
                purge_interval: 4,
                ..SearchOptions::default()
            },
        )
        .unwrap();
        let scorer = FrameScorer(vec![0.0, 0.0, 0.0]);
        for _ in 0..10 {
            space.feed(&scorer).unwrap();
            // One hypothesis per state, the loop does not multiply.
            assert!(space.n_active_states() <= 2);
        }
        let path = space.traceback().unwrap();
        assert_eq!(path.items.len(), 1);
    }

    #[test]
    fn decoding_is_deterministic() {
        let run = || {
            let (net, am) = two_word_network();
            let mut space = SearchSpace::new(
                net,
                am,
                SearchOptions { beam: 10.0, ..SearchOptions::default() },
            )
            .unwrap();
            for _ in 0..6 {
                space.feed(&a_frames()).unwrap();
            }
            let p = space.traceback().unwrap();
            (p.items.clone(), p.score.to_bits())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn reset_then_refeed_equals_fresh_instance() {
        let (net, am) = two_word_network();
        let mut space = SearchSpace::new(net, am, SearchOptions::default()).unwrap();
        for _ in 0..3 {
            space.feed(&a_frames()).unwrap();
        }
        space.reset();
        for _ in 0..6 {
            space.feed(&a_frames()).unwrap();
        }
        let after_reset = space.traceback().unwrap();

        let (net2, am2) = two_word_network();
        let mut fresh = SearchSpace::new(net2, am2, SearchOptions::default()).unwrap();
        for _ in 0..6 {
            fresh.feed(&a_frames()).unwrap();
        }
        let fresh_path = fresh.traceback().unwrap();
        assert_eq!(after_reset.items, fresh_path.items);
        assert_eq!(after_reset.score.to_bits(), fresh_path.score.to_bits());
    }

    #[test]
    fn skip_transition_reaches_word_end_in_two_frames() {
        let (net, am) = two_word_network();
        let mut space = SearchSpace::new(
            net,
            am,
            SearchOptions { allow_skips: true, ..SearchOptions::default() },
        )
        .unwrap();
        for _ in 0..2 {
            space.feed(&a_frames()).unwrap();
        }
        let path = space.traceback().unwrap();
        assert_eq!(path.items.len(), 1);
        assert_eq!(path.items[0].label, 1);
        assert_eq!(path.items[0].time, 2);
    }

    #[test]
    fn zero_frames_yield_the_sentinel() {
        let (net, am) = two_word_network();
        let mut space = SearchSpace::new(net, am, SearchOptions::default()).unwrap();
        let path = space.traceback().unwrap();
        assert!(path.items.is_empty());
        assert_eq!(path.score, 0.0);
    }

    #[test]
    fn nan_scores_are_fatal() {
        let (net, am) = two_word_network();
        let mut space = SearchSpace::new(net, am, SearchOptions::default()).unwrap();
        let scorer = FrameScorer(vec![f32::NAN; 6]);
        assert!(matches!(space.feed(&scorer), Err(Error::Model(_))));
    }

    #[test]
    fn purge_mid_decode_leaves_result_unchanged() {
        let decode = |purge_interval: u32| {
            let (net, am) = two_word_network();
            let mut space = SearchSpace::new(
                net,
                am,
                SearchOptions { purge_interval, ..SearchOptions::default() },
            )
            .unwrap();
            for _ in 0..6 {
                space.feed(&a_frames()).unwrap();
            }
            space.traceback().unwrap()
        };
        let with_purge = decode(2);
        let without_purge = decode(1000);
        assert_eq!(with_purge.items, without_purge.items);
        assert_eq!(with_purge.score.to_bits(), without_purge.score.to_bits());
    }
}
