// crates/trellis-rescore/src/lib.rs

//! Push-forward LM rescoring.
//!
//! Traverses a word lattice in chronological (topological) order,
//! carrying hypotheses with LM histories through per-state priority
//! queues. Hypotheses recombine by reduced history, are pruned per
//! state and against the best prospect at the same boundary time, and
//! the surviving tracebacks are emitted as one of three outputs:
//! single-best, replacement approximation, or traceback approximation.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

mod queues;

use rustc_hash::FxHashMap;
use tracing::debug;

use trellis_core::error::{Error, Result};
use trellis_core::lexicon::Lexicon;
use trellis_core::lm::{History, LanguageModel};
use trellis_core::semiring::PairWeight;
use trellis_core::types::{Label, Score, StateId, EPSILON};
use trellis_lattice::{Lattice, LatticeArc};

use queues::{ProspectQueue, SeqScoreQueue};

/// Output shape of the rescoring pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RescorerType {
    /// A linear lattice holding only the best rescored path.
    SingleBest,
    /// The original lattice shape with the LM dimension replaced by the
    /// best LM score observed on each arc.
    ReplacementApproximation,
    /// Only the states and arcs visited by surviving tracebacks.
    TracebackApproximation,
}

/// Rescoring configuration.
#[derive(Clone, Debug)]
pub struct RescoreOptions {
    pub rescorer_type: RescorerType,
    /// Maximum number of hypotheses expanded per state.
    pub max_hypotheses: usize,
    /// Pruning threshold relative to the LM scale.
    pub pruning_threshold: Score,
    /// Reduce histories to at most this many tokens (0 = no limit).
    pub history_limit: u32,
    /// Scale applied to the admissible lookahead.
    pub lookahead_scale: Score,
    /// Scale of the replaced LM dimension.
    pub lm_scale: Score,
    /// Delay LM score computation to batch more hypotheses.
    pub delayed_rescoring: bool,
    /// Hypothesis count per state that triggers delayed rescoring.
    pub delayed_rescoring_max_hyps: usize,
}

impl Default for RescoreOptions {
    fn default() -> Self {
        Self {
            rescorer_type: RescorerType::SingleBest,
            max_hypotheses: 5,
            pruning_threshold: 14.0,
            history_limit: 0,
            lookahead_scale: 1.0,
            lm_scale: 1.0,
            delayed_rescoring: false,
            delayed_rescoring_max_hyps: 100,
        }
    }
}

/// One rescoring hypothesis.
#[derive(Clone, Debug)]
pub(crate) struct Hypothesis {
    pub history: History,
    pub seq_score: Score,
    pub seq_prospect_score: Score,
    /// LM score of the last traversed arc.
    pub score: Score,
    pub index: u32,
    pub prev_hyp: u32,
    pub start_state: StateId,
    pub arc: u32,
    pub label: Label,
    pub rescored: bool,
}

/// The rescorer; borrows the richer LM and the lexicon.
pub struct PushForwardRescorer<'a, L: LanguageModel> {
    lm: &'a L,
    lexicon: &'a Lexicon,
    options: RescoreOptions,
}

impl<'a, L: LanguageModel> PushForwardRescorer<'a, L> {
    #[must_use]
    pub fn new(lm: &'a L, lexicon: &'a Lexicon, options: RescoreOptions) -> Self {
        Self {
            lm,
            lexicon,
            options,
        }
    }

    /// Rescore the LM dimension of `lattice`. An empty input is
    /// returned unchanged.
    pub fn rescore(&self, lattice: &Lattice) -> Result<Lattice> {
        if lattice.is_empty() {
            return Ok(lattice.clone());
        }
        let toposort = lattice.chronological_order();
        // The unique final; dead states may still trail it in the order.
        let final_pos = toposort
            .iter()
            .rposition(|&s| lattice.state(s).final_weight.is_some())
            .unwrap_or(toposort.len().saturating_sub(1));
        let final_state = *toposort
            .get(final_pos)
            .ok_or_else(|| Error::Search("rescoring an empty lattice".into()))?;
        let lookahead = self.calculate_lookahead(lattice, &toposort);

        let n_states = lattice.num_states() as usize;
        let max_time = lattice.word_boundary(final_state);
        let mut best_score_per_time =
            vec![Score::INFINITY; max_time.saturating_add(1) as usize + 1];
        let mut all_hyps: Vec<ProspectQueue> = (0..n_states).map(|_| ProspectQueue::new()).collect();
        let mut traceback: Vec<Hypothesis> = Vec::new();
        let mut state_end: Vec<usize> = Vec::new();
        let mut num_expansions = 0usize;

        all_hyps[lattice.initial() as usize].push(Hypothesis {
            history: self.lm.start_history(),
            seq_score: 0.0,
            seq_prospect_score: lookahead[lattice.initial() as usize],
            score: 0.0,
            index: 0,
            prev_hyp: 0,
            start_state: lattice.initial(),
            arc: 0,
            label: EPSILON,
            rescored: true,
        });

        for &current_state in &toposort {
            let cs = current_state as usize;
            let current_time = lattice.word_boundary(current_state).min(max_time) as usize;
            let pruning_limit =
                best_score_per_time[current_time] + self.options.lm_scale * self.options.pruning_threshold;

            // Everything that made it this far enters the traceback,
            // whether or not it gets expanded.
            let mut kept = ProspectQueue::new();
            while let Some(mut hyp) = all_hyps[cs].pop() {
                hyp.index = traceback.len() as u32;
                traceback.push(hyp.clone());
                kept.push(hyp);
            }
            all_hyps[cs] = kept;

            let has_arcs = !lattice.state(current_state).arcs.is_empty();
            let mut hyps: SeqScoreQueue = if self.options.delayed_rescoring
                && (all_hyps[cs].len() > self.options.max_hypotheses || !has_arcs)
            {
                let mut rescored = ProspectQueue::new();
                while let Some(mut hyp) = all_hyps[cs].pop() {
                    self.rescore_hypothesis(&mut hyp, &mut traceback, &lookahead, lattice)?;
                    // Keep the traceback view of this hypothesis current,
                    // the output passes read scores from there.
                    traceback[hyp.index as usize] = hyp.clone();
                    rescored.push(hyp);
                }
                let mut q = self.recombine(rescored);
                while q.len() > self.options.delayed_rescoring_max_hyps {
                    q.pop();
                }
                q
            } else if self.options.delayed_rescoring {
                let mut q = SeqScoreQueue::new();
                while let Some(hyp) = all_hyps[cs].pop() {
                    q.push(hyp);
                }
                q
            } else {
                let drained = std::mem::replace(&mut all_hyps[cs], ProspectQueue::new());
                self.recombine(drained)
            };

            while let Some(hyp) = hyps.peek().cloned() {
                let predecessor = hyp.index;
                // A single remaining hypothesis is never pruned.
                if hyps.len() > 1
                    && (hyps.len() > self.options.max_hypotheses
                        || hyp.seq_prospect_score > pruning_limit)
                {
                    hyps.pop();
                    continue;
                }
                for (arc_counter, arc) in lattice.state(current_state).arcs.iter().enumerate() {
                    let to = arc.target;
                    let mut new_hyp = Hypothesis {
                        history: hyp.history.clone(),
                        seq_score: hyp.seq_score,
                        seq_prospect_score: 0.0,
                        score: 0.0,
                        index: 0,
                        prev_hyp: predecessor,
                        start_state: current_state,
                        arc: arc_counter as u32,
                        label: arc.output,
                        rescored: false,
                    };
                    if arc.output != EPSILON {
                        let lemma = self
                            .lexicon
                            .output_to_lemma(arc.output, lattice.output_type())
                            .map_err(|e| Error::Config(format!("lattice alphabet: {e}")))?;
                        if self.options.delayed_rescoring {
                            new_hyp.history = self.lm.extend(&hyp.history, lemma);
                            new_hyp.score = arc.weight.lm;
                        } else {
                            new_hyp.score = self.lm.score(&hyp.history, lemma);
                            new_hyp.history = self.lm.extend(&hyp.history, lemma);
                            new_hyp.rescored = true;
                        }
                    } else if to == final_state {
                        // Sentence-end score is never delayed, but the
                        // chain still rescores in delayed mode.
                        new_hyp.score = self.lm.sentence_end_score(&hyp.history);
                        new_hyp.rescored = !self.options.delayed_rescoring;
                    } else {
                        new_hyp.score = arc.weight.lm;
                        new_hyp.rescored = !self.options.delayed_rescoring;
                    }
                    new_hyp.seq_score +=
                        self.options.lm_scale * new_hyp.score + arc.weight.am;
                    new_hyp.seq_prospect_score = new_hyp.seq_score + lookahead[to as usize];

                    let to_time = lattice.word_boundary(to).min(max_time) as usize;
                    if new_hyp.seq_prospect_score < best_score_per_time[to_time] {
                        best_score_per_time[to_time] = new_hyp.seq_prospect_score;
                    }
                    all_hyps[to as usize].push(new_hyp);
                    num_expansions += 1;
                }
                hyps.pop();
            }
            state_end.push(traceback.len());
        }

        debug!(num_expansions, "push-forward rescoring expansions");

        match self.options.rescorer_type {
            RescorerType::SingleBest => Ok(self.single_best(
                lattice,
                final_state,
                final_pos,
                &traceback,
                &state_end,
            )),
            RescorerType::ReplacementApproximation => {
                Ok(Self::replacement_approximation(lattice, &toposort, &traceback))
            }
            RescorerType::TracebackApproximation => {
                Ok(Self::traceback_approximation(lattice, final_state, &traceback))
            }
        }
    }

    /// Admissible per-state heuristic: minimum projected cost to the
    /// final state.
    fn calculate_lookahead(&self, lattice: &Lattice, toposort: &[StateId]) -> Vec<Score> {
        let mut lookahead = vec![Score::INFINITY; lattice.num_states() as usize];
        if let Some(&last) = toposort.last() {
            lookahead[last as usize] = 0.0;
        }
        for &state in toposort.iter().rev().skip(1) {
            for arc in &lattice.state(state).arcs {
                let projected =
                    arc.weight.am + self.options.lm_scale * arc.weight.lm;
                let v = lookahead[arc.target as usize] + projected;
                if v < lookahead[state as usize] {
                    lookahead[state as usize] = v;
                }
            }
        }
        for v in &mut lookahead {
            *v *= self.options.lookahead_scale;
        }
        lookahead
    }

    /// Recombine hypotheses whose histories agree after reduction,
    /// keeping the lowest prospect score.
    fn recombine(&self, mut hs: ProspectQueue) -> SeqScoreQueue {
        let mut recombination: FxHashMap<History, Hypothesis> = FxHashMap::default();
        while let Some(hyp) = hs.pop() {
            let key = if self.options.history_limit > 0 {
                self.lm.reduced_history(&hyp.history, self.options.history_limit)
            } else {
                hyp.history.clone()
            };
            match recombination.get_mut(&key) {
                Some(existing) => {
                    if existing.seq_prospect_score > hyp.seq_prospect_score {
                        *existing = hyp;
                    }
                }
                None => {
                    recombination.insert(key, hyp);
                }
            }
        }
        let mut result = SeqScoreQueue::new();
        for (_, hyp) in recombination {
            result.push(hyp);
        }
        result
    }

    /// Materialize the delayed LM scores of `hyp` by walking back the
    /// predecessor chain and scoring oldest-first.
    fn rescore_hypothesis(
        &self,
        hyp: &mut Hypothesis,
        traceback: &mut [Hypothesis],
        lookahead: &[Score],
        lattice: &Lattice,
    ) -> Result<()> {
        // Collect the unrescored suffix (indices into the traceback;
        // u32::MAX marks the borrowed head hypothesis itself).
        let mut pending: Vec<u32> = Vec::new();
        let mut cursor = hyp.prev_hyp;
        if !hyp.rescored {
            pending.push(u32::MAX);
            while !traceback[cursor as usize].rescored {
                pending.push(cursor);
                cursor = traceback[cursor as usize].prev_hyp;
            }
        }
        for &idx in pending.iter().rev() {
            let (prev_idx, label, start_state, arc) = {
                let h = if idx == u32::MAX { &*hyp } else { &traceback[idx as usize] };
                (h.prev_hyp, h.label, h.start_state, h.arc)
            };
            let (pred_history, pred_seq_score) = {
                let p = &traceback[prev_idx as usize];
                (p.history.clone(), p.seq_score)
            };
            let lattice_arc = lattice.state(start_state).arcs[arc as usize];
            let score = if label == EPSILON {
                let h = if idx == u32::MAX { &*hyp } else { &traceback[idx as usize] };
                h.score
            } else {
                let lemma = self
                    .lexicon
                    .output_to_lemma(label, lattice.output_type())
                    .map_err(|e| Error::Config(format!("lattice alphabet: {e}")))?;
                self.lm.score(&pred_history, lemma)
            };
            let seq_score =
                pred_seq_score + self.options.lm_scale * score + lattice_arc.weight.am;
            let prospect = seq_score + lookahead[lattice_arc.target as usize];
            let h = if idx == u32::MAX { &mut *hyp } else { &mut traceback[idx as usize] };
            h.score = score;
            h.seq_score = seq_score;
            h.seq_prospect_score = prospect;
            h.rescored = true;
        }
        Ok(())
    }

    /// Best-path output: a linear lattice reconstructed from the best
    /// final traceback entry.
    fn single_best(
        &self,
        lattice: &Lattice,
        original_final: StateId,
        final_pos: usize,
        traceback: &[Hypothesis],
        state_end: &[usize],
    ) -> Lattice {
        let mut output = Lattice::new();
        output.set_output_type(lattice.output_type());

        let final_hyps_begin = if final_pos > 0 {
            state_end[final_pos - 1]
        } else {
            0
        };
        let final_hyps_end = state_end.get(final_pos).copied().unwrap_or(0);
        let mut best_idx = final_hyps_begin;
        let mut best_score = Score::INFINITY;
        for (i, hyp) in traceback
            .iter()
            .enumerate()
            .take(final_hyps_end)
            .skip(final_hyps_begin)
        {
            if hyp.seq_score < best_score {
                best_score = hyp.seq_score;
                best_idx = i;
            }
        }
        if traceback.is_empty() {
            return output;
        }

        let mut state = output.add_state();
        output.set_final(
            state,
            lattice.state(original_final).final_weight.unwrap_or_else(PairWeight::one),
        );
        output.set_word_boundary(state, lattice.word_boundary(original_final));

        let mut hyp_idx = best_idx;
        loop {
            let hyp = &traceback[hyp_idx];
            if hyp_idx as u32 == hyp.prev_hyp {
                break; // arrived at the first hypothesis
            }
            let original_arc = lattice.state(hyp.start_state).arcs[hyp.arc as usize];
            let prev_state = output.add_state();
            output.set_word_boundary(prev_state, lattice.word_boundary(hyp.start_state));
            output.add_arc(
                prev_state,
                LatticeArc {
                    input: original_arc.input,
                    output: original_arc.output,
                    weight: PairWeight::new(original_arc.weight.am, hyp.score),
                    target: state,
                },
            );
            state = prev_state;
            hyp_idx = hyp.prev_hyp as usize;
        }
        output.set_initial(state);
        output
    }

    /// Keep the lattice shape; replace the LM dimension with the best
    /// observed score per arc (unvisited arcs become unreachable).
    fn replacement_approximation(
        lattice: &Lattice,
        toposort: &[StateId],
        traceback: &[Hypothesis],
    ) -> Lattice {
        let n = lattice.num_states() as usize;
        let mut state_offsets = vec![0usize; n + 1];
        for &s in toposort {
            state_offsets[s as usize + 1] = lattice.state(s).arcs.len();
        }
        for i in 0..n {
            state_offsets[i + 1] += state_offsets[i];
        }
        let mut scores = vec![Score::INFINITY; state_offsets[n]];
        let mut visited = vec![false; traceback.len()];
        if !visited.is_empty() {
            visited[0] = true;
        }
        for i in (0..traceback.len()).rev() {
            let mut hyp_index = i;
            while !visited[hyp_index] {
                visited[hyp_index] = true;
                let hyp = &traceback[hyp_index];
                let offset = state_offsets[hyp.start_state as usize] + hyp.arc as usize;
                if scores[offset].is_infinite() {
                    scores[offset] = hyp.score;
                }
                hyp_index = hyp.prev_hyp as usize;
            }
        }
        let mut output = lattice.clone();
        for s in 0..lattice.num_states() {
            let base = state_offsets[s as usize];
            for (i, arc) in output.state_mut(s).arcs.iter_mut().enumerate() {
                arc.weight.lm = scores[base + i];
            }
        }
        output
    }

    /// Keep only the states and arcs visited by surviving tracebacks.
    fn traceback_approximation(
        lattice: &Lattice,
        original_final: StateId,
        traceback: &[Hypothesis],
    ) -> Lattice {
        let mut output = Lattice::new();
        output.set_output_type(lattice.output_type());
        if traceback.is_empty() {
            return output;
        }
        // End state of every traceback entry, for easy sharing checks.
        let mut end_state_ids = vec![0 as StateId; traceback.len()];
        for (t, hyp) in traceback.iter().enumerate().skip(1) {
            end_state_ids[t] = lattice.state(hyp.start_state).arcs[hyp.arc as usize].target;
        }

        let mut new_end_states: Vec<Option<StateId>> = vec![None; traceback.len()];
        let mut visited = vec![false; traceback.len()];

        let start = output.add_state();
        output.set_word_boundary(start, lattice.word_boundary(lattice.initial()));
        output.set_initial(start);
        new_end_states[0] = Some(start);
        visited[0] = true;

        let final_out = output.add_state();
        output.set_final(
            final_out,
            lattice.state(original_final).final_weight.unwrap_or_else(PairWeight::one),
        );
        output.set_word_boundary(final_out, lattice.word_boundary(original_final));

        for i in (1..traceback.len()).rev() {
            if visited[i] {
                continue;
            }
            let pruned_path = end_state_ids[i] != original_final;
            if !pruned_path {
                new_end_states[i] = Some(final_out);
            } else if i + 1 < traceback.len()
                && end_state_ids[i] == end_state_ids[i + 1]
                && new_end_states[i + 1].is_some()
            {
                new_end_states[i] = new_end_states[i + 1];
            } else {
                // Dead-end traceback entry of a pruned path.
                continue;
            }
            let mut hyp_index = i;
            while !visited[hyp_index] {
                visited[hyp_index] = true;
                let hyp = &traceback[hyp_index];
                let prev = hyp.prev_hyp as usize;
                if new_end_states[prev].is_none() {
                    let s = output.add_state();
                    output.set_word_boundary(s, lattice.word_boundary(hyp.start_state));
                    new_end_states[prev] = Some(s);
                }
                let original_arc = lattice.state(hyp.start_state).arcs[hyp.arc as usize];
                let (from, to) = (
                    new_end_states[prev].unwrap_or(start),
                    new_end_states[hyp_index].unwrap_or(final_out),
                );
                output.add_arc(
                    from,
                    LatticeArc {
                        input: original_arc.input,
                        output: original_arc.output,
                        weight: PairWeight::new(original_arc.weight.am, hyp.score),
                        target: to,
                    },
                );
                hyp_index = prev;
            }
        }
        output
    }
}
