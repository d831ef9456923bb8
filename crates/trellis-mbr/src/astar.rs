// crates/trellis-mbr/src/astar.rs

//! A*-style MBR engine.
//!
//! Searches the prefix tree of word strings induced by the hypothesis
//! space. Each search node carries the Levenshtein DP columns of its
//! prefix against every summation hypothesis; the column minima give an
//! admissible lower bound (`estimate`) on the risk of any completion,
//! and for final nodes the column ends give the exact risk
//! (`overestimate`). Expansion picks the node with the smallest
//! `(estimate, -total_probability)`; per-length histogram pruning keeps
//! the stack bounded. The search terminates when the best final node's
//! overestimate does not exceed any other entry's estimate, when the
//! MAP posterior reaches one half, or when nothing is expandable.

use tracing::debug;

use trellis_core::types::Label;
use trellis_lattice::NBestList;

use crate::levenshtein::{column_distance, column_lower_bound, extend_column, initial_column};
use crate::nbest::MbrResult;

/// A* engine configuration.
#[derive(Clone, Copy, Debug)]
pub struct AStarMbrOptions {
    /// Stack entries kept per hypothesis length.
    pub max_stack_size: usize,
    /// Hypotheses included in the risk summation.
    pub summation_space: usize,
    /// Bound on expansions (safety net).
    pub max_expansions: usize,
}

impl Default for AStarMbrOptions {
    fn default() -> Self {
        Self {
            max_stack_size: 100,
            summation_space: usize::MAX,
            max_expansions: 100_000,
        }
    }
}

struct SearchNode {
    hypothesis: Vec<Label>,
    /// Posterior mass of the summation hypotheses sharing this prefix.
    total_probability: f64,
    /// Last DP column against every summation hypothesis.
    columns: Vec<Vec<u32>>,
    /// Lower bound on the risk of any completion.
    estimate: f64,
    /// Exact risk; only defined for final nodes.
    overestimate: f64,
    is_final: bool,
    explorable: bool,
}

fn node_estimate(columns: &[Vec<u32>], probabilities: &[f64]) -> f64 {
    columns
        .iter()
        .zip(probabilities)
        .map(|(c, p)| p * f64::from(column_lower_bound(c)))
        .sum()
}

fn node_risk(columns: &[Vec<u32>], probabilities: &[f64]) -> f64 {
    columns
        .iter()
        .zip(probabilities)
        .map(|(c, p)| p * f64::from(column_distance(c)))
        .sum()
}

/// Run the A* engine over a normalized list.
#[must_use]
pub fn search(list: &NBestList, options: AStarMbrOptions) -> Option<MbrResult> {
    let first = list.hypotheses.first()?;
    let map_posterior = (-f64::from(first.posterior)).exp();
    let summation_space = options.summation_space.min(list.hypotheses.len());
    let sentences: Vec<&[Label]> = list.hypotheses[..summation_space]
        .iter()
        .map(|h| h.labels.as_slice())
        .collect();
    let probabilities: Vec<f64> = list.hypotheses[..summation_space]
        .iter()
        .map(|h| (-f64::from(h.posterior)).exp())
        .collect();

    // One-half criterion: the MAP hypothesis is optimal.
    if map_posterior >= 0.5 {
        let columns: Vec<Vec<u32>> = sentences
            .iter()
            .map(|s| {
                let mut c = initial_column(s.len());
                for &x in &first.labels {
                    c = extend_column(&c, x, s);
                }
                c
            })
            .collect();
        return Some(MbrResult {
            hypothesis: first.labels.clone(),
            posterior: first.posterior,
            risk: node_risk(&columns, &probabilities),
            position: 0,
            one_half_criterion: true,
            distance_one_criterion: false,
            n_evaluations: 0,
        });
    }

    let root_columns: Vec<Vec<u32>> = sentences.iter().map(|s| initial_column(s.len())).collect();
    let mut stack: Vec<SearchNode> = vec![SearchNode {
        hypothesis: Vec::new(),
        total_probability: probabilities.iter().sum(),
        estimate: node_estimate(&root_columns, &probabilities),
        overestimate: f64::INFINITY,
        is_final: sentences.iter().any(|s| s.is_empty()),
        explorable: true,
        columns: root_columns,
    }];

    let mut expansions = 0usize;
    let mut overestimates = 0usize;

    loop {
        // Overestimate newly reachable final nodes.
        for node in &mut stack {
            if node.is_final && node.overestimate.is_infinite() {
                node.overestimate = node_risk(&node.columns, &probabilities);
                overestimates += 1;
            }
        }
        let best_final = (0..stack.len())
            .filter(|&i| stack[i].is_final)
            .min_by(|&a, &b| {
                stack[a]
                    .overestimate
                    .partial_cmp(&stack[b].overestimate)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        // Termination: best overestimate beats every other estimate, or
        // nothing is left to expand.
        let expandable: Vec<usize> = (0..stack.len()).filter(|&i| stack[i].explorable).collect();
        if let Some(b) = best_final {
            let optimal = (0..stack.len())
                .filter(|&i| i != b)
                .all(|i| stack[b].overestimate <= stack[i].estimate);
            if optimal || expandable.is_empty() {
                break;
            }
        } else if expandable.is_empty() {
            break;
        }

        // Pick the most promising expandable node.
        let Some(&pick) = expandable.iter().min_by(|&&a, &&b| {
            let na = &stack[a];
            let nb = &stack[b];
            (na.estimate, -na.total_probability)
                .partial_cmp(&(nb.estimate, -nb.total_probability))
                .unwrap_or(std::cmp::Ordering::Equal)
        }) else {
            break;
        };
        expansions += 1;
        if expansions > options.max_expansions {
            break;
        }

        // Children: one per distinct continuation label; children that
        // share a label recombine into one node.
        let prefix = stack[pick].hypothesis.clone();
        stack[pick].explorable = false;
        let mut next_labels: Vec<Label> = sentences
            .iter()
            .filter(|s| s.len() > prefix.len() && s[..prefix.len()] == prefix[..])
            .map(|s| s[prefix.len()])
            .collect();
        next_labels.sort_unstable();
        next_labels.dedup();

        let new_len = prefix.len() + 1;
        for label in next_labels {
            let columns: Vec<Vec<u32>> = stack[pick]
                .columns
                .iter()
                .zip(&sentences)
                .map(|(c, s)| extend_column(c, label, s))
                .collect();
            let mut hypothesis = prefix.clone();
            hypothesis.push(label);
            let total_probability = sentences
                .iter()
                .zip(&probabilities)
                .filter(|(s, _)| s.len() >= new_len && s[..new_len] == hypothesis[..])
                .map(|(_, p)| *p)
                .sum();
            let is_final = sentences.iter().any(|s| s[..] == hypothesis[..]);
            stack.push(SearchNode {
                estimate: node_estimate(&columns, &probabilities),
                overestimate: f64::INFINITY,
                is_final,
                explorable: true,
                total_probability,
                columns,
                hypothesis,
            });
        }

        prune_stack(&mut stack, new_len, options.max_stack_size);
    }

    let best = (0..stack.len())
        .filter(|&i| stack[i].is_final && stack[i].overestimate.is_finite())
        .min_by(|&a, &b| {
            stack[a]
                .overestimate
                .partial_cmp(&stack[b].overestimate)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|i| &stack[i])?;
    debug!(
        expansions,
        overestimates,
        stack = stack.len(),
        "MBR A* search done"
    );
    let posterior = list
        .hypotheses
        .iter()
        .find(|h| h.labels == best.hypothesis)
        .map_or(f32::INFINITY, |h| h.posterior);
    let position = list
        .hypotheses
        .iter()
        .position(|h| h.labels == best.hypothesis)
        .unwrap_or(0);
    Some(MbrResult {
        hypothesis: best.hypothesis.clone(),
        posterior,
        risk: best.overestimate,
        position,
        one_half_criterion: false,
        distance_one_criterion: false,
        n_evaluations: expansions,
    })
}

/// Histogram-prune the entries of one hypothesis length down to
/// `max_stack_size`, keeping the best estimates. Final nodes survive.
fn prune_stack(stack: &mut Vec<SearchNode>, length: usize, max_stack_size: usize) {
    let of_length: Vec<usize> = (0..stack.len())
        .filter(|&i| stack[i].hypothesis.len() == length && stack[i].explorable)
        .collect();
    if of_length.len() <= max_stack_size {
        return;
    }
    let mut by_estimate = of_length;
    by_estimate.sort_by(|&a, &b| {
        stack[a]
            .estimate
            .partial_cmp(&stack[b].estimate)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut drop: Vec<usize> = by_estimate.split_off(max_stack_size);
    drop.retain(|&i| !stack[i].is_final);
    drop.sort_unstable_by(|a, b| b.cmp(a));
    for i in drop {
        stack.remove(i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_lattice::NBestHypothesis;

    fn list(entries: &[(&[Label], f64)]) -> NBestList {
        NBestList {
            hypotheses: entries
                .iter()
                .map(|(labels, p)| NBestHypothesis {
                    labels: labels.to_vec(),
                    score: -(p.ln()) as f32,
                    posterior: -(p.ln()) as f32,
                })
                .collect(),
        }
    }

    #[test]
    fn one_half_returns_map() {
        let l = list(&[(&[1, 2], 0.6), (&[1, 3], 0.4)]);
        let r = search(&l, AStarMbrOptions::default()).unwrap();
        assert!(r.one_half_criterion);
        assert_eq!(r.hypothesis, vec![1, 2]);
    }

    #[test]
    fn agrees_with_nbest_engine() {
        let l = list(&[
            (&[9, 9, 9, 9], 0.30),
            (&[5, 6], 0.25),
            (&[5, 6, 7], 0.25),
            (&[5, 7], 0.20),
        ]);
        let a = search(&l, AStarMbrOptions::default()).unwrap();
        let n = crate::nbest::search(&l, crate::nbest::NBestMbrOptions::default()).unwrap();
        assert_eq!(a.hypothesis, n.hypothesis);
        assert!((a.risk - n.risk).abs() < 1e-9);
    }

    #[test]
    fn termination_invariant_holds() {
        let l = list(&[(&[1], 0.4), (&[2], 0.35), (&[1, 2], 0.25)]);
        let r = search(&l, AStarMbrOptions::default()).unwrap();
        // The returned risk is the exact expected loss of the winner.
        let manual: f64 = l
            .hypotheses
            .iter()
            .map(|h| {
                (-f64::from(h.posterior)).exp()
                    * f64::from(crate::levenshtein::distance(&r.hypothesis, &h.labels))
            })
            .sum();
        assert!((r.risk - manual).abs() < 1e-9);
    }

    #[test]
    fn stack_pruning_keeps_search_sound_on_peaked_lists() {
        let l = list(&[
            (&[1, 2, 3], 0.45),
            (&[1, 2], 0.25),
            (&[1, 3, 3], 0.15),
            (&[2, 2, 3], 0.15),
        ]);
        let tight = search(
            &l,
            AStarMbrOptions {
                max_stack_size: 1,
                ..AStarMbrOptions::default()
            },
        )
        .unwrap();
        assert_eq!(tight.hypothesis, vec![1, 2, 3]);
    }
}
