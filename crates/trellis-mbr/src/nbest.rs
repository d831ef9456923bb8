// crates/trellis-mbr/src/nbest.rs

//! N-best-list MBR engine.
//!
//! Selects the hypothesis minimizing the expected Levenshtein loss
//! under the list posteriors. Two fast rejects apply in order: the
//! one-half criterion and the distance-one criterion; both imply the
//! MAP hypothesis is already the minimizer. Otherwise every hypothesis
//! is evaluated with a short-circuited risk sum.

use tracing::debug;

use trellis_core::types::Label;
use trellis_lattice::NBestList;

use crate::levenshtein::distance;

/// Space caps of the engine.
#[derive(Clone, Copy, Debug)]
pub struct NBestMbrOptions {
    /// Hypotheses included in the risk summation.
    pub summation_space: usize,
    /// Hypotheses evaluated as MBR candidates.
    pub evaluation_space: usize,
}

impl Default for NBestMbrOptions {
    fn default() -> Self {
        Self {
            summation_space: usize::MAX,
            evaluation_space: usize::MAX,
        }
    }
}

/// Outcome of an MBR search.
#[derive(Clone, Debug, PartialEq)]
pub struct MbrResult {
    pub hypothesis: Vec<Label>,
    /// Negated log posterior of the selected hypothesis.
    pub posterior: f32,
    /// Expected Levenshtein loss of the selected hypothesis.
    pub risk: f64,
    /// Position in the evaluation space (0 = MAP).
    pub position: usize,
    pub one_half_criterion: bool,
    pub distance_one_criterion: bool,
    /// Number of candidate evaluations beyond the MAP row.
    pub n_evaluations: usize,
}

/// Risk of `candidate` with early abort once `bound` is exceeded.
/// Returns `None` when aborted.
fn posterior_risk(
    candidate: &[Label],
    hypotheses: &[(Vec<Label>, f64)],
    bound: f64,
) -> Option<f64> {
    let mut risk = 0.0f64;
    for (sentence, p) in hypotheses {
        let lev = distance(candidate, sentence);
        risk += p * f64::from(lev);
        if risk > bound {
            return None;
        }
    }
    Some(risk)
}

/// Run the N-best engine over a normalized list.
#[must_use]
pub fn search(list: &NBestList, options: NBestMbrOptions) -> Option<MbrResult> {
    let first = list.hypotheses.first()?;
    let evaluation_space = options.evaluation_space.min(list.hypotheses.len());
    let summation_space = options.summation_space.min(list.hypotheses.len());

    let summation: Vec<(Vec<Label>, f64)> = list.hypotheses[..summation_space]
        .iter()
        .map(|h| (h.labels.clone(), (-f64::from(h.posterior)).exp()))
        .collect();

    let map_sentence = first.labels.clone();
    let map_posterior = (-f64::from(first.posterior)).exp();

    // Risk of the MAP hypothesis, collecting the distance-one mass.
    let mut map_risk = 0.0f64;
    let mut distance_one_mass = 0.0f64;
    let mut max_distance_one = 0.0f64;
    for (sentence, p) in &summation {
        let lev = distance(&map_sentence, sentence);
        map_risk += p * f64::from(lev);
        if lev == 1 {
            distance_one_mass += p;
            max_distance_one = max_distance_one.max(*p);
        }
    }

    let one_half = map_posterior >= 0.5;
    // Sum_{lev=1} p + 2 p_map >= 1 + max_{lev=1} p
    let distance_one = distance_one_mass + 2.0 * map_posterior >= 1.0 + max_distance_one;

    let mut result = MbrResult {
        hypothesis: map_sentence,
        posterior: first.posterior,
        risk: map_risk,
        position: 0,
        one_half_criterion: one_half,
        distance_one_criterion: distance_one,
        n_evaluations: 0,
    };

    if one_half || distance_one {
        // The MAP hypothesis is guaranteed to minimize the Bayes risk.
        debug!(one_half, distance_one, "MBR fast criterion fired");
        return Some(result);
    }

    // The MAP row is done; evaluate the remaining candidates.
    for (n, h) in list
        .hypotheses
        .iter()
        .enumerate()
        .take(evaluation_space)
        .skip(1)
    {
        result.n_evaluations += 1;
        if let Some(risk) = posterior_risk(&h.labels, &summation, result.risk) {
            if risk < result.risk {
                result.hypothesis = h.labels.clone();
                result.posterior = h.posterior;
                result.risk = risk;
                result.position = n;
            }
        }
    }
    debug!(
        position = result.position,
        risk = result.risk,
        "MBR n-best search done"
    );
    Some(result)
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
    fn one_half_criterion_short_circuits() {
        let l = list(&[
            (&[1, 2], 0.55),
            (&[1, 3], 0.20),
            (&[1], 0.15),
            (&[2, 2], 0.10),
        ]);
        let r = search(&l, NBestMbrOptions::default()).unwrap();
        assert!(r.one_half_criterion);
        assert_eq!(r.hypothesis, vec![1, 2]);
        assert_eq!(r.position, 0);
        assert_eq!(r.n_evaluations, 0, "no rows beyond the MAP");
    }

    #[test]
    fn mbr_can_differ_from_map() {
        // The MAP is an outlier; the cluster around [5, 6] wins.
        let l = list(&[
            (&[9, 9, 9, 9], 0.30),
            (&[5, 6], 0.25),
            (&[5, 6, 7], 0.25),
            (&[5, 7], 0.20),
        ]);
        let r = search(&l, NBestMbrOptions::default()).unwrap();
        assert!(!r.one_half_criterion);
        assert_ne!(r.position, 0);
        assert_eq!(r.hypothesis, vec![5, 6]);
        assert!(r.n_evaluations > 0);
    }

    #[test]
    fn summation_space_caps_the_sum() {
        let l = list(&[(&[1], 0.4), (&[2], 0.35), (&[3], 0.25)]);
        let capped = search(
            &l,
            NBestMbrOptions {
                summation_space: 2,
                evaluation_space: usize::MAX,
            },
        )
        .unwrap();
        // Only the first two hypotheses contribute risk mass.
        assert!((capped.risk - 0.35).abs() < 1e-9);
    }

    #[test]
    fn empty_list_yields_none() {
        let l = NBestList::default();
        assert!(search(&l, NBestMbrOptions::default()).is_none());
    }
}
