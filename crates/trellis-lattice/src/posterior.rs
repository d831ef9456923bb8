// crates/trellis-lattice/src/posterior.rs

//! Log-semiring forward/backward and arc posteriors.

use trellis_core::semiring::log_add;
use trellis_core::types::{Score, StateId};

use crate::lattice::Lattice;

/// Forward log-semiring scores (negated log path mass from the initial
/// state), with all combined weights scaled by `scale`.
#[must_use]
pub fn log_forward(l: &Lattice, order: &[StateId], scale: f32) -> Vec<f64> {
    let mut fwd = vec![f64::INFINITY; l.num_states() as usize];
    if l.is_empty() {
        return fwd;
    }
    fwd[l.initial() as usize] = 0.0;
    for &s in order {
        let base = fwd[s as usize];
        if base == f64::INFINITY {
            continue;
        }
        for a in &l.state(s).arcs {
            let t = a.target as usize;
            fwd[t] = log_add(fwd[t], base + f64::from(a.weight.combined() * scale));
        }
    }
    fwd
}

/// Backward log-semiring scores towards the finals.
#[must_use]
pub fn log_backward(l: &Lattice, order: &[StateId], scale: f32) -> Vec<f64> {
    let mut bwd = vec![f64::INFINITY; l.num_states() as usize];
    for &s in order.iter().rev() {
        let state = l.state(s);
        if let Some(f) = state.final_weight {
            bwd[s as usize] = f64::from(f.combined() * scale);
        }
        for a in &state.arcs {
            let v = f64::from(a.weight.combined() * scale) + bwd[a.target as usize];
            bwd[s as usize] = log_add(bwd[s as usize], v);
        }
    }
    bwd
}

/// Negated log posterior of every arc, indexed `[state][arc]`, plus the
/// total negated log mass of the lattice.
#[must_use]
pub fn arc_posteriors(l: &Lattice, scale: f32) -> (Vec<Vec<Score>>, f64) {
    let order = l.chronological_order();
    let fwd = log_forward(l, &order, scale);
    let bwd = log_backward(l, &order, scale);
    let total = if l.is_empty() {
        f64::INFINITY
    } else {
        bwd[l.initial() as usize]
    };
    let posteriors = l
        .states()
        .iter()
        .enumerate()
        .map(|(s, state)| {
            state
                .arcs
                .iter()
                .map(|a| {
                    (fwd[s] + f64::from(a.weight.combined() * scale) + bwd[a.target as usize]
                        - total) as Score
                })
                .collect()
        })
        .collect();
    (posteriors, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{Lattice, LatticeArc};
    use trellis_core::semiring::PairWeight;

    fn two_path() -> Lattice {
        let mut l = Lattice::new();
        let s0 = l.add_state();
        let s1 = l.add_state();
        l.set_initial(s0);
        l.set_final(s1, PairWeight::one());
        l.set_word_boundary(s1, 1);
        // Costs -ln 0.6 and -ln 0.4: posteriors must come out as 0.6/0.4.
        l.add_arc(s0, LatticeArc { input: 1, output: 1, weight: PairWeight::new(-(0.6f32.ln()), 0.0), target: s1 });
        l.add_arc(s0, LatticeArc { input: 2, output: 2, weight: PairWeight::new(-(0.4f32.ln()), 0.0), target: s1 });
        l
    }

    #[test]
    fn posteriors_normalize() {
        let l = two_path();
        let (post, total) = arc_posteriors(&l, 1.0);
        assert!(total.abs() < 1e-6, "mass must sum to one, got {total}");
        assert!(((-f64::from(post[0][0])).exp() - 0.6).abs() < 1e-5);
        assert!(((-f64::from(post[0][1])).exp() - 0.4).abs() < 1e-5);
    }
}
