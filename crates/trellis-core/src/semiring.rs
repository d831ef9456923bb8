// crates/trellis-core/src/semiring.rs

//! Tropical and log semiring operations, and the lattice pair weight.
//!
//! Search runs in the tropical semiring (min, +) on `f32`. Posterior
//! computation uses the log semiring, where "addition" is
//! `log_add(x, y) = -ln(e^-x + e^-y)` on negated log probabilities.
//! Lattice arcs carry a pair (am, lm) of tropical weights with the
//! lexicographic ordering on (am + lm, lm); `+` extends componentwise,
//! [`PairWeight::plus`] collects by picking the better weight.

use core::ops::{Add, AddAssign};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::types::Score;

/// Tropical semiring zero (the annihilator of min).
pub const TROPICAL_ZERO: Score = Score::INFINITY;

/// Tropical semiring one (the neutral element of +).
pub const TROPICAL_ONE: Score = 0.0;

/// Collect two negated log probabilities: `-ln(e^-x + e^-y)`.
///
/// Stable for large magnitudes via the max trick; absorbing for
/// infinite inputs.
#[inline]
#[must_use]
pub fn log_add(x: f64, y: f64) -> f64 {
    if x == f64::INFINITY {
        return y;
    }
    if y == f64::INFINITY {
        return x;
    }
    let (lo, hi) = if x < y { (x, y) } else { (y, x) };
    lo - (-(hi - lo)).exp().ln_1p()
}

/// Lattice arc weight: acoustic and language-model tropical components.
///
/// `+` is the semiring extend (componentwise addition);
/// [`PairWeight::plus`] selects the better of two weights under
/// [`PairWeight::compare`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairWeight {
    pub am: Score,
    pub lm: Score,
}

impl PairWeight {
    #[inline]
    #[must_use]
    pub const fn new(am: Score, lm: Score) -> Self {
        Self { am, lm }
    }

    /// Semiring zero: worse than every weight.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(TROPICAL_ZERO, TROPICAL_ZERO)
    }

    /// Semiring one: the neutral element of `+`.
    #[must_use]
    pub const fn one() -> Self {
        Self::new(TROPICAL_ONE, TROPICAL_ONE)
    }

    /// Combined tropical cost am + lm.
    #[inline]
    #[must_use]
    pub fn combined(&self) -> Score {
        self.am + self.lm
    }

    /// Lexicographic ordering on (am + lm, lm). `Less` means better.
    #[inline]
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match self
            .combined()
            .partial_cmp(&other.combined())
            .unwrap_or(Ordering::Equal)
        {
            Ordering::Equal => self
                .lm
                .partial_cmp(&other.lm)
                .unwrap_or(Ordering::Equal),
            ord => ord,
        }
    }

    /// Tropical collect: the better of the two weights.
    #[inline]
    #[must_use]
    pub fn plus(&self, other: &Self) -> Self {
        if self.compare(other) == Ordering::Greater {
            *other
        } else {
            *self
        }
    }
}

impl Default for PairWeight {
    fn default() -> Self {
        Self::one()
    }
}

impl Add for PairWeight {
    type Output = Self;

    /// Extend: componentwise addition.
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.am + rhs.am, self.lm + rhs.lm)
    }
}

impl AddAssign for PairWeight {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_add_matches_linear_sum() {
        let x = -(0.1f64.ln());
        let y = -(0.2f64.ln());
        let z = log_add(x, y);
        assert!((z - -(0.3f64.ln())).abs() < 1e-12);
    }

    #[test]
    fn log_add_absorbs_zero() {
        let x = 4.2f64;
        assert_eq!(log_add(x, f64::INFINITY), x);
        assert_eq!(log_add(f64::INFINITY, x), x);
    }

    #[test]
    fn pair_weight_orders_by_sum_then_lm() {
        let a = PairWeight::new(1.0, 2.0);
        let b = PairWeight::new(2.0, 1.0);
        // Same sum, a has larger lm -> b is better.
        assert_eq!(a.compare(&b), Ordering::Greater);
        assert_eq!(a.plus(&b), b);
        let c = PairWeight::new(0.5, 2.0);
        assert_eq!(c.compare(&a), Ordering::Less);
    }

    #[test]
    fn add_extends_components() {
        let a = PairWeight::new(1.0, 2.0);
        let b = PairWeight::new(0.25, 0.5);
        assert_eq!(a + b, PairWeight::new(1.25, 2.5));
        assert_eq!(a + PairWeight::one(), a);
        let mut c = a;
        c += b;
        assert_eq!(c, a + b);
    }
}
