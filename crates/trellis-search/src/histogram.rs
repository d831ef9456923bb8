// crates/trellis-search/src/histogram.rs

//! Bounded histogram for quantile (rank-relative) pruning.

use trellis_core::types::Score;

const NUM_BINS: usize = 101;

/// Counting histogram over a fixed score interval.
#[derive(Clone, Debug)]
pub struct Histogram {
    bins: [u32; NUM_BINS],
    lo: Score,
    hi: Score,
    scale: Score,
    total: u32,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bins: [0; NUM_BINS],
            lo: 0.0,
            hi: 1.0,
            scale: 1.0,
            total: 0,
        }
    }

    /// Reset counts.
    pub fn clear(&mut self) {
        self.bins = [0; NUM_BINS];
        self.total = 0;
    }

    /// Set the score interval covered by the bins.
    pub fn set_limits(&mut self, lo: Score, hi: Score) {
        self.lo = lo;
        self.hi = if hi > lo { hi } else { lo + 1.0 };
        self.scale = (NUM_BINS as Score) / (self.hi - self.lo);
    }

    /// Count one score; out-of-range scores clamp to the border bins.
    pub fn add(&mut self, score: Score) {
        let bin = ((score - self.lo) * self.scale) as isize;
        let bin = bin.clamp(0, (NUM_BINS - 1) as isize) as usize;
        self.bins[bin] += 1;
        self.total += 1;
    }

    /// Number of counted scores.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Score threshold such that at most `n` counted scores lie strictly
    /// below it (up to bin resolution; ties at the threshold survive).
    #[must_use]
    pub fn quantile(&self, n: u32) -> Score {
        let mut cumulative = 0;
        for (i, &count) in self.bins.iter().enumerate() {
            cumulative += count;
            if cumulative >= n {
                return self.lo + ((i + 1) as Score) / self.scale;
            }
        }
        self.hi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_bounds_survivors() {
        let mut h = Histogram::new();
        h.set_limits(0.0, 100.0);
        for i in 0..100 {
            h.add(i as Score);
        }
        let t = h.quantile(10);
        let surviving = (0..100).filter(|&i| (i as Score) < t).count();
        assert!(surviving >= 10, "at least n survive: {surviving}");
        assert!(surviving <= 12, "close to n: {surviving}");
    }

    #[test]
    fn quantile_with_few_entries_returns_hi() {
        let mut h = Histogram::new();
        h.set_limits(0.0, 10.0);
        h.add(1.0);
        h.add(2.0);
        assert_eq!(h.quantile(5), 10.0);
    }

    #[test]
    fn out_of_range_clamps() {
        let mut h = Histogram::new();
        h.set_limits(0.0, 1.0);
        h.add(-5.0);
        h.add(7.0);
        assert_eq!(h.total(), 2);
    }
}
