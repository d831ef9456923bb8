// crates/trellis-mbr/src/levenshtein.rs

//! Levenshtein distance over label sequences, plus the incremental
//! column update used by the A* engine.

use trellis_core::types::Label;

/// Edit distance between two label sequences.
#[must_use]
pub fn distance(a: &[Label], b: &[Label]) -> u32 {
    let mut column = initial_column(b.len());
    for &x in a {
        column = extend_column(&column, x, b);
    }
    *column.last().unwrap_or(&0)
}

/// DP column of the empty prefix against `other_len` symbols.
#[must_use]
pub fn initial_column(other_len: usize) -> Vec<u32> {
    (0..=other_len as u32).collect()
}

/// Column after extending the prefix by `symbol`, against `other`.
///
/// `column[j]` is the distance between the prefix and `other[..j]`.
#[must_use]
pub fn extend_column(column: &[u32], symbol: Label, other: &[Label]) -> Vec<u32> {
    let mut next = Vec::with_capacity(column.len());
    next.push(column[0] + 1);
    for (j, &o) in other.iter().enumerate() {
        let substitution = column[j] + u32::from(o != symbol);
        let deletion = column[j + 1] + 1;
        let insertion = next[j] + 1;
        next.push(substitution.min(deletion).min(insertion));
    }
    next
}

/// Lower bound on the distance of any continuation of the prefix:
/// no future symbol can push the distance below the column minimum.
#[must_use]
pub fn column_lower_bound(column: &[u32]) -> u32 {
    column.iter().copied().min().unwrap_or(0)
}

/// Distance if the prefix stopped here (the full-string entry).
#[must_use]
pub fn column_distance(column: &[u32]) -> u32 {
    *column.last().unwrap_or(&0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn classic_cases() {
        assert_eq!(distance(&[], &[]), 0);
        assert_eq!(distance(&[1, 2, 3], &[1, 2, 3]), 0);
        assert_eq!(distance(&[1, 2, 3], &[1, 3]), 1);
        assert_eq!(distance(&[1, 2], &[2, 1]), 2);
        assert_eq!(distance(&[], &[5, 6]), 2);
    }

    #[test]
    fn incremental_columns_match_batch() {
        let a = [1u32, 4, 2, 2];
        let b = [1u32, 2, 3];
        let mut column = initial_column(b.len());
        for &x in &a {
            column = extend_column(&column, x, &b);
        }
        assert_eq!(column_distance(&column), distance(&a, &b));
    }

    proptest! {
        #[test]
        fn symmetric(a in prop::collection::vec(0u32..4, 0..8),
                     b in prop::collection::vec(0u32..4, 0..8)) {
            prop_assert_eq!(distance(&a, &b), distance(&b, &a));
        }

        #[test]
        fn triangle_inequality(a in prop::collection::vec(0u32..3, 0..6),
                               b in prop::collection::vec(0u32..3, 0..6),
                               c in prop::collection::vec(0u32..3, 0..6)) {
            prop_assert!(distance(&a, &c) <= distance(&a, &b) + distance(&b, &c));
        }

        #[test]
        fn lower_bound_is_admissible(a in prop::collection::vec(0u32..3, 0..6),
                                     suffix in prop::collection::vec(0u32..3, 0..4),
                                     b in prop::collection::vec(0u32..3, 0..6)) {
            let mut column = initial_column(b.len());
            for &x in &a {
                column = extend_column(&column, x, &b);
            }
            let bound = column_lower_bound(&column);
            let mut full = a.clone();
            full.extend_from_slice(&suffix);
            prop_assert!(bound <= distance(&full, &b));
        }
    }
}
