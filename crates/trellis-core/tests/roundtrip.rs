// crates/trellis-core/tests/roundtrip.rs

//! Property tests for the serialization round trips and semiring laws.

use proptest::prelude::*;

use trellis_core::semiring::{log_add, PairWeight};
use trellis_core::state_sequence::{HmmState, StateSequenceList};

fn arb_sequence() -> impl Strategy<Value = (Vec<HmmState>, bool, bool)> {
    (
        prop::collection::vec((0u32..500, 0u32..8), 1..6),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(states, initial, is_final)| {
            (
                states
                    .into_iter()
                    .map(|(emission, transition)| HmmState { emission, transition })
                    .collect(),
                initial,
                is_final,
            )
        })
}

proptest! {
    #[test]
    fn state_sequence_store_roundtrip_is_bitwise(
        sequences in prop::collection::vec(arb_sequence(), 0..12),
        dis_offset in 0u32..1000,
        dis_count in 0u32..8,
    ) {
        let mut list = StateSequenceList::new();
        for (states, initial, is_final) in &sequences {
            list.push(states, *initial, *is_final);
        }
        list.set_disambiguator_range(dis_offset, dis_count);

        let mut bytes = Vec::new();
        list.write(&mut bytes).unwrap();
        let back = StateSequenceList::read(&mut bytes.as_slice()).unwrap();
        prop_assert_eq!(&back, &list);

        let mut bytes2 = Vec::new();
        back.write(&mut bytes2).unwrap();
        prop_assert_eq!(bytes, bytes2);
    }

    #[test]
    fn log_add_is_commutative_and_bounded(x in 0.0f64..50.0, y in 0.0f64..50.0) {
        let a = log_add(x, y);
        let b = log_add(y, x);
        prop_assert!((a - b).abs() < 1e-12);
        // Collecting mass can only lower the negated log.
        prop_assert!(a <= x.min(y) + 1e-12);
        prop_assert!(a >= x.min(y) - (2.0f64).ln() - 1e-12);
    }

    #[test]
    fn pair_weight_plus_is_selective(
        am1 in 0.0f32..10.0, lm1 in 0.0f32..10.0,
        am2 in 0.0f32..10.0, lm2 in 0.0f32..10.0,
    ) {
        let a = PairWeight::new(am1, lm1);
        let b = PairWeight::new(am2, lm2);
        let sum = a.plus(&b);
        prop_assert!(sum == a || sum == b);
        prop_assert!(sum.combined() <= a.combined() && sum.combined() <= b.combined());
    }

    #[test]
    fn pair_weight_extend_is_associative(
        w in prop::collection::vec((0.0f32..4.0, 0.0f32..4.0), 3..4),
    ) {
        let [a, b, c] = [
            PairWeight::new(w[0].0, w[0].1),
            PairWeight::new(w[1].0, w[1].1),
            PairWeight::new(w[2].0, w[2].1),
        ];
        let left = (a + b) + c;
        let right = a + (b + c);
        prop_assert!((left.am - right.am).abs() < 1e-4);
        prop_assert!((left.lm - right.lm).abs() < 1e-4);
    }
}
