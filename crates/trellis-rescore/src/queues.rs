// crates/trellis-rescore/src/queues.rs

//! The two hypothesis priority queues.
//!
//! The comparator alternates between `seq_score` (expansion and
//! worst-first pruning) and `seq_prospect_score` (recombination), so
//! each ordering gets its own concrete queue instead of a virtual
//! comparator. Both are max-heaps: the top is the worst hypothesis.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::Hypothesis;

macro_rules! score_queue {
    ($queue:ident, $wrapper:ident, $field:ident) => {
        struct $wrapper(Hypothesis);

        impl PartialEq for $wrapper {
            fn eq(&self, other: &Self) -> bool {
                self.0.$field == other.0.$field
            }
        }
        impl Eq for $wrapper {}
        impl PartialOrd for $wrapper {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }
        impl Ord for $wrapper {
            fn cmp(&self, other: &Self) -> Ordering {
                self.0
                    .$field
                    .partial_cmp(&other.0.$field)
                    .unwrap_or(Ordering::Equal)
            }
        }

        pub(crate) struct $queue(BinaryHeap<$wrapper>);

        impl $queue {
            pub fn new() -> Self {
                Self(BinaryHeap::new())
            }

            pub fn push(&mut self, hyp: Hypothesis) {
                self.0.push($wrapper(hyp));
            }

            pub fn pop(&mut self) -> Option<Hypothesis> {
                self.0.pop().map(|w| w.0)
            }

            pub fn peek(&self) -> Option<&Hypothesis> {
                self.0.peek().map(|w| &w.0)
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }
        }
    };
}

score_queue!(SeqScoreQueue, BySeqScore, seq_score);
score_queue!(ProspectQueue, ByProspect, seq_prospect_score);

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::lm::History;
    use trellis_core::types::EPSILON;

    fn hyp(seq: f32, prospect: f32) -> Hypothesis {
        Hypothesis {
            history: History::empty(),
            seq_score: seq,
            seq_prospect_score: prospect,
            score: 0.0,
            index: 0,
            prev_hyp: 0,
            start_state: 0,
            arc: 0,
            label: EPSILON,
            rescored: true,
        }
    }

    #[test]
    fn seq_queue_pops_worst_first() {
        let mut q = SeqScoreQueue::new();
        q.push(hyp(1.0, 9.0));
        q.push(hyp(3.0, 0.0));
        q.push(hyp(2.0, 5.0));
        assert_eq!(q.pop().map(|h| h.seq_score), Some(3.0));
        assert_eq!(q.pop().map(|h| h.seq_score), Some(2.0));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn prospect_queue_orders_by_prospect() {
        let mut q = ProspectQueue::new();
        q.push(hyp(0.0, 1.0));
        q.push(hyp(0.0, 7.0));
        assert_eq!(q.peek().map(|h| h.seq_prospect_score), Some(7.0));
    }
}
