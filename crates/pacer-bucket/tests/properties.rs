//! Invariants over arbitrary consume sequences, driven by a manual clock.

use pacer_bucket::{Clock, ManualClock, TokenBucket};
use proptest::prelude::*;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Op {
    Advance(u64),
    NonBlocking,
    Blocking,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..5_000).prop_map(Op::Advance),
        Just(Op::NonBlocking),
        Just(Op::Blocking),
    ]
}

proptest! {
    #[test]
    fn test_tokens_and_deadline_invariants(
        capacity in 1u64..20,
        interval_ms in 1u64..2_000,
        ops in prop::collection::vec(op(), 1..200),
    ) {
        let interval = Duration::from_millis(interval_ms);
        let clock = ManualClock::new();
        let bucket = TokenBucket::with_clock(interval, capacity, clock.clone()).unwrap();

        let mut first_deadline = None;
        let mut last_deadline = None;

        for op in ops {
            match op {
                Op::Advance(ms) => clock.advance(Duration::from_millis(ms)),
                Op::NonBlocking => {
                    let wait = bucket.consume_without_block();
                    prop_assert!(wait <= interval);
                }
                Op::Blocking => {
                    bucket.consume_with_block();
                }
            }

            let snapshot = bucket.snapshot();
            prop_assert!(snapshot.available_tokens <= capacity);

            if let Some(deadline) = snapshot.next_refill_deadline {
                let first = *first_deadline.get_or_insert(deadline);
                prop_assert_eq!((deadline - first).as_nanos() % interval.as_nanos(), 0);
                if let Some(last) = last_deadline {
                    prop_assert!(deadline >= last);
                }
                last_deadline = Some(deadline);
            }
        }
    }

    #[test]
    fn test_steady_state_takes_whole_intervals(
        capacity in 1u64..10,
        bursts in 1u32..20,
        interval_ms in 1u64..1_000,
    ) {
        let interval = Duration::from_millis(interval_ms);
        let clock = ManualClock::new();
        let bucket = TokenBucket::with_clock(interval, capacity, clock.clone()).unwrap();
        let start = clock.now();

        let mut last = start;
        for _ in 0..(bursts as u64 * capacity) {
            last = bucket.consume_with_block();
        }

        prop_assert_eq!(last - start, interval * (bursts - 1));
        prop_assert_eq!(bucket.available_tokens(), 0);
    }
}
