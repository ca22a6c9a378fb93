//! Property tests for backlog accounting

use dispatch_core::{Backlog, InFlight};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Op {
    Start,
    Finish,
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(prop_oneof![Just(Op::Start), Just(Op::Finish)], 0..64)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// The count tracks a reference model and never goes negative; unmatched
    /// finishes are skipped the way a correct caller would.
    #[test]
    fn backlog_matches_model(ops in arb_ops()) {
        let backlog = Backlog::new();
        let mut model = 0usize;

        for op in ops {
            match op {
                Op::Start => {
                    backlog.started();
                    model += 1;
                }
                Op::Finish if model > 0 => {
                    backlog.done();
                    model -= 1;
                }
                Op::Finish => {}
            }
            prop_assert_eq!(backlog.in_flight(), model);
            prop_assert_eq!(backlog.is_idle(), model == 0);
        }

        // Idle exactly when the model says so.
        let idle = backlog.wait_idle_timeout(Duration::from_millis(1)).unwrap();
        prop_assert_eq!(idle, model == 0);
    }

    /// Guards released from many threads always bring the count back to zero
    /// and release a blocked waiter.
    #[test]
    fn guards_released_concurrently_drain(count in 1usize..24) {
        let backlog = Arc::new(Backlog::new());
        let guards: Vec<InFlight> = (0..count).map(|_| backlog.track()).collect();
        prop_assert_eq!(backlog.in_flight(), count);

        let waiter = {
            let backlog = backlog.clone();
            thread::spawn(move || backlog.wait_idle())
        };
        let releasers: Vec<_> = guards
            .into_iter()
            .map(|guard| thread::spawn(move || drop(guard)))
            .collect();
        for releaser in releasers {
            releaser.join().unwrap();
        }

        prop_assert!(waiter.join().unwrap().is_ok());
        prop_assert_eq!(backlog.in_flight(), 0);
    }
}

#[test]
#[should_panic(expected = "Protocol violation")]
fn test_unbalanced_done_fails_loudly() {
    let backlog = Backlog::new();
    backlog.started();
    backlog.done();
    backlog.done();
}
