//! Unit tests for credit arithmetic and the replenisher task.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use proptest::prelude::*;
use rstest::{fixture, rstest};
use tracing_test::traced_test;

use super::{CreditReplenisher, calculated_top_up, is_below_threshold};
use crate::{
    config::CreditPolicy,
    error::ErrorCondition,
    executor::{HandlerExecutor, HandlerLoop},
    link::{DeliveryId, Link},
    settlement::SettlementTracker,
};

/// Link stub recording flow grants.
#[derive(Default)]
struct FlowLink {
    credit: Mutex<u32>,
    grants: Mutex<Vec<u32>>,
}

impl FlowLink {
    fn with_credit(credit: u32) -> Arc<Self> {
        Arc::new(Self {
            credit: Mutex::new(credit),
            grants: Mutex::default(),
        })
    }

    fn grants(&self) -> Vec<u32> { self.grants.lock().expect("grants lock").clone() }
}

impl Link for FlowLink {
    fn name(&self) -> &str { "flow-link" }

    fn credit(&self) -> u32 { *self.credit.lock().expect("credit lock") }

    fn flow(&self, credits: u32) {
        *self.credit.lock().expect("credit lock") += credits;
        self.grants.lock().expect("grants lock").push(credits);
    }

    fn drain_requested(&self) -> bool { false }

    fn current(&self) -> Option<DeliveryId> { None }

    fn advance(&self) -> bool { false }

    fn recv(&self) -> Bytes { Bytes::new() }

    fn available(&self) -> usize { 0 }

    fn set_condition(&self, _condition: ErrorCondition) {}
}

struct Fixture {
    executor: HandlerExecutor,
    handler: HandlerLoop,
    tracker: SettlementTracker,
}

#[fixture]
fn setup() -> Fixture {
    let (executor, handler) = HandlerExecutor::pair();
    let tracker = SettlementTracker::new(executor.clone());
    Fixture {
        executor,
        handler,
        tracker,
    }
}

fn with_pending(fixture: &Fixture, pending: u32) {
    fixture.executor.enter(|| {
        for _ in 0..pending {
            fixture.tracker.increment();
        }
    });
}

#[rstest]
#[case(10, 5, 20, true)]
#[case(96, 5, 20, false)]
#[case(15, 5, 20, true)]
#[case(16, 5, 20, false)]
#[case(0, 30, 20, false)]
#[case(0, 0, 0, true)]
fn threshold_accounts_for_pending(
    #[case] credit: u32,
    #[case] pending: u32,
    #[case] threshold: u32,
    #[case] expected: bool,
) {
    assert_eq!(is_below_threshold(credit, pending, threshold), expected);
}

proptest! {
    #[test]
    fn threshold_matches_signed_inequality(credit in any::<u32>(), pending in any::<u32>(), threshold in any::<u32>()) {
        let expected = i128::from(credit) <= i128::from(threshold) - i128::from(pending);
        prop_assert_eq!(is_below_threshold(credit, pending, threshold), expected);
    }

    #[test]
    fn top_up_is_refill_minus_credit_minus_pending(refill in any::<u32>(), credit in any::<u32>(), pending in any::<u32>()) {
        let expected = i128::from(refill) - i128::from(credit) - i128::from(pending);
        prop_assert_eq!(i128::from(calculated_top_up(refill, credit, pending)), expected);
    }

    #[test]
    fn grant_equals_positive_top_up(refill in 0_u32..2000, threshold in 0_u32..2000, credit in 0_u32..2000, pending in 0_u32..50) {
        let Fixture { executor, tracker, .. } = setup();
        executor.enter(|| (0..pending).for_each(|_| tracker.increment()));
        let link = FlowLink::with_credit(credit);
        let replenisher = CreditReplenisher::bound(
            CreditPolicy::new(refill, threshold),
            link.clone(),
            executor.clone(),
            tracker,
        );
        executor.enter(|| replenisher.run());

        let top_up = calculated_top_up(refill, credit, pending);
        let expected: Vec<u32> = if is_below_threshold(credit, pending, threshold) && top_up > 0 {
            vec![u32::try_from(top_up).expect("top up fits")]
        } else {
            Vec::new()
        };
        prop_assert_eq!(link.grants(), expected);
    }
}

#[rstest]
fn tops_up_net_of_pending_settlements(setup: Fixture) {
    with_pending(&setup, 5);
    let link = FlowLink::with_credit(10);
    let replenisher = CreditReplenisher::bound(
        CreditPolicy::new(100, 20),
        link.clone(),
        setup.executor.clone(),
        setup.tracker.clone(),
    );

    setup.executor.enter(|| replenisher.run());

    assert_eq!(link.grants(), vec![85]);
    assert_eq!(setup.executor.flush_count(), 1);
}

#[rstest]
fn no_grant_above_threshold(setup: Fixture) {
    with_pending(&setup, 5);
    let link = FlowLink::with_credit(96);
    let replenisher = CreditReplenisher::bound(
        CreditPolicy::new(100, 20),
        link.clone(),
        setup.executor.clone(),
        setup.tracker.clone(),
    );

    setup.executor.enter(|| replenisher.run());

    assert!(link.grants().is_empty());
    assert_eq!(setup.executor.flush_count(), 0);
}

#[rstest]
fn never_sends_negative_or_zero_grants(setup: Fixture) {
    with_pending(&setup, 5);
    // Below threshold (8 <= 20 - 5), but refill - credit - pending = -3.
    let link = FlowLink::with_credit(8);
    let replenisher = CreditReplenisher::bound(
        CreditPolicy::new(10, 20),
        link.clone(),
        setup.executor.clone(),
        setup.tracker.clone(),
    );

    setup.executor.enter(|| replenisher.run());

    assert!(link.grants().is_empty());
}

#[rstest]
fn unbound_replenisher_ignores_pending(setup: Fixture) {
    let link = FlowLink::with_credit(0);
    let replenisher =
        CreditReplenisher::unbound(CreditPolicy::new(50, 10), link.clone(), setup.executor.clone());

    setup.executor.enter(|| replenisher.run());

    assert_eq!(link.grants(), vec![50]);
}

#[rstest]
fn redundant_runs_grant_once(setup: Fixture) {
    let link = FlowLink::with_credit(0);
    let replenisher =
        CreditReplenisher::unbound(CreditPolicy::new(50, 10), link.clone(), setup.executor.clone());

    setup.executor.enter(|| {
        for _ in 0..5 {
            replenisher.run();
        }
    });

    assert_eq!(link.grants(), vec![50]);
}

#[rstest]
fn off_handler_run_requeues(setup: Fixture) {
    let Fixture {
        executor,
        mut handler,
        ..
    } = setup;
    let link = FlowLink::with_credit(0);
    let replenisher =
        CreditReplenisher::unbound(CreditPolicy::new(50, 10), link.clone(), executor.clone());

    let remote = replenisher.clone();
    std::thread::spawn(move || {
        for _ in 0..3 {
            remote.run();
        }
    })
    .join()
    .expect("backpressure thread");
    assert!(link.grants().is_empty());

    assert_eq!(handler.run_pending(), 3);
    assert_eq!(link.grants(), vec![50]);
    assert_eq!(executor.flush_count(), 1);
}

#[rstest]
fn submit_defers_until_handler_runs(setup: Fixture) {
    let Fixture {
        executor,
        mut handler,
        ..
    } = setup;
    let link = FlowLink::with_credit(0);
    let replenisher =
        CreditReplenisher::unbound(CreditPolicy::new(20, 5), link.clone(), executor.clone());

    executor.enter(|| replenisher.submit());
    assert!(link.grants().is_empty());

    handler.run_pending();
    assert_eq!(link.grants(), vec![20]);
}

#[rstest]
#[traced_test]
fn grants_are_traced(setup: Fixture) {
    let link = FlowLink::with_credit(3);
    let replenisher =
        CreditReplenisher::unbound(CreditPolicy::new(40, 10), link.clone(), setup.executor.clone());

    setup.executor.enter(|| replenisher.run());

    assert!(logs_contain("credit replenished"));
    assert!(logs_contain("grant=37"));
}
