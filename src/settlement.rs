//! Pending settlement accounting.
//!
//! Every delivery handed to routing is counted as pending until it is
//! settled. The credit replenisher subtracts the pending count from its
//! threshold so a slow routing layer is not flooded with new transfers.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use crate::{
    credit::CreditReplenisher,
    executor::HandlerExecutor,
    link::{Delivery, Outcome},
};

/// Counter of deliveries accepted for routing but not yet settled.
///
/// The count lives in an atomic only so clones can travel inside tasks queued
/// from other threads; it is mutated exclusively on the handler.
#[derive(Clone)]
pub struct SettlementTracker {
    pending: Arc<AtomicI64>,
    executor: HandlerExecutor,
}

impl SettlementTracker {
    /// Create a tracker starting at zero.
    #[must_use]
    pub fn new(executor: HandlerExecutor) -> Self {
        Self {
            pending: Arc::new(AtomicI64::new(0)),
            executor,
        }
    }

    /// Count a delivery accepted into the routing handoff.
    #[track_caller]
    pub fn increment(&self) {
        debug_assert!(
            self.pending.load(Ordering::Relaxed) >= 0,
            "pending settlements must never be negative"
        );
        self.executor.require_on_handler();
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a settlement.
    #[track_caller]
    pub fn decrement(&self) {
        self.executor.require_on_handler();
        let remaining = self.pending.fetch_sub(1, Ordering::Relaxed) - 1;
        debug_assert!(
            remaining >= 0,
            "settled more deliveries than were accepted for routing"
        );
    }

    /// Deliveries awaiting settlement.
    #[must_use]
    pub fn pending(&self) -> u32 {
        u32::try_from(self.pending.load(Ordering::Relaxed)).unwrap_or(0)
    }
}

impl fmt::Debug for SettlementTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlementTracker")
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .field("handler", &self.executor.id())
            .finish()
    }
}

/// Cloneable handle the routing layer uses to settle deliveries.
///
/// Settling from outside the handler hops onto it first, so the routing layer
/// may complete work on any thread.
#[derive(Clone)]
pub struct SettleHandle {
    tracker: SettlementTracker,
    replenisher: CreditReplenisher,
    executor: HandlerExecutor,
}

impl SettleHandle {
    pub(crate) fn new(
        tracker: SettlementTracker,
        replenisher: CreditReplenisher,
        executor: HandlerExecutor,
    ) -> Self {
        Self {
            tracker,
            replenisher,
            executor,
        }
    }

    /// Settle `delivery` with whatever outcome routing already recorded.
    pub fn settle(&self, delivery: Arc<dyn Delivery>) {
        let this = self.clone();
        self.executor
            .run_now(move || this.settle_on_handler(delivery.as_ref()));
    }

    /// Record `outcome` on `delivery` and settle it.
    pub fn settle_with(&self, delivery: Arc<dyn Delivery>, outcome: Outcome) {
        let this = self.clone();
        self.executor.run_now(move || {
            delivery.disposition(outcome);
            this.settle_on_handler(delivery.as_ref());
        });
    }

    /// Decrement the pending count, settle the delivery and re-evaluate
    /// credit. Must run on the handler.
    pub(crate) fn settle_on_handler(&self, delivery: &dyn Delivery) {
        self.executor.require_on_handler();
        self.tracker.decrement();
        delivery.settle();
        self.replenisher.run();
    }
}

impl fmt::Debug for SettleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettleHandle")
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}
