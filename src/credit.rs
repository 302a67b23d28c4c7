//! Link credit replenishment.
//!
//! The [`CreditReplenisher`] tops a link's credit back up to the configured
//! refill level once it falls to the low-water mark. It is submitted from
//! several places: credit-grant events from the peer, settlements, and
//! subsystems releasing backpressure, some of which fire once per blocked
//! request. Each run recomputes its decision from the link's current credit
//! and the pending settlement count, so any number of redundant submissions
//! for one condition yield at most one flow grant.

use std::{fmt, sync::Arc};

use crate::{
    config::CreditPolicy,
    executor::HandlerExecutor,
    link::Link,
    metrics,
    settlement::SettlementTracker,
};

/// Whether `credit` is at or below the low-water mark once credit promised to
/// unsettled deliveries is taken into account.
///
/// ```
/// use amqp_inbound::is_below_threshold;
/// assert!(is_below_threshold(10, 5, 20));
/// assert!(!is_below_threshold(96, 5, 20));
/// ```
#[must_use]
pub fn is_below_threshold(credit: u32, pending: u32, threshold: u32) -> bool {
    i64::from(credit) <= i64::from(threshold) - i64::from(pending)
}

/// Credits needed to bring the link back to `refill`, net of pending
/// settlements. May be zero or negative.
///
/// ```
/// use amqp_inbound::calculated_top_up;
/// assert_eq!(calculated_top_up(100, 10, 5), 85);
/// assert_eq!(calculated_top_up(10, 8, 5), -3);
/// ```
#[must_use]
pub fn calculated_top_up(refill: u32, credit: u32, pending: u32) -> i64 {
    i64::from(refill) - i64::from(credit) - i64::from(pending)
}

struct ReplenisherInner {
    policy: CreditPolicy,
    link: Arc<dyn Link>,
    executor: HandlerExecutor,
    tracker: Option<SettlementTracker>,
}

/// Idempotent credit top-up task for one link.
#[derive(Clone)]
pub struct CreditReplenisher {
    inner: Arc<ReplenisherInner>,
}

impl CreditReplenisher {
    /// Create a replenisher that does not account for pending settlements.
    #[must_use]
    pub fn unbound(policy: CreditPolicy, link: Arc<dyn Link>, executor: HandlerExecutor) -> Self {
        Self::build(policy, link, executor, None)
    }

    /// Create a replenisher that subtracts `tracker`'s pending count.
    #[must_use]
    pub fn bound(
        policy: CreditPolicy,
        link: Arc<dyn Link>,
        executor: HandlerExecutor,
        tracker: SettlementTracker,
    ) -> Self {
        Self::build(policy, link, executor, Some(tracker))
    }

    fn build(
        policy: CreditPolicy,
        link: Arc<dyn Link>,
        executor: HandlerExecutor,
        tracker: Option<SettlementTracker>,
    ) -> Self {
        Self {
            inner: Arc::new(ReplenisherInner {
                policy,
                link,
                executor,
                tracker,
            }),
        }
    }

    /// Policy applied by this replenisher.
    #[must_use]
    pub fn policy(&self) -> CreditPolicy { self.inner.policy }

    /// Queue a run on the handler. Safe to call from any thread, any number
    /// of times.
    pub fn submit(&self) {
        let this = self.clone();
        self.inner.executor.run_later(move || this.run());
    }

    /// Top up credit if the link is at or below its low-water mark.
    ///
    /// Off the handler, the run is re-queued onto it instead.
    pub fn run(&self) {
        let inner = &self.inner;
        if !inner.executor.is_handler() {
            self.submit();
            return;
        }
        inner.executor.require_on_handler();

        let pending = inner.tracker.as_ref().map_or(0, SettlementTracker::pending);
        let credit = inner.link.credit();
        if !is_below_threshold(credit, pending, inner.policy.threshold()) {
            return;
        }

        let top_up = calculated_top_up(inner.policy.refill(), credit, pending);
        let Ok(grant) = u32::try_from(top_up) else {
            return;
        };
        if grant == 0 {
            return;
        }
        inner.link.flow(grant);
        inner.executor.flush_now();
        metrics::add_credit_granted(grant);
        tracing::debug!(
            link = inner.link.name(),
            credit,
            pending,
            grant,
            "credit replenished"
        );
    }
}

impl fmt::Debug for CreditReplenisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreditReplenisher")
            .field("policy", &self.inner.policy)
            .field("link", &self.inner.link.name())
            .field("tracker", &self.inner.tracker)
            .finish()
    }
}

#[cfg(test)]
mod tests;
