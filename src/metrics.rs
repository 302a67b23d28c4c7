//! Metric helpers for `amqp_inbound`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to no-ops.

/// Name of the counter tracking credit granted to senders.
pub const CREDIT_GRANTED: &str = "amqp_inbound_credit_granted_total";
/// Name of the counter tracking finished deliveries, labelled by outcome.
pub const DELIVERIES: &str = "amqp_inbound_deliveries_total";
/// Name of the counter tracking messages assembled through a spool.
pub const LARGE_MESSAGES: &str = "amqp_inbound_large_messages_total";
/// Name of the counter tracking internal protocol errors.
pub const ERRORS_TOTAL: &str = "amqp_inbound_errors_total";

/// How a delivery left the receiver.
#[derive(Clone, Copy, Debug)]
pub enum DeliveryOutcome {
    /// Handed to the routing layer.
    Routed,
    /// Aborted by the sender.
    Aborted,
    /// Routing failed and the receiver settled it.
    Failed,
}

impl DeliveryOutcome {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            DeliveryOutcome::Routed => "routed",
            DeliveryOutcome::Aborted => "aborted",
            DeliveryOutcome::Failed => "failed",
        }
    }
}

/// Record credit granted by a flow.
pub fn add_credit_granted(credits: u32) {
    #[cfg(feature = "metrics")]
    metrics::counter!(CREDIT_GRANTED).increment(u64::from(credits));
    #[cfg(not(feature = "metrics"))]
    let _ = credits;
}

/// Record a finished delivery.
pub fn inc_deliveries(outcome: DeliveryOutcome) {
    #[cfg(feature = "metrics")]
    metrics::counter!(DELIVERIES, "outcome" => outcome.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// Record a message assembled through a spool.
pub fn inc_large_messages() {
    #[cfg(feature = "metrics")]
    metrics::counter!(LARGE_MESSAGES).increment(1);
}

/// Record an internal protocol error.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    metrics::counter!(ERRORS_TOTAL).increment(1);
}
