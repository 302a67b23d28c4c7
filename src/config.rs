//! Receiver configuration.
//!
//! [`ReceiverConfig`] carries the per-acceptor settings a broker hands to each
//! receiving link. Loading the values is left to the embedding application;
//! the type derives `Deserialize` so it can be embedded in any serde based
//! configuration file.

use std::num::NonZeroUsize;

use serde::Deserialize;

/// Default number of credits a link is topped up to.
pub const DEFAULT_REFILL_CREDITS: u32 = 1000;
/// Default low-water mark below which credit is replenished.
pub const DEFAULT_LOW_CREDIT_THRESHOLD: u32 = 300;
/// Default size in bytes at which a transfer is spooled as a large message.
pub const DEFAULT_MIN_LARGE_MESSAGE_SIZE: i32 = 100 * 1024;

/// Settings consumed by a [`ReceiverCore`](crate::receiver::ReceiverCore).
///
/// # Examples
///
/// ```
/// use amqp_inbound::ReceiverConfig;
///
/// let config = ReceiverConfig::default()
///     .with_refill_credits(100)
///     .with_low_credit_threshold(20)
///     .with_min_large_message_size(0);
///
/// assert_eq!(config.credit_policy().refill(), 100);
/// assert_eq!(config.credit_policy().threshold(), 20);
/// assert!(config.large_message_threshold().is_none());
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ReceiverConfig {
    refill_credits: u32,
    low_credit_threshold: u32,
    min_large_message_size: i32,
    use_modified_for_transient_delivery_errors: bool,
    duplicate_detection: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            refill_credits: DEFAULT_REFILL_CREDITS,
            low_credit_threshold: DEFAULT_LOW_CREDIT_THRESHOLD,
            min_large_message_size: DEFAULT_MIN_LARGE_MESSAGE_SIZE,
            use_modified_for_transient_delivery_errors: false,
            duplicate_detection: true,
        }
    }
}

impl ReceiverConfig {
    /// Set the credit level a link is topped up to.
    #[must_use]
    pub fn with_refill_credits(mut self, credits: u32) -> Self {
        self.refill_credits = credits;
        self
    }

    /// Set the low-water mark that triggers a top-up.
    #[must_use]
    pub fn with_low_credit_threshold(mut self, credits: u32) -> Self {
        self.low_credit_threshold = credits;
        self
    }

    /// Set the large message threshold in bytes. Zero or a negative value
    /// disables spooling.
    #[must_use]
    pub fn with_min_large_message_size(mut self, bytes: i32) -> Self {
        self.min_large_message_size = bytes;
        self
    }

    /// Settle failed routings with `Modified` rather than `Rejected` when the
    /// failure is transient.
    #[must_use]
    pub fn with_modified_for_transient_errors(mut self, enabled: bool) -> Self {
        self.use_modified_for_transient_delivery_errors = enabled;
        self
    }

    /// Enable or disable duplicate detection in the routing context.
    #[must_use]
    pub fn with_duplicate_detection(mut self, enabled: bool) -> Self {
        self.duplicate_detection = enabled;
        self
    }

    /// Credit replenishment policy derived from this configuration.
    #[must_use]
    pub fn credit_policy(&self) -> CreditPolicy {
        CreditPolicy::new(self.refill_credits, self.low_credit_threshold)
    }

    /// Raw large message threshold as configured.
    #[must_use]
    pub fn min_large_message_size(&self) -> i32 { self.min_large_message_size }

    /// Large message threshold, or `None` when spooling is disabled.
    #[must_use]
    pub fn large_message_threshold(&self) -> Option<NonZeroUsize> {
        usize::try_from(self.min_large_message_size)
            .ok()
            .and_then(NonZeroUsize::new)
    }

    /// Whether transient routing failures settle with `Modified`.
    #[must_use]
    pub fn use_modified_for_transient_errors(&self) -> bool {
        self.use_modified_for_transient_delivery_errors
    }

    /// Whether routing should perform duplicate detection.
    #[must_use]
    pub fn duplicate_detection(&self) -> bool { self.duplicate_detection }
}

/// Immutable credit top-up policy for one link.
///
/// `refill` is the credit level restored by a top-up; `threshold` is the
/// low-water mark. `refill >= threshold` is expected but not enforced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CreditPolicy {
    refill: u32,
    threshold: u32,
}

impl CreditPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(refill: u32, threshold: u32) -> Self { Self { refill, threshold } }

    /// Target credit after a top-up.
    #[must_use]
    pub const fn refill(&self) -> u32 { self.refill }

    /// Low-water mark that triggers a top-up.
    #[must_use]
    pub const fn threshold(&self) -> u32 { self.threshold }
}
