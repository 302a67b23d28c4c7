//! Protocol engine objects consumed by the receiver.
//!
//! The wire engine that decodes frames into links and deliveries lives outside
//! this crate. [`Link`] and [`Delivery`] describe the small surface the
//! receiver needs from it.

use bytes::Bytes;
use derive_more::{Display, From, Into};

use crate::error::ErrorCondition;

/// Engine-assigned identity of a delivery on a link.
///
/// ```
/// use amqp_inbound::DeliveryId;
/// let id = DeliveryId::new(3);
/// assert_eq!(id.get(), 3);
/// assert_eq!(id.to_string(), "3");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, From, Into)]
#[display("{_0}")]
pub struct DeliveryId(u64);

impl DeliveryId {
    /// Create a new identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self { Self(value) }

    /// Return the inner numeric identifier.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }
}

/// Transaction identifier declared by a transaction coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, From, Into)]
pub struct TxnId(Bytes);

impl TxnId {
    /// Wrap raw identifier bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self { Self(bytes.into()) }

    /// Raw identifier bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }
}

/// Terminal outcome of a delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The message was accepted.
    Accepted,
    /// The message is invalid and will not be processed.
    Rejected {
        /// Optional diagnostic condition.
        error: Option<ErrorCondition>,
    },
    /// The message was not processed and may be redelivered.
    Released,
    /// The message was modified; redelivery may be attempted.
    Modified {
        /// Count the attempt as a failed delivery.
        delivery_failed: bool,
        /// Do not redeliver to this receiver.
        undeliverable_here: bool,
    },
}

/// Transactional delivery state carried by a transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionalState {
    /// Transaction the transfer belongs to.
    pub txn_id: TxnId,
    /// Provisional outcome, if the sender supplied one.
    pub outcome: Option<Outcome>,
}

/// Remote state advertised by the sender for a delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    /// The transfer is enlisted in a transaction.
    Transactional(TransactionalState),
    /// A plain terminal outcome.
    Outcome(Outcome),
}

impl DeliveryState {
    /// Transaction identifier, when the state is transactional.
    #[must_use]
    pub fn txn_id(&self) -> Option<&TxnId> {
        match self {
            Self::Transactional(state) => Some(&state.txn_id),
            Self::Outcome(_) => None,
        }
    }
}

/// A single inbound transfer on a link.
///
/// A delivery may be observed several times while it is `partial`; it is
/// superseded once the link advances past it.
pub trait Delivery: Send + Sync {
    /// Identity used to detect stale events.
    fn id(&self) -> DeliveryId;

    /// More transfer frames are expected for this delivery.
    fn is_partial(&self) -> bool;

    /// The sender aborted the delivery.
    fn is_aborted(&self) -> bool;

    /// Bytes received and not yet consumed.
    fn available(&self) -> usize;

    /// AMQP message-format code from the first transfer.
    fn message_format(&self) -> u32;

    /// Remote state supplied by the sender.
    fn remote_state(&self) -> Option<DeliveryState>;

    /// Record the local outcome sent with the settlement.
    fn disposition(&self, outcome: Outcome);

    /// Settle the delivery locally.
    fn settle(&self);
}

/// The receiving end of a link.
///
/// Implementations use interior mutability; every call is made from the
/// connection's handler.
pub trait Link: Send + Sync {
    /// Link name, used for logging.
    fn name(&self) -> &str;

    /// Credit currently advertised to the sender.
    fn credit(&self) -> u32;

    /// Grant `credits` additional credits to the sender.
    fn flow(&self, credits: u32);

    /// Whether the sender asked to drain outstanding credit.
    fn drain_requested(&self) -> bool;

    /// Identity of the delivery currently at the head of the link.
    fn current(&self) -> Option<DeliveryId>;

    /// Move past the current delivery. Returns `false` when there was none.
    fn advance(&self) -> bool;

    /// Take all bytes currently available for the current delivery.
    fn recv(&self) -> Bytes;

    /// Bytes currently available for the current delivery.
    fn available(&self) -> usize;

    /// Attach an error condition sent with the link detach.
    fn set_condition(&self, condition: ErrorCondition);
}
