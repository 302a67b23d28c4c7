//! Interfaces to the subsystems the receiver delegates to.
//!
//! Storage, message construction, transaction lookup, routing and session
//! bookkeeping all live outside this crate. The traits here describe what the
//! receiver needs from each of them. [`NullStorage`] and
//! [`DefaultMessageFactory`] are provided for brokers running without
//! persistence and for tests.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;

use crate::{
    error::{CollaboratorError, RoutingError},
    large_message::{LargeMessageAccumulator, LargeMessageId},
    link::{Delivery, Link, TxnId},
    message::{AssembledMessage, StandardMessage},
    settlement::SettleHandle,
};

/// Append-only backing store for one large message.
pub trait Spool: Send + fmt::Debug {
    /// Append bytes to the end of the spool.
    ///
    /// # Errors
    ///
    /// Returns the storage failure when the bytes could not be written.
    fn append(&mut self, bytes: &[u8]) -> Result<(), CollaboratorError>;

    /// Flush buffered bytes and release file handles. The spool stays
    /// addressable by its message id and must not be appended to afterwards.
    ///
    /// # Errors
    ///
    /// Returns the storage failure when flushing failed.
    fn finish(&mut self) -> Result<(), CollaboratorError>;

    /// Delete the backing file.
    ///
    /// # Errors
    ///
    /// Returns the storage failure when deletion failed.
    fn delete(self: Box<Self>) -> Result<(), CollaboratorError>;
}

/// Storage subsystem used for large message spooling.
pub trait Storage: Send + Sync {
    /// Whether this storage persists messages. Non-persistent storage never
    /// spools; large transfers are kept in memory instead.
    fn is_persistent(&self) -> bool { true }

    /// Allocate a new message identifier.
    ///
    /// # Errors
    ///
    /// Returns the storage failure when no identifier could be allocated.
    fn generate_id(&self) -> Result<LargeMessageId, CollaboratorError>;

    /// Create the backing spool for a large message.
    ///
    /// # Errors
    ///
    /// Returns the storage failure when the spool could not be created.
    fn open_spool(&self, id: LargeMessageId) -> Result<Box<dyn Spool>, CollaboratorError>;

    /// Record that a large message is being assembled.
    ///
    /// # Errors
    ///
    /// Returns the storage failure when registration failed.
    fn register_large_message(
        &self,
        id: LargeMessageId,
        message: &LargeMessageAccumulator,
    ) -> Result<(), CollaboratorError>;
}

/// Builds in-memory messages from a complete transfer payload.
pub trait MessageFactory: Send + Sync {
    /// Create a message from all bytes of a delivery.
    ///
    /// # Errors
    ///
    /// Returns the failure when the payload cannot form a message.
    fn create_standard_message(
        &self,
        delivery: &dyn Delivery,
        payload: Bytes,
    ) -> Result<StandardMessage, CollaboratorError>;
}

/// Handle to a transaction owned by the routing subsystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    id: TxnId,
}

impl Transaction {
    /// Create a handle for `id`.
    #[must_use]
    pub fn new(id: TxnId) -> Self { Self { id } }

    /// Transaction identifier.
    #[must_use]
    pub fn id(&self) -> &TxnId { &self.id }
}

/// Resolves transaction identifiers declared by the peer.
pub trait TransactionLookup: Send + Sync {
    /// Find the transaction for `txn_id`. The receiver always passes
    /// `create_if_missing = false`, so unknown identifiers yield `None`.
    ///
    /// # Errors
    ///
    /// Returns the failure when the lookup itself failed.
    fn lookup(
        &self,
        txn_id: &TxnId,
        create_if_missing: bool,
    ) -> Result<Option<Transaction>, CollaboratorError>;
}

/// Per-receiver routing options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoutingContext {
    duplicate_detection: bool,
}

impl RoutingContext {
    /// Create a routing context.
    #[must_use]
    pub const fn new(duplicate_detection: bool) -> Self { Self { duplicate_detection } }

    /// Whether routing should reject duplicate messages.
    #[must_use]
    pub const fn duplicate_detection(&self) -> bool { self.duplicate_detection }
}

/// Everything the routing layer receives for one assembled message.
pub struct Handoff {
    /// The finished message.
    pub message: AssembledMessage,
    /// The delivery that carried it; settle it through `settlement`.
    pub delivery: Arc<dyn Delivery>,
    /// The link it arrived on.
    pub link: Arc<dyn Link>,
    /// Enclosing transaction, if the transfer was transactional and known.
    pub transaction: Option<Transaction>,
    /// Routing options for this receiver.
    pub context: RoutingContext,
    /// Handle used to settle the delivery once routing decides its outcome.
    pub settlement: SettleHandle,
}

impl fmt::Debug for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("message", &self.message)
            .field("delivery", &self.delivery.id())
            .field("link", &self.link.name())
            .field("transaction", &self.transaction)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Routing layer receiving assembled messages.
///
/// Routing is asynchronous: `deliver` accepts the handoff and the delivery is
/// later settled through [`Handoff::settlement`].
pub trait RoutingSink: Send + Sync {
    /// Accept a message for routing.
    ///
    /// # Errors
    ///
    /// Returns a [`RoutingError`] when the message cannot be accepted. The
    /// receiver then settles the delivery with a failure outcome.
    fn deliver(&self, handoff: Handoff) -> Result<(), RoutingError>;
}

/// Session owning the receiver's link.
pub trait Session: Send + Sync {
    /// Forget the receiver bound to `link`.
    fn remove_receiver(&self, link: &dyn Link);
}

/// Storage used when the broker runs without persistence.
///
/// Reports itself as non-persistent, so the receiver never spools and
/// [`open_spool`](Storage::open_spool) is never reached.
#[derive(Debug, Default)]
pub struct NullStorage {
    next_id: AtomicU64,
}

impl Storage for NullStorage {
    fn is_persistent(&self) -> bool { false }

    fn generate_id(&self) -> Result<LargeMessageId, CollaboratorError> {
        Ok(LargeMessageId::new(
            self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
        ))
    }

    fn open_spool(&self, id: LargeMessageId) -> Result<Box<dyn Spool>, CollaboratorError> {
        Err(format!("non-persistent storage cannot spool large message {id}").into())
    }

    fn register_large_message(
        &self,
        _id: LargeMessageId,
        _message: &LargeMessageAccumulator,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Message factory that keeps the payload as received.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultMessageFactory;

impl MessageFactory for DefaultMessageFactory {
    fn create_standard_message(
        &self,
        delivery: &dyn Delivery,
        payload: Bytes,
    ) -> Result<StandardMessage, CollaboratorError> {
        Ok(StandardMessage::new(delivery.message_format(), payload))
    }
}
