//! Scripted link and delivery stand-ins for the protocol engine.
//!
//! [`MockLink`] keeps a queue of [`MockDelivery`] values; the head of the
//! queue is the link's current delivery. Tests feed bytes with
//! [`MockLink::transfer`], which updates the delivery's available count and
//! partial flag the way an engine does when a transfer frame arrives.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use amqp_inbound::{
    Delivery,
    DeliveryId,
    DeliveryState,
    ErrorCondition,
    Link,
    Outcome,
    TransactionalState,
    TxnId,
};
use bytes::{Bytes, BytesMut};

#[derive(Debug, Default)]
struct DeliveryScript {
    partial: bool,
    aborted: bool,
    available: usize,
    remote_state: Option<DeliveryState>,
    outcome: Option<Outcome>,
    settle_count: usize,
}

/// Delivery whose flags are driven by [`MockLink`].
#[derive(Debug)]
pub struct MockDelivery {
    id: DeliveryId,
    message_format: u32,
    script: Mutex<DeliveryScript>,
}

impl MockDelivery {
    fn new(id: DeliveryId) -> Self {
        Self {
            id,
            message_format: 0,
            script: Mutex::new(DeliveryScript {
                partial: true,
                ..DeliveryScript::default()
            }),
        }
    }

    fn script(&self) -> MutexGuard<'_, DeliveryScript> {
        self.script.lock().expect("delivery script poisoned")
    }

    /// Mark the delivery as enlisted in transaction `txn_id`.
    pub fn set_transactional(&self, txn_id: impl Into<TxnId>) {
        self.script().remote_state = Some(DeliveryState::Transactional(TransactionalState {
            txn_id: txn_id.into(),
            outcome: None,
        }));
    }

    /// Set an arbitrary remote state.
    pub fn set_remote_state(&self, state: DeliveryState) { self.script().remote_state = Some(state); }

    /// Outcome recorded by the receiver or routing layer.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome> { self.script().outcome.clone() }

    /// Whether the delivery was settled at least once.
    #[must_use]
    pub fn is_settled(&self) -> bool { self.script().settle_count > 0 }

    /// Number of times the delivery was settled.
    #[must_use]
    pub fn settle_count(&self) -> usize { self.script().settle_count }
}

impl Delivery for MockDelivery {
    fn id(&self) -> DeliveryId { self.id }

    fn is_partial(&self) -> bool { self.script().partial }

    fn is_aborted(&self) -> bool { self.script().aborted }

    fn available(&self) -> usize { self.script().available }

    fn message_format(&self) -> u32 { self.message_format }

    fn remote_state(&self) -> Option<DeliveryState> { self.script().remote_state.clone() }

    fn disposition(&self, outcome: Outcome) { self.script().outcome = Some(outcome); }

    fn settle(&self) { self.script().settle_count += 1; }
}

#[derive(Debug, Default)]
struct LinkState {
    credit: u32,
    drain: bool,
    deliveries: VecDeque<Arc<MockDelivery>>,
    buffer: BytesMut,
    grants: Vec<u32>,
    advanced: usize,
    condition: Option<ErrorCondition>,
    next_id: u64,
}

/// Link stand-in recording credit grants and advances.
#[derive(Debug)]
pub struct MockLink {
    name: String,
    state: Mutex<LinkState>,
}

impl MockLink {
    /// Create a link advertising `credit` credits.
    #[must_use]
    pub fn new(name: &str, credit: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            state: Mutex::new(LinkState {
                credit,
                ..LinkState::default()
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, LinkState> { self.state.lock().expect("link state poisoned") }

    /// Start a new delivery. It consumes one credit and becomes current once
    /// every earlier delivery has been advanced past.
    pub fn begin_delivery(&self) -> Arc<MockDelivery> {
        let mut state = self.state();
        state.next_id += 1;
        let delivery = Arc::new(MockDelivery::new(DeliveryId::new(state.next_id)));
        state.credit = state.credit.saturating_sub(1);
        state.deliveries.push_back(Arc::clone(&delivery));
        delivery
    }

    /// Receive a transfer frame carrying `bytes` for the current delivery.
    /// `more` marks the delivery as still partial.
    pub fn transfer(&self, bytes: &[u8], more: bool) {
        let mut state = self.state();
        state.buffer.extend_from_slice(bytes);
        let available = state.buffer.len();
        if let Some(current) = state.deliveries.front() {
            let mut script = current.script();
            script.available = available;
            script.partial = more;
        }
    }

    /// The sender aborts the current delivery.
    pub fn abort(&self) {
        let mut state = self.state();
        state.buffer.clear();
        if let Some(current) = state.deliveries.front() {
            let mut script = current.script();
            script.aborted = true;
            script.partial = false;
            script.available = 0;
        }
    }

    /// Overwrite the advertised credit.
    pub fn set_credit(&self, credit: u32) { self.state().credit = credit; }

    /// Set the drain flag.
    pub fn set_drain(&self, drain: bool) { self.state().drain = drain; }

    /// Flow grants issued so far, in order.
    #[must_use]
    pub fn grants(&self) -> Vec<u32> { self.state().grants.clone() }

    /// Number of advances performed.
    #[must_use]
    pub fn advanced(&self) -> usize { self.state().advanced }

    /// Condition attached to the link, if any.
    #[must_use]
    pub fn condition(&self) -> Option<ErrorCondition> { self.state().condition.clone() }
}

impl Link for MockLink {
    fn name(&self) -> &str { &self.name }

    fn credit(&self) -> u32 { self.state().credit }

    fn flow(&self, credits: u32) {
        let mut state = self.state();
        state.credit = state.credit.saturating_add(credits);
        state.grants.push(credits);
    }

    fn drain_requested(&self) -> bool { self.state().drain }

    fn current(&self) -> Option<DeliveryId> { self.state().deliveries.front().map(|d| d.id) }

    fn advance(&self) -> bool {
        let mut state = self.state();
        state.buffer.clear();
        let advanced = state.deliveries.pop_front().is_some();
        if advanced {
            state.advanced += 1;
        }
        advanced
    }

    fn recv(&self) -> Bytes {
        let mut state = self.state();
        let bytes = state.buffer.split().freeze();
        if let Some(current) = state.deliveries.front() {
            current.script().available = 0;
        }
        bytes
    }

    fn available(&self) -> usize { self.state().buffer.len() }

    fn set_condition(&self, condition: ErrorCondition) { self.state().condition = Some(condition); }
}
