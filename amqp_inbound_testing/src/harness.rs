//! A receiver wired to recording collaborators.

use std::sync::Arc;

use amqp_inbound::{
    Collaborators,
    DefaultMessageFactory,
    Delivery,
    ErrorCondition,
    HandlerExecutor,
    HandlerLoop,
    ReceiverConfig,
    ReceiverCore,
    ReceiverError,
};

use crate::{MapTransactions, MemoryStorage, MockDelivery, MockLink, RecordingSession, RecordingSink};

/// Link name used by harness receivers.
pub const LINK_NAME: &str = "harness-link";

/// [`ReceiverCore`] plus every collaborator it talks to.
///
/// Methods that drive the receiver enter the handler first, standing in for
/// the connection driver.
pub struct ReceiverHarness {
    /// Engine link.
    pub link: Arc<MockLink>,
    /// Spool storage.
    pub storage: Arc<MemoryStorage>,
    /// Routing layer.
    pub sink: Arc<RecordingSink>,
    /// Transaction lookup.
    pub transactions: Arc<MapTransactions>,
    /// Owning session.
    pub session: Arc<RecordingSession>,
    /// Handler executor.
    pub executor: HandlerExecutor,
    /// Handler task queue.
    pub handler: HandlerLoop,
    /// Receiver under test.
    pub receiver: ReceiverCore,
}

impl ReceiverHarness {
    /// Build a receiver over persistent in-memory storage, with the link
    /// advertising `initial_credit`.
    #[must_use]
    pub fn new(config: &ReceiverConfig, initial_credit: u32) -> Self {
        Self::with_storage(config, initial_credit, MemoryStorage::persistent())
    }

    /// Build a receiver over the given storage.
    #[must_use]
    pub fn with_storage(config: &ReceiverConfig, initial_credit: u32, storage: MemoryStorage) -> Self {
        let link = MockLink::new(LINK_NAME, initial_credit);
        let storage = Arc::new(storage);
        let sink = Arc::new(RecordingSink::default());
        let transactions = Arc::new(MapTransactions::default());
        let session = Arc::new(RecordingSession::default());
        let (executor, handler) = HandlerExecutor::pair();
        let receiver = ReceiverCore::new(
            link.clone(),
            session.clone(),
            executor.clone(),
            config,
            Collaborators {
                storage: storage.clone(),
                messages: Arc::new(DefaultMessageFactory),
                transactions: transactions.clone(),
                routing: sink.clone(),
            },
        );
        Self {
            link,
            storage,
            sink,
            transactions,
            session,
            executor,
            handler,
            receiver,
        }
    }

    /// Deliver a transfer event for `delivery`.
    ///
    /// # Errors
    ///
    /// Propagates the receiver's error.
    pub fn on_message(&mut self, delivery: &Arc<MockDelivery>) -> Result<(), ReceiverError> {
        let delivery: Arc<dyn Delivery> = delivery.clone();
        let receiver = &mut self.receiver;
        self.executor.enter(|| receiver.on_message(delivery))
    }

    /// Feed `bytes` for the current delivery and deliver the event.
    ///
    /// # Errors
    ///
    /// Propagates the receiver's error.
    pub fn transfer(
        &mut self,
        delivery: &Arc<MockDelivery>,
        bytes: &[u8],
        more: bool,
    ) -> Result<(), ReceiverError> {
        self.link.transfer(bytes, more);
        self.on_message(delivery)
    }

    /// Deliver a peer flow event.
    pub fn on_flow(&self, credits: u32, drain: bool) {
        self.executor.enter(|| self.receiver.on_flow(credits, drain));
    }

    /// Settle `delivery` through the receiver.
    pub fn settle(&self, delivery: &Arc<MockDelivery>) {
        self.executor.enter(|| self.receiver.settle(delivery.as_ref()));
    }

    /// Close the receiver.
    pub fn close(&mut self, remote_initiated: bool) {
        let receiver = &mut self.receiver;
        self.executor.enter(|| receiver.close(remote_initiated));
    }

    /// Close the receiver with an error condition.
    pub fn close_with_error(&mut self, condition: ErrorCondition) {
        let receiver = &mut self.receiver;
        self.executor.enter(|| receiver.close_with_error(condition));
    }

    /// Run tasks queued onto the handler.
    pub fn run_pending(&mut self) -> usize { self.handler.run_pending() }
}
