//! Composition root for one receiving link.
//!
//! [`ReceiverCore`] owns the reassembler, the settlement tracker and the
//! credit replenisher for a link. It is driven by the connection handler:
//! engine events arrive through [`ReceiverCore::on_message`] and
//! [`ReceiverCore::on_flow`], finished messages leave through the
//! [`RoutingSink`], and settlements come back through a [`SettleHandle`].

use std::{fmt, sync::Arc};

use log::{debug, warn};

use crate::{
    collaborators::{
        Handoff,
        MessageFactory,
        RoutingContext,
        RoutingSink,
        Session,
        Storage,
        Transaction,
        TransactionLookup,
    },
    config::ReceiverConfig,
    credit::CreditReplenisher,
    error::{ErrorCondition, ReassemblyError, ReceiverError, RoutingError},
    executor::HandlerExecutor,
    large_message::LargeMessageAccumulator,
    link::{Delivery, Link, Outcome},
    message::AssembledMessage,
    metrics::{self, DeliveryOutcome},
    panic,
    reassembly::{DeliveryReassembler, Reassembly},
    settlement::{SettleHandle, SettlementTracker},
};

/// Subsystems a receiver delegates to.
#[derive(Clone)]
pub struct Collaborators {
    /// Large message spooling.
    pub storage: Arc<dyn Storage>,
    /// Construction of in-memory messages.
    pub messages: Arc<dyn MessageFactory>,
    /// Transaction resolution.
    pub transactions: Arc<dyn TransactionLookup>,
    /// Destination of assembled messages.
    pub routing: Arc<dyn RoutingSink>,
}

/// Lifecycle of a receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiverState {
    /// Accepting deliveries.
    Open,
    /// Tearing down.
    Closing,
    /// Closed; further events are ignored.
    Closed,
}

/// Receiving side of one link.
pub struct ReceiverCore {
    link: Arc<dyn Link>,
    session: Arc<dyn Session>,
    executor: HandlerExecutor,
    collaborators: Collaborators,
    reassembler: DeliveryReassembler,
    tracker: SettlementTracker,
    replenisher: CreditReplenisher,
    settlement: SettleHandle,
    routing: RoutingContext,
    use_modified: bool,
    state: ReceiverState,
}

impl ReceiverCore {
    /// Bind a receiver to `link`.
    #[must_use]
    pub fn new(
        link: Arc<dyn Link>,
        session: Arc<dyn Session>,
        executor: HandlerExecutor,
        config: &ReceiverConfig,
        collaborators: Collaborators,
    ) -> Self {
        let tracker = SettlementTracker::new(executor.clone());
        let replenisher = CreditReplenisher::bound(
            config.credit_policy(),
            Arc::clone(&link),
            executor.clone(),
            tracker.clone(),
        );
        let settlement = SettleHandle::new(tracker.clone(), replenisher.clone(), executor.clone());
        Self {
            link,
            session,
            executor,
            collaborators,
            reassembler: DeliveryReassembler::new(config.large_message_threshold()),
            tracker,
            replenisher,
            settlement,
            routing: RoutingContext::new(config.duplicate_detection()),
            use_modified: config.use_modified_for_transient_errors(),
            state: ReceiverState::Open,
        }
    }

    /// The link this receiver is bound to.
    #[must_use]
    pub fn link(&self) -> &Arc<dyn Link> { &self.link }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ReceiverState { self.state }

    /// Routing options attached to every handoff.
    #[must_use]
    pub fn routing_context(&self) -> RoutingContext { self.routing }

    /// Deliveries handed to routing and not yet settled.
    #[must_use]
    pub fn pending_settles(&self) -> u32 { self.tracker.pending() }

    /// Large message currently being assembled, if any.
    #[must_use]
    pub fn large_message(&self) -> Option<&LargeMessageAccumulator> { self.reassembler.in_progress() }

    /// Whether a large message is being assembled.
    #[must_use]
    pub fn has_large_message(&self) -> bool { self.large_message().is_some() }

    /// Credit replenisher for this link. Subsystems releasing backpressure
    /// may [`submit`](CreditReplenisher::submit) it from any thread.
    #[must_use]
    pub fn credit_replenisher(&self) -> &CreditReplenisher { &self.replenisher }

    /// Handle for settling deliveries of this receiver.
    #[must_use]
    pub fn settle_handle(&self) -> SettleHandle { self.settlement.clone() }

    /// Handle a transfer event for `delivery`.
    ///
    /// Events for a delivery that is no longer at the head of the link, and
    /// events arriving after close, are ignored.
    ///
    /// # Errors
    ///
    /// Every failure, including a panic in a collaborator, is reported as
    /// [`ReceiverError::InternalProtocol`]. The link is left open.
    pub fn on_message(&mut self, delivery: Arc<dyn Delivery>) -> Result<(), ReceiverError> {
        self.executor.require_on_handler();
        if self.state != ReceiverState::Open {
            debug!(
                "ignoring delivery on closed receiver: link={}, delivery={}",
                self.link.name(),
                delivery.id()
            );
            return Ok(());
        }
        if self.link.current() != Some(delivery.id()) {
            debug!(
                "ignoring stale delivery: link={}, delivery={}",
                self.link.name(),
                delivery.id()
            );
            return Ok(());
        }

        let result = match panic::contain(|| self.process(&delivery)) {
            Ok(result) => result,
            Err(panic) => Err(ReceiverError::from_panic(&panic)),
        };
        if let Err(error) = &result {
            metrics::inc_errors();
            warn!(
                "delivery processing failed: link={}, delivery={}, error={error}",
                self.link.name(),
                delivery.id()
            );
        }
        result
    }

    fn process(&mut self, delivery: &Arc<dyn Delivery>) -> Result<(), ReceiverError> {
        let reassembly = self.reassembler.accept(
            delivery.as_ref(),
            self.link.as_ref(),
            self.collaborators.storage.as_ref(),
            self.collaborators.messages.as_ref(),
        )?;
        match reassembly {
            Reassembly::Pending => {}
            Reassembly::Aborted => self.on_aborted(delivery.as_ref()),
            Reassembly::Complete(message) => {
                let transaction = self.resolve_transaction(delivery.as_ref())?;
                self.hand_off(message, Arc::clone(delivery), transaction)?;
            }
        }
        Ok(())
    }

    fn on_aborted(&self, delivery: &dyn Delivery) {
        // Aborting settles remotely; the slot it consumed is given back
        // unless the sender is draining.
        delivery.settle();
        if !self.link.drain_requested() {
            self.link.flow(1);
        }
        metrics::inc_deliveries(DeliveryOutcome::Aborted);
        debug!(
            "delivery aborted: link={}, delivery={}",
            self.link.name(),
            delivery.id()
        );
    }

    fn resolve_transaction(
        &self,
        delivery: &dyn Delivery,
    ) -> Result<Option<Transaction>, ReassemblyError> {
        let Some(txn_id) = delivery
            .remote_state()
            .and_then(|state| state.txn_id().cloned())
        else {
            return Ok(None);
        };
        self.collaborators
            .transactions
            .lookup(&txn_id, false)
            .map_err(ReassemblyError::Transaction)
    }

    /// Pass a finished message to routing. A delivery routing rejects, or
    /// panics on, is settled here so that its credit is not lost.
    fn hand_off(
        &self,
        message: AssembledMessage,
        delivery: Arc<dyn Delivery>,
        transaction: Option<Transaction>,
    ) -> Result<(), ReceiverError> {
        self.tracker.increment();
        let handoff = Handoff {
            message,
            delivery: Arc::clone(&delivery),
            link: Arc::clone(&self.link),
            transaction,
            context: self.routing,
            settlement: self.settlement.clone(),
        };
        let routing = self.collaborators.routing.as_ref();
        match panic::contain(|| routing.deliver(handoff)) {
            Ok(Ok(())) => {
                metrics::inc_deliveries(DeliveryOutcome::Routed);
                Ok(())
            }
            Ok(Err(error)) => {
                warn!(
                    "routing failed; settling delivery: link={}, delivery={}, error={error}",
                    self.link.name(),
                    delivery.id()
                );
                self.settle_failed(delivery.as_ref(), self.failure_outcome(&error));
                Ok(())
            }
            Err(panic) => {
                let error = ReceiverError::from_panic(&panic);
                self.settle_failed(
                    delivery.as_ref(),
                    Outcome::Rejected {
                        error: Some(error.condition()),
                    },
                );
                Err(error)
            }
        }
    }

    fn settle_failed(&self, delivery: &dyn Delivery, outcome: Outcome) {
        delivery.disposition(outcome);
        self.settlement.settle_on_handler(delivery);
        metrics::inc_deliveries(DeliveryOutcome::Failed);
    }

    fn failure_outcome(&self, error: &RoutingError) -> Outcome {
        if self.use_modified && error.is_transient() {
            Outcome::Modified {
                delivery_failed: true,
                undeliverable_here: false,
            }
        } else {
            Outcome::Rejected {
                error: Some(ErrorCondition::internal(error.to_string())),
            }
        }
    }

    /// The peer granted or changed credit.
    pub fn on_flow(&self, credits: u32, drain: bool) {
        debug!(
            "flow received: link={}, credits={credits}, drain={drain}",
            self.link.name()
        );
        self.flow();
    }

    /// Re-evaluate credit for this link.
    pub fn flow(&self) { self.replenisher.run(); }

    /// Count a delivery accepted into routing outside of
    /// [`on_message`](Self::on_message).
    pub fn increment_settle(&self) { self.tracker.increment(); }

    /// Settle `delivery`, previously counted as pending, and re-evaluate
    /// credit. Must be called on the handler.
    pub fn settle(&self, delivery: &dyn Delivery) { self.settlement.settle_on_handler(delivery); }

    /// Close the receiver: deregister it from its session and discard any
    /// large message in progress. Cleanup failures are logged, never
    /// returned. Closing an already closed receiver does nothing.
    pub fn close(&mut self, remote_initiated: bool) {
        self.executor.require_on_handler();
        if self.state == ReceiverState::Closed {
            return;
        }
        self.state = ReceiverState::Closing;
        self.session.remove_receiver(self.link.as_ref());
        self.clear_large_message();
        self.state = ReceiverState::Closed;
        debug!(
            "receiver closed: link={}, remote_initiated={remote_initiated}",
            self.link.name()
        );
    }

    /// Attach `condition` to the link, then [`close`](Self::close).
    pub fn close_with_error(&mut self, condition: ErrorCondition) {
        self.link.set_condition(condition);
        self.close(false);
    }

    fn clear_large_message(&mut self) {
        let reassembler = &mut self.reassembler;
        if let Err(panic) = panic::contain(|| reassembler.discard()) {
            warn!(
                "large message cleanup panicked: link={}, panic={panic}",
                self.link.name()
            );
        }
    }
}

impl fmt::Debug for ReceiverCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverCore")
            .field("link", &self.link.name())
            .field("state", &self.state)
            .field("pending_settles", &self.tracker.pending())
            .field("large_message", &self.reassembler.in_progress().map(LargeMessageAccumulator::id))
            .field("routing", &self.routing)
            .finish_non_exhaustive()
    }
}
