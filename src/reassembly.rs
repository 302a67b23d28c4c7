//! Delivery state machine turning transfer events into messages.
//!
//! Each event for the delivery at the head of a link is classified, in
//! priority order, as:
//!
//! 1. aborted: any in-progress large message is discarded and the link
//!    advances;
//! 2. partial: a large message is started once the received bytes reach the
//!    threshold, or the new bytes are appended to the one in progress (and
//!    dropped if an earlier append failed);
//!    otherwise the bytes stay with the engine until more arrive;
//! 3. complete: the final bytes either finish the large message (which is
//!    started first if this single event already reaches the threshold) or
//!    are handed to the message factory as one buffer.
//!
//! At most one large message is in progress per link; the slot is an owned
//! `Option`, never shared.

use std::num::NonZeroUsize;

use crate::{
    collaborators::{MessageFactory, Storage},
    error::ReassemblyError,
    large_message::{LargeMessage, LargeMessageAccumulator},
    link::{Delivery, Link},
    message::AssembledMessage,
    metrics,
};

/// Result of feeding one delivery event to the reassembler.
#[derive(Debug)]
pub enum Reassembly {
    /// The sender aborted the delivery; the link has advanced past it.
    Aborted,
    /// More transfers are expected.
    Pending,
    /// The delivery is complete and the link has advanced past it.
    Complete(AssembledMessage),
}

/// Per-link reassembly state.
#[derive(Debug)]
pub struct DeliveryReassembler {
    threshold: Option<NonZeroUsize>,
    current: Option<LargeMessageAccumulator>,
}

impl DeliveryReassembler {
    /// Create a reassembler. `threshold` is the size at which a transfer is
    /// spooled; `None` keeps every message in memory.
    #[must_use]
    pub fn new(threshold: Option<NonZeroUsize>) -> Self {
        Self {
            threshold,
            current: None,
        }
    }

    /// Large message threshold, if spooling is enabled.
    #[must_use]
    pub fn threshold(&self) -> Option<NonZeroUsize> { self.threshold }

    /// Large message currently being assembled.
    #[must_use]
    pub fn in_progress(&self) -> Option<&LargeMessageAccumulator> { self.current.as_ref() }

    /// Process one event for `delivery`, the delivery at the head of `link`.
    ///
    /// # Errors
    ///
    /// Returns the failing collaborator call. When a partial transfer fails,
    /// the large message in progress stays in place so that closing the link
    /// discards it; later partials are dropped and the completing transfer
    /// fails with [`ReassemblyError::Incomplete`].
    pub fn accept(
        &mut self,
        delivery: &dyn Delivery,
        link: &dyn Link,
        storage: &dyn Storage,
        factory: &dyn MessageFactory,
    ) -> Result<Reassembly, ReassemblyError> {
        if delivery.is_aborted() {
            self.discard();
            link.advance();
            return Ok(Reassembly::Aborted);
        }

        if delivery.is_partial() {
            if !storage.is_persistent() {
                return Ok(Reassembly::Pending);
            }
            match self.current.as_mut() {
                Some(accumulator) => accumulator.append(&link.recv())?,
                None => self.start_if_large(delivery, link, storage)?,
            }
            return Ok(Reassembly::Pending);
        }

        if self.current.is_none() && storage.is_persistent() {
            self.start_if_large(delivery, link, storage)?;
        }

        if let Some(sealed) = self.complete_large(link) {
            let message = sealed?;
            metrics::inc_large_messages();
            return Ok(Reassembly::Complete(AssembledMessage::Large(message)));
        }

        let payload = link.recv();
        link.advance();
        let message = factory
            .create_standard_message(delivery, payload)
            .map_err(ReassemblyError::CreateMessage)?;
        Ok(Reassembly::Complete(AssembledMessage::Standard(message)))
    }

    /// Append the final bytes to the large message in progress and seal it.
    ///
    /// The accumulator leaves its slot only once the spool has been written
    /// and flushed, so an unwinding spool leaves it for [`discard`](Self::discard).
    /// A failed completion deletes the spool; the delivery is consumed either
    /// way.
    fn complete_large(&mut self, link: &dyn Link) -> Option<Result<LargeMessage, ReassemblyError>> {
        let accumulator = self.current.as_mut()?;
        let sealed = accumulator
            .append(&link.recv())
            .and_then(|()| accumulator.finish());
        link.advance();
        let accumulator = self.current.take()?;
        Some(match sealed {
            Ok(()) => Ok(accumulator.into_message()),
            Err(error) => {
                accumulator.discard();
                Err(error)
            }
        })
    }

    fn start_if_large(
        &mut self,
        delivery: &dyn Delivery,
        link: &dyn Link,
        storage: &dyn Storage,
    ) -> Result<(), ReassemblyError> {
        let Some(threshold) = self.threshold else {
            return Ok(());
        };
        if delivery.available() >= threshold.get() {
            self.current = Some(LargeMessageAccumulator::start(storage, delivery, link)?);
        }
        Ok(())
    }

    /// Discard the large message in progress, deleting its spool.
    ///
    /// Returns `true` when there was one.
    pub fn discard(&mut self) -> bool {
        match self.current.take() {
            Some(accumulator) => {
                accumulator.discard();
                true
            }
            None => false,
        }
    }
}
