//! Spooled assembly of oversized messages.
//!
//! A [`LargeMessageAccumulator`] is created once a transfer reaches the
//! configured large message threshold. From then on every received chunk is
//! appended to a storage-backed [`Spool`] instead of being buffered in memory.
//! When the final transfer arrives the accumulator is finished into an
//! immutable [`LargeMessage`]; on abort or close it is discarded and its
//! spool deleted.

use bytes::Bytes;
use derive_more::{Display, From, Into};
use log::{debug, warn};

use crate::{
    collaborators::{Spool, Storage},
    error::ReassemblyError,
    link::{Delivery, Link},
};

/// Storage-assigned identifier of a large message.
///
/// ```
/// use amqp_inbound::LargeMessageId;
/// let id = LargeMessageId::new(42);
/// assert_eq!(id.get(), 42);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
#[display("{_0}")]
pub struct LargeMessageId(u64);

impl LargeMessageId {
    /// Create a new identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self { Self(value) }

    /// Return the inner numeric identifier.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }
}

/// Descriptor of the AMQP header section in small-ulong encoding.
const HEADER_DESCRIPTOR_SHORT: [u8; 3] = [0x00, 0x53, 0x70];
/// Descriptor of the AMQP header section in full ulong encoding.
const HEADER_DESCRIPTOR_LONG: [u8; 10] = [0x00, 0x80, 0, 0, 0, 0, 0, 0, 0, 0x70];

/// Whether `bytes` start with an AMQP header section.
#[must_use]
pub fn starts_with_header_section(bytes: &[u8]) -> bool {
    bytes.starts_with(&HEADER_DESCRIPTOR_SHORT) || bytes.starts_with(&HEADER_DESCRIPTOR_LONG)
}

/// In-progress large message.
#[derive(Debug)]
pub struct LargeMessageAccumulator {
    id: LargeMessageId,
    message_format: u32,
    header_present: bool,
    size: u64,
    incomplete: bool,
    spool: Box<dyn Spool>,
}

impl LargeMessageAccumulator {
    /// Start a large message for the delivery at the head of `link`.
    ///
    /// Allocates an id, opens the spool, inspects the bytes already received
    /// for a header section, registers the message with storage and appends
    /// those same bytes.
    ///
    /// # Errors
    ///
    /// Returns the failing storage call. Any spool opened before the failure
    /// is deleted.
    pub fn start(
        storage: &dyn Storage,
        delivery: &dyn Delivery,
        link: &dyn Link,
    ) -> Result<Self, ReassemblyError> {
        let id = storage.generate_id().map_err(ReassemblyError::GenerateId)?;
        let spool = storage
            .open_spool(id)
            .map_err(|source| ReassemblyError::OpenSpool { id, source })?;
        let mut accumulator = Self {
            id,
            message_format: delivery.message_format(),
            header_present: false,
            size: 0,
            incomplete: false,
            spool,
        };

        let initial = link.recv();
        accumulator.parse_header(&initial);

        if let Err(source) = storage.register_large_message(id, &accumulator) {
            accumulator.discard();
            return Err(ReassemblyError::Register { id, source });
        }
        if let Err(error) = accumulator.append(&initial) {
            accumulator.discard();
            return Err(error);
        }
        debug!(
            "large message started: id={id}, format={}, initial_bytes={}",
            accumulator.message_format,
            initial.len()
        );
        Ok(accumulator)
    }

    fn parse_header(&mut self, initial: &Bytes) {
        self.header_present = starts_with_header_section(initial);
    }

    /// Storage identifier.
    #[must_use]
    pub fn id(&self) -> LargeMessageId { self.id }

    /// AMQP message-format code of the delivery.
    #[must_use]
    pub fn message_format(&self) -> u32 { self.message_format }

    /// Bytes appended so far.
    #[must_use]
    pub fn size(&self) -> u64 { self.size }

    /// Whether the message begins with an AMQP header section.
    #[must_use]
    pub fn header_present(&self) -> bool { self.header_present }

    /// Whether a chunk was lost because a spool write failed.
    #[must_use]
    pub fn is_incomplete(&self) -> bool { self.incomplete }

    /// Append a received chunk. Empty chunks are ignored, as is everything
    /// received after a failed write.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError::Append`] when the spool write fails. The
    /// accumulator is then marked incomplete and can no longer be finished.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), ReassemblyError> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.incomplete {
            debug!(
                "dropping bytes for incomplete large message: id={}, bytes={}",
                self.id,
                bytes.len()
            );
            return Ok(());
        }
        if let Err(source) = self.spool.append(bytes) {
            self.incomplete = true;
            return Err(ReassemblyError::Append {
                id: self.id,
                source,
            });
        }
        self.size = self.size.saturating_add(bytes.len() as u64);
        Ok(())
    }

    /// Flush the spool and release held resources. On success the
    /// accumulator is ready for [`into_message`](Self::into_message).
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError::Incomplete`] when an earlier append failed,
    /// and [`ReassemblyError::Finish`] when the spool cannot be flushed. The
    /// caller still owns the accumulator and should discard it.
    pub fn finish(&mut self) -> Result<(), ReassemblyError> {
        if self.incomplete {
            return Err(ReassemblyError::Incomplete { id: self.id });
        }
        self.spool
            .finish()
            .map_err(|source| ReassemblyError::Finish {
                id: self.id,
                source,
            })?;
        debug!("large message finished: id={}, size={}", self.id, self.size);
        Ok(())
    }

    /// Seal a finished accumulator into an immutable message.
    #[must_use]
    pub fn into_message(self) -> LargeMessage {
        LargeMessage {
            id: self.id,
            message_format: self.message_format,
            header_present: self.header_present,
            size: self.size,
            spool: self.spool,
        }
    }

    /// Drop the message and delete its spool.
    ///
    /// Deletion is best effort: failures are logged and swallowed.
    pub fn discard(self) {
        let id = self.id;
        if let Err(error) = self.spool.delete() {
            warn!("failed to delete large message spool: id={id}, error={error}");
        } else {
            debug!("large message discarded: id={id}");
        }
    }
}

/// A fully spooled, immutable message.
#[derive(Debug)]
pub struct LargeMessage {
    id: LargeMessageId,
    message_format: u32,
    header_present: bool,
    size: u64,
    spool: Box<dyn Spool>,
}

impl LargeMessage {
    /// Storage identifier.
    #[must_use]
    pub fn id(&self) -> LargeMessageId { self.id }

    /// AMQP message-format code of the delivery.
    #[must_use]
    pub fn message_format(&self) -> u32 { self.message_format }

    /// Total bytes spooled.
    #[must_use]
    pub fn size(&self) -> u64 { self.size }

    /// Whether the message begins with an AMQP header section.
    #[must_use]
    pub fn header_present(&self) -> bool { self.header_present }

    /// Hand the sealed spool to the caller, for example to delete it once the
    /// message has been consumed.
    #[must_use]
    pub fn into_spool(self) -> Box<dyn Spool> { self.spool }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::starts_with_header_section;

    #[rstest]
    #[case(&[0x00, 0x53, 0x70, 0xc0, 0x02, 0x01, 0x41], true)]
    #[case(&[0x00, 0x80, 0, 0, 0, 0, 0, 0, 0, 0x70, 0x45], true)]
    #[case(&[0x00, 0x53, 0x75, 0xa0, 0x01, 0x61], false)]
    #[case(&[0x00, 0x53], false)]
    #[case(&[], false)]
    fn detects_header_section(#[case] bytes: &[u8], #[case] expected: bool) {
        assert_eq!(starts_with_header_section(bytes), expected);
    }
}
