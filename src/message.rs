//! Messages produced by the receiver.
//!
//! A transfer ends up either as a [`StandardMessage`] held in memory or as a
//! spooled [`LargeMessage`]. [`AssembledMessage`] lets the routing layer treat
//! both uniformly.

use bytes::Bytes;

use crate::large_message::LargeMessage;

/// In-memory message built from a single receive buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StandardMessage {
    message_format: u32,
    payload: Bytes,
}

impl StandardMessage {
    /// Create a message from its encoded bytes.
    #[must_use]
    pub fn new(message_format: u32, payload: Bytes) -> Self {
        Self {
            message_format,
            payload,
        }
    }

    /// AMQP message-format code.
    #[must_use]
    pub fn message_format(&self) -> u32 { self.message_format }

    /// Encoded message bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }
}

/// A finished message ready for routing.
#[derive(Debug)]
pub enum AssembledMessage {
    /// Built directly from one buffer.
    Standard(StandardMessage),
    /// Assembled through a spool.
    Large(LargeMessage),
}

impl AssembledMessage {
    /// AMQP message-format code.
    #[must_use]
    pub fn message_format(&self) -> u32 {
        match self {
            Self::Standard(message) => message.message_format(),
            Self::Large(message) => message.message_format(),
        }
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            Self::Standard(message) => message.payload().len() as u64,
            Self::Large(message) => message.size(),
        }
    }

    /// Whether the message was spooled.
    #[must_use]
    pub fn is_large(&self) -> bool { matches!(self, Self::Large(_)) }
}

impl From<StandardMessage> for AssembledMessage {
    fn from(message: StandardMessage) -> Self { Self::Standard(message) }
}

impl From<LargeMessage> for AssembledMessage {
    fn from(message: LargeMessage) -> Self { Self::Large(message) }
}
