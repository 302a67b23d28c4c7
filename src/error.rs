//! Canonical error types for the receiver.
//!
//! Collaborator calls fail with a boxed [`CollaboratorError`]. The reassembly
//! path wraps those in [`ReassemblyError`] so the failing call can be named,
//! and [`ReceiverCore::on_message`](crate::receiver::ReceiverCore::on_message)
//! normalises everything, panics included, into
//! [`ReceiverError::InternalProtocol`] before it leaves the crate.

use std::fmt;

use thiserror::Error;

use crate::{large_message::LargeMessageId, panic::PanicMessage};

/// Error type returned by every collaborator trait method.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// AMQP condition symbol for unexpected internal failures.
pub const INTERNAL_ERROR: &str = "amqp:internal-error";

/// Error condition attached to a link, or carried by a rejected outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorCondition {
    condition: String,
    description: Option<String>,
}

impl ErrorCondition {
    /// Create a condition with the given symbol and optional description.
    #[must_use]
    pub fn new(condition: impl Into<String>, description: Option<String>) -> Self {
        Self {
            condition: condition.into(),
            description,
        }
    }

    /// Build an `amqp:internal-error` condition with a description.
    #[must_use]
    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, Some(description.into()))
    }

    /// Condition symbol, for example `amqp:internal-error`.
    #[must_use]
    pub fn condition(&self) -> &str { &self.condition }

    /// Human readable description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> { self.description.as_deref() }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {description}", self.condition),
            None => f.write_str(&self.condition),
        }
    }
}

/// Failures raised while turning transfer events into a message.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReassemblyError {
    /// Storage could not allocate an identifier for a large message.
    #[error("failed to generate large message id: {0}")]
    GenerateId(#[source] CollaboratorError),
    /// Storage could not open a spool for a large message.
    #[error("failed to open spool for large message {id}: {source}")]
    OpenSpool {
        /// Identifier of the message being spooled.
        id: LargeMessageId,
        /// Underlying storage failure.
        #[source]
        source: CollaboratorError,
    },
    /// Storage refused to register a new large message.
    #[error("failed to register large message {id}: {source}")]
    Register {
        /// Identifier of the message being registered.
        id: LargeMessageId,
        /// Underlying storage failure.
        #[source]
        source: CollaboratorError,
    },
    /// Appending bytes to a spool failed.
    #[error("failed to append to large message {id}: {source}")]
    Append {
        /// Identifier of the message being spooled.
        id: LargeMessageId,
        /// Underlying storage failure.
        #[source]
        source: CollaboratorError,
    },
    /// A spool write failed earlier, so the spooled body has a gap.
    #[error("large message {id} is missing data after a failed append")]
    Incomplete {
        /// Identifier of the damaged message.
        id: LargeMessageId,
    },
    /// Flushing and releasing a spool failed.
    #[error("failed to finish large message {id}: {source}")]
    Finish {
        /// Identifier of the message being finished.
        id: LargeMessageId,
        /// Underlying storage failure.
        #[source]
        source: CollaboratorError,
    },
    /// The message factory rejected the received bytes.
    #[error("failed to create message: {0}")]
    CreateMessage(#[source] CollaboratorError),
    /// Transaction lookup failed.
    #[error("failed to look up transaction: {0}")]
    Transaction(#[source] CollaboratorError),
}

/// Error reported by a [`RoutingSink`](crate::collaborators::RoutingSink).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RoutingError {
    /// A temporary condition; redelivery may succeed.
    #[error("transient routing failure: {0}")]
    Transient(#[source] CollaboratorError),
    /// The message cannot be routed.
    #[error("routing rejected message: {0}")]
    Rejected(#[source] CollaboratorError),
}

impl RoutingError {
    /// Whether the failure is temporary.
    #[must_use]
    pub fn is_transient(&self) -> bool { matches!(self, Self::Transient(_)) }
}

/// The single error kind that leaves the receiver's delivery handler.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReceiverError {
    /// Any unexpected failure while processing a delivery.
    #[error("internal protocol error: {message}")]
    InternalProtocol {
        /// Description taken from the original failure.
        message: String,
        /// The original failure, when one was available.
        #[source]
        source: Option<CollaboratorError>,
    },
}

impl ReceiverError {
    /// Wrap an arbitrary failure, keeping its message and cause.
    #[must_use]
    pub fn internal<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::InternalProtocol {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    /// Wrap a panic payload raised by a collaborator.
    #[must_use]
    pub fn from_panic(panic: &PanicMessage) -> Self {
        Self::InternalProtocol {
            message: format!("panic while processing delivery: {panic}"),
            source: None,
        }
    }

    /// Condition to report to the remote peer.
    #[must_use]
    pub fn condition(&self) -> ErrorCondition {
        match self {
            Self::InternalProtocol { message, .. } => ErrorCondition::internal(message.clone()),
        }
    }
}

impl From<ReassemblyError> for ReceiverError {
    fn from(error: ReassemblyError) -> Self { Self::internal(error) }
}
