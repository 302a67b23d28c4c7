#![doc(html_root_url = "https://docs.rs/amqp_inbound/latest")]
//! Receiving side of an AMQP 1.0 style message-transfer link.
//!
//! This crate accepts already-decoded transfer events for one link, keeps the
//! remote sender supplied with credit, reassembles messages that arrive over
//! several partial transfers (spooling large ones through a storage
//! collaborator) and hands finished messages to a routing layer together with
//! their optional transaction.
//!
//! All receiver state is owned by a single handler per connection. The
//! [`executor::HandlerExecutor`] tracks that handler and lets other threads
//! queue work onto it.

pub mod collaborators;
pub mod config;
pub mod credit;
pub mod error;
pub mod executor;
pub mod large_message;
pub mod link;
pub mod message;
pub mod metrics;
pub mod panic;
pub mod reassembly;
pub mod receiver;
pub mod settlement;

pub use collaborators::{
    DefaultMessageFactory,
    Handoff,
    MessageFactory,
    NullStorage,
    RoutingContext,
    RoutingSink,
    Session,
    Spool,
    Storage,
    Transaction,
    TransactionLookup,
};
pub use config::{CreditPolicy, ReceiverConfig};
pub use credit::{CreditReplenisher, calculated_top_up, is_below_threshold};
pub use error::{CollaboratorError, ErrorCondition, ReassemblyError, ReceiverError, RoutingError};
pub use executor::{HandlerExecutor, HandlerId, HandlerLoop};
pub use large_message::{LargeMessage, LargeMessageAccumulator, LargeMessageId};
pub use link::{Delivery, DeliveryId, DeliveryState, Link, Outcome, TransactionalState, TxnId};
pub use message::{AssembledMessage, StandardMessage};
pub use reassembly::{DeliveryReassembler, Reassembly};
pub use receiver::{Collaborators, ReceiverCore, ReceiverState};
pub use settlement::{SettleHandle, SettlementTracker};
