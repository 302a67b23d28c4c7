//! Test doubles for driving an
//! [`amqp_inbound::ReceiverCore`](amqp_inbound::ReceiverCore) without a
//! protocol engine, storage subsystem or router.
//!
//! ```rust
//! use amqp_inbound::ReceiverConfig;
//! use amqp_inbound_testing::ReceiverHarness;
//!
//! let config = ReceiverConfig::default().with_min_large_message_size(0);
//! let mut harness = ReceiverHarness::new(&config, 10);
//! let delivery = harness.link.begin_delivery();
//! harness.transfer(&delivery, b"hello", false).unwrap();
//! assert_eq!(harness.sink.held_count(), 1);
//! ```

pub mod harness;
pub mod link;
pub mod logging;
pub mod routing;
pub mod storage;

pub use harness::{LINK_NAME, ReceiverHarness};
pub use link::{MockDelivery, MockLink};
pub use logging::{LoggerHandle, logger};
pub use routing::{MapTransactions, RecordingSession, RecordingSink, SinkMode};
pub use storage::{MemorySpool, MemoryStorage, SpoolRecord};
