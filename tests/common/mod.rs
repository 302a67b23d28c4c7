//! Shared utilities for integration tests.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use amqp_inbound::ReceiverConfig;
use amqp_inbound_testing::ReceiverHarness;
use rstest::fixture;

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Large message threshold used by most tests.
pub const THRESHOLD: i32 = 1000;

/// Configuration with a 1000 byte large message threshold.
pub fn spooling_config() -> ReceiverConfig {
    ReceiverConfig::default()
        .with_refill_credits(100)
        .with_low_credit_threshold(20)
        .with_min_large_message_size(THRESHOLD)
}

/// Harness spooling messages of 1000 bytes or more, link credit 100.
#[fixture]
pub fn harness() -> ReceiverHarness { ReceiverHarness::new(&spooling_config(), 100) }

/// Harness with large message handling disabled, link credit 100.
#[fixture]
pub fn in_memory_harness() -> ReceiverHarness {
    ReceiverHarness::new(&spooling_config().with_min_large_message_size(0), 100)
}

/// `len` bytes of a repeating pattern.
pub fn payload(len: usize) -> Vec<u8> { (0..len).map(|i| (i % 251) as u8).collect() }
