#![cfg(feature = "metrics")]
//! Tests for `amqp_inbound` metrics.
//!
//! These drive a receiver under `metrics_util::debugging::DebuggingRecorder`
//! and check the counters it records.
use amqp_inbound::{
    ReceiverError,
    metrics::{CREDIT_GRANTED, DELIVERIES, ERRORS_TOTAL, LARGE_MESSAGES},
};
use amqp_inbound_testing::ReceiverHarness;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use rstest::rstest;

mod common;
use common::{TestResult, harness, payload};

/// Creates a debugging recorder and snapshotter for metrics testing.
fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

fn counter(snapshotter: &Snapshotter, name: &str, label: Option<(&str, &str)>) -> Option<u64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find_map(|(key, _, _, value)| {
            let matches_label = label.is_none_or(|(k, v)| {
                key.key()
                    .labels()
                    .any(|l| l.key() == k && l.value() == v)
            });
            match value {
                DebugValue::Counter(c) if key.key().name() == name && matches_label => Some(c),
                _ => None,
            }
        })
}

#[rstest]
fn credit_grants_are_counted(harness: ReceiverHarness) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    harness.link.set_credit(10);

    metrics::with_local_recorder(&recorder, || harness.on_flow(10, false));

    assert_eq!(counter(&snapshotter, CREDIT_GRANTED, None), Some(90));
}

#[rstest]
#[case::routed(false, "routed")]
#[case::aborted(true, "aborted")]
fn deliveries_are_counted_by_outcome(
    mut harness: ReceiverHarness,
    #[case] abort: bool,
    #[case] outcome: &str,
) -> TestResult {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let delivery = harness.link.begin_delivery();

    metrics::with_local_recorder(&recorder, || {
        if abort {
            harness.link.abort();
            harness.on_message(&delivery)
        } else {
            harness.transfer(&delivery, b"payload", false)
        }
    })?;

    assert_eq!(
        counter(&snapshotter, DELIVERIES, Some(("outcome", outcome))),
        Some(1)
    );
    Ok(())
}

#[rstest]
fn spooled_messages_are_counted(mut harness: ReceiverHarness) -> TestResult {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let delivery = harness.link.begin_delivery();

    metrics::with_local_recorder(&recorder, || -> Result<(), ReceiverError> {
        harness.transfer(&delivery, &payload(1200), true)?;
        harness.transfer(&delivery, &payload(10), false)
    })?;

    assert_eq!(counter(&snapshotter, LARGE_MESSAGES, None), Some(1));
    Ok(())
}

#[rstest]
fn internal_errors_are_counted(mut harness: ReceiverHarness) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    harness.storage.fail_generate_id(true);
    let delivery = harness.link.begin_delivery();

    let result = metrics::with_local_recorder(&recorder, || {
        harness.transfer(&delivery, &payload(1200), true)
    });

    assert!(result.is_err());
    assert_eq!(counter(&snapshotter, ERRORS_TOTAL, None), Some(1));
}
