//! Unit tests for handler affinity and task queueing.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use rstest::rstest;

use super::HandlerExecutor;

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (Arc::clone(&count), count)
}

#[rstest]
fn not_on_handler_outside_scope() {
    let (executor, _handler) = HandlerExecutor::pair();
    assert!(!executor.is_handler());
    assert!(executor.enter(|| executor.is_handler()));
}

#[rstest]
fn handlers_do_not_share_identity() {
    let (first, _first_loop) = HandlerExecutor::pair();
    let (second, _second_loop) = HandlerExecutor::pair();
    assert_ne!(first.id(), second.id());
    assert!(!first.enter(|| second.is_handler()));
}

#[rstest]
fn run_now_executes_inline_on_handler() {
    let (executor, mut handler) = HandlerExecutor::pair();
    let (seen, count) = counter();
    executor.enter(|| {
        executor.run_now(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    });
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(handler.run_pending(), 0);
}

#[rstest]
fn run_later_defers_even_on_handler() {
    let (executor, mut handler) = HandlerExecutor::pair();
    let (seen, count) = counter();
    executor.enter(|| {
        executor.run_later(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    });
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(handler.run_pending(), 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[rstest]
fn queued_tasks_run_as_handler() {
    let (executor, mut handler) = HandlerExecutor::pair();
    let (seen, count) = counter();
    let observer = executor.clone();
    executor.run_later(move || {
        if observer.is_handler() {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });
    handler.run_pending();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[rstest]
fn tasks_queued_while_draining_also_run() {
    let (executor, mut handler) = HandlerExecutor::pair();
    let (seen, count) = counter();
    let requeue = executor.clone();
    executor.run_later(move || {
        requeue.run_later(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    });
    assert_eq!(handler.run_pending(), 2);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[rstest]
fn queued_from_another_thread() {
    let (executor, mut handler) = HandlerExecutor::pair();
    let (seen, count) = counter();
    let remote = executor.clone();
    std::thread::spawn(move || {
        remote.run_now(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    })
    .join()
    .expect("producer thread");
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(handler.run_pending(), 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[rstest]
fn flush_invokes_hook_and_counts() {
    let (seen, count) = counter();
    let (executor, _handler) = HandlerExecutor::with_flush_hook(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    executor.enter(|| {
        executor.flush_now();
        executor.flush_now();
    });
    assert_eq!(executor.flush_count(), 2);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[cfg(debug_assertions)]
#[rstest]
#[should_panic(expected = "must be called from handler-")]
fn affinity_violation_panics_in_debug() {
    let (executor, _handler) = HandlerExecutor::pair();
    executor.require_on_handler();
}

#[rstest]
fn tasks_after_loop_drop_are_discarded() {
    let (executor, handler) = HandlerExecutor::pair();
    drop(handler);
    executor.run_later(|| panic!("task must not run"));
}

#[tokio::test]
async fn async_loop_drains_until_executors_drop() {
    let (executor, handler) = HandlerExecutor::pair();
    let (seen, count) = counter();
    for _ in 0..3 {
        let seen = Arc::clone(&seen);
        executor.run_later(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    }
    drop(seen);
    drop(executor);
    handler.run().await;
    assert_eq!(count.load(Ordering::SeqCst), 3);
}
