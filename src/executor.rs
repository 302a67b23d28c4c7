//! Single-handler execution for per-connection state.
//!
//! Every connection owns one logical handler. Receiver state is only touched
//! while code runs "on" that handler, which is checked by assertion rather
//! than guarded by a lock. Work originating elsewhere, such as a storage
//! subsystem releasing backpressure, is queued onto the handler through a
//! [`HandlerExecutor`] and executed by the matching [`HandlerLoop`].
//!
//! Handler identity is tracked with a Tokio task-local scoped around each
//! task the loop runs, and around closures passed to
//! [`HandlerExecutor::enter`].

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use derive_more::Display;
use log::debug;
use tokio::sync::mpsc;

tokio::task_local! {
    static CURRENT_HANDLER: HandlerId;
}

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one connection handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[display("handler-{_0}")]
pub struct HandlerId(u64);

impl HandlerId {
    fn next() -> Self { Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed)) }

    /// Return the inner numeric identifier.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }
}

/// Unit of work queued onto a handler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Callback invoked by [`HandlerExecutor::flush_now`] to push pending
/// protocol state to the peer.
pub type FlushHook = Arc<dyn Fn() + Send + Sync + 'static>;

struct ExecutorInner {
    id: HandlerId,
    queue: mpsc::UnboundedSender<Task>,
    flush: Option<FlushHook>,
    flushes: AtomicU64,
}

/// Cloneable handle for scheduling work on a connection handler.
///
/// # Examples
///
/// ```
/// use std::sync::{
///     Arc,
///     atomic::{AtomicUsize, Ordering},
/// };
///
/// use amqp_inbound::HandlerExecutor;
///
/// let (executor, mut handler) = HandlerExecutor::pair();
/// let ran = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&ran);
/// executor.run_now(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
/// // Not on the handler, so the task was queued.
/// assert_eq!(ran.load(Ordering::SeqCst), 0);
///
/// assert_eq!(handler.run_pending(), 1);
/// assert_eq!(ran.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct HandlerExecutor {
    inner: Arc<ExecutorInner>,
}

impl HandlerExecutor {
    /// Create an executor and the loop that drives its queue.
    #[must_use]
    pub fn pair() -> (Self, HandlerLoop) { Self::build(None) }

    /// Create an executor whose [`flush_now`](Self::flush_now) invokes `hook`.
    #[must_use]
    pub fn with_flush_hook(hook: impl Fn() + Send + Sync + 'static) -> (Self, HandlerLoop) {
        Self::build(Some(Arc::new(hook)))
    }

    fn build(flush: Option<FlushHook>) -> (Self, HandlerLoop) {
        let id = HandlerId::next();
        let (queue, tasks) = mpsc::unbounded_channel();
        let executor = Self {
            inner: Arc::new(ExecutorInner {
                id,
                queue,
                flush,
                flushes: AtomicU64::new(0),
            }),
        };
        (executor, HandlerLoop { id, tasks })
    }

    /// Identity of the handler this executor schedules onto.
    #[must_use]
    pub fn id(&self) -> HandlerId { self.inner.id }

    /// Whether the caller is currently running on this handler.
    #[must_use]
    pub fn is_handler(&self) -> bool {
        CURRENT_HANDLER
            .try_with(|current| *current == self.inner.id)
            .unwrap_or(false)
    }

    /// Assert that the caller is running on this handler.
    ///
    /// Violations are programming errors and panic in debug builds.
    #[track_caller]
    pub fn require_on_handler(&self) {
        debug_assert!(
            self.is_handler(),
            "must be called from {}",
            self.inner.id
        );
    }

    /// Run `task` immediately when on the handler, otherwise queue it.
    pub fn run_now(&self, task: impl FnOnce() + Send + 'static) {
        if self.is_handler() {
            task();
        } else {
            self.run_later(task);
        }
    }

    /// Queue `task` to run on the handler after the current work.
    pub fn run_later(&self, task: impl FnOnce() + Send + 'static) {
        if self.inner.queue.send(Box::new(task)).is_err() {
            debug!("handler loop stopped; dropping task: handler={}", self.inner.id);
        }
    }

    /// Run `f` as the handler.
    ///
    /// Connection drivers call this when dispatching engine events; tests use
    /// it to act as the handler without a running loop.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R { CURRENT_HANDLER.sync_scope(self.inner.id, f) }

    /// Flush outbound protocol state without batching delay.
    pub fn flush_now(&self) {
        self.require_on_handler();
        self.inner.flushes.fetch_add(1, Ordering::Relaxed);
        if let Some(hook) = &self.inner.flush {
            hook();
        }
    }

    /// Number of flushes requested so far.
    #[must_use]
    pub fn flush_count(&self) -> u64 { self.inner.flushes.load(Ordering::Relaxed) }
}

/// Receiving side of a handler's task queue.
pub struct HandlerLoop {
    id: HandlerId,
    tasks: mpsc::UnboundedReceiver<Task>,
}

impl HandlerLoop {
    /// Identity of the handler this loop drives.
    #[must_use]
    pub fn id(&self) -> HandlerId { self.id }

    /// Run every queued task, including tasks queued while draining.
    ///
    /// Returns the number of tasks executed.
    pub fn run_pending(&mut self) -> usize {
        let tasks = &mut self.tasks;
        CURRENT_HANDLER.sync_scope(self.id, || {
            let mut executed = 0;
            while let Ok(task) = tasks.try_recv() {
                task();
                executed += 1;
            }
            executed
        })
    }

    /// Drive queued tasks until every [`HandlerExecutor`] clone is dropped.
    pub async fn run(mut self) {
        while let Some(task) = self.tasks.recv().await {
            CURRENT_HANDLER.sync_scope(self.id, task);
        }
        debug!("handler loop finished: handler={}", self.id);
    }
}

#[cfg(test)]
mod tests;
