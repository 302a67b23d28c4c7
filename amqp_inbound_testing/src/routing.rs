//! Routing, transaction and session collaborators that record their calls.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use amqp_inbound::{
    CollaboratorError,
    Handoff,
    Link,
    Outcome,
    RoutingError,
    RoutingSink,
    Session,
    Transaction,
    TransactionLookup,
    TxnId,
};

/// How a [`RecordingSink`] answers `deliver`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SinkMode {
    /// Keep the handoff; the test settles it later.
    #[default]
    Hold,
    /// Settle immediately with the given outcome.
    SettleWith(Outcome),
    /// Fail with a transient error.
    FailTransient,
    /// Fail with a permanent error.
    FailRejected,
}

/// Routing sink storing every handoff it accepts.
#[derive(Debug, Default)]
pub struct RecordingSink {
    mode: Mutex<SinkMode>,
    held: Mutex<Vec<Handoff>>,
    delivered: Mutex<usize>,
}

impl RecordingSink {
    /// Create a sink answering with `mode`.
    #[must_use]
    pub fn with_mode(mode: SinkMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            ..Self::default()
        }
    }

    /// Change how later deliveries are answered.
    pub fn set_mode(&self, mode: SinkMode) { *self.mode.lock().expect("mode poisoned") = mode; }

    fn held(&self) -> MutexGuard<'_, Vec<Handoff>> { self.held.lock().expect("held poisoned") }

    /// Number of `deliver` calls.
    #[must_use]
    pub fn delivered(&self) -> usize { *self.delivered.lock().expect("count poisoned") }

    /// Take the handoffs held so far.
    #[must_use]
    pub fn take(&self) -> Vec<Handoff> { std::mem::take(&mut *self.held()) }

    /// Number of handoffs currently held.
    #[must_use]
    pub fn held_count(&self) -> usize { self.held().len() }
}

impl RoutingSink for RecordingSink {
    fn deliver(&self, handoff: Handoff) -> Result<(), RoutingError> {
        *self.delivered.lock().expect("count poisoned") += 1;
        let mode = self.mode.lock().expect("mode poisoned").clone();
        match mode {
            SinkMode::Hold => {
                self.held().push(handoff);
                Ok(())
            }
            SinkMode::SettleWith(outcome) => {
                let Handoff {
                    delivery,
                    settlement,
                    ..
                } = handoff;
                settlement.settle_with(delivery, outcome);
                Ok(())
            }
            SinkMode::FailTransient => Err(RoutingError::Transient("address paging".into())),
            SinkMode::FailRejected => Err(RoutingError::Rejected("address does not exist".into())),
        }
    }
}

/// Transaction lookup backed by a map, recording each query.
#[derive(Debug, Default)]
pub struct MapTransactions {
    known: Mutex<HashMap<TxnId, Transaction>>,
    queries: Mutex<Vec<(TxnId, bool)>>,
    fail: Mutex<bool>,
}

impl MapTransactions {
    /// Declare a transaction.
    pub fn declare(&self, txn_id: TxnId) {
        self.known
            .lock()
            .expect("transactions poisoned")
            .insert(txn_id.clone(), Transaction::new(txn_id));
    }

    /// Make lookups fail.
    pub fn fail_lookups(&self, fail: bool) { *self.fail.lock().expect("flag poisoned") = fail; }

    /// Queries received as `(txn_id, create_if_missing)`.
    #[must_use]
    pub fn queries(&self) -> Vec<(TxnId, bool)> { self.queries.lock().expect("queries poisoned").clone() }
}

impl TransactionLookup for MapTransactions {
    fn lookup(
        &self,
        txn_id: &TxnId,
        create_if_missing: bool,
    ) -> Result<Option<Transaction>, CollaboratorError> {
        self.queries
            .lock()
            .expect("queries poisoned")
            .push((txn_id.clone(), create_if_missing));
        if *self.fail.lock().expect("flag poisoned") {
            return Err("resource manager unavailable".into());
        }
        let mut known = self.known.lock().expect("transactions poisoned");
        if let Some(transaction) = known.get(txn_id) {
            return Ok(Some(transaction.clone()));
        }
        if create_if_missing {
            let transaction = Transaction::new(txn_id.clone());
            known.insert(txn_id.clone(), transaction.clone());
            return Ok(Some(transaction));
        }
        Ok(None)
    }
}

/// Session recording the links removed from it.
#[derive(Debug, Default)]
pub struct RecordingSession {
    removed: Mutex<Vec<String>>,
}

impl RecordingSession {
    /// Names of links whose receivers were removed.
    #[must_use]
    pub fn removed(&self) -> Vec<String> { self.removed.lock().expect("session poisoned").clone() }
}

impl Session for RecordingSession {
    fn remove_receiver(&self, link: &dyn Link) {
        self.removed
            .lock()
            .expect("session poisoned")
            .push(link.name().to_owned());
    }
}
