//! In-memory storage collaborator with failure injection.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use amqp_inbound::{
    CollaboratorError,
    LargeMessageAccumulator,
    LargeMessageId,
    Spool,
    Storage,
};

/// What happened to one spool.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpoolRecord {
    /// Bytes appended, in order.
    pub bytes: Vec<u8>,
    /// Number of append calls.
    pub appends: usize,
    /// `finish` was called.
    pub finished: bool,
    /// `delete` succeeded.
    pub deleted: bool,
}

#[derive(Debug, Default)]
struct Faults {
    generate: AtomicBool,
    append: AtomicBool,
    append_panics: AtomicBool,
    finish: AtomicBool,
    delete: AtomicBool,
}

/// Storage keeping spools in memory.
#[derive(Debug)]
pub struct MemoryStorage {
    persistent: bool,
    next_id: AtomicU64,
    spools: Mutex<BTreeMap<LargeMessageId, Arc<Mutex<SpoolRecord>>>>,
    registered: Mutex<Vec<(LargeMessageId, u32)>>,
    faults: Arc<Faults>,
}

impl Default for MemoryStorage {
    fn default() -> Self { Self::persistent() }
}

impl MemoryStorage {
    /// Storage that spools large messages.
    #[must_use]
    pub fn persistent() -> Self {
        Self {
            persistent: true,
            next_id: AtomicU64::new(100),
            spools: Mutex::default(),
            registered: Mutex::default(),
            faults: Arc::default(),
        }
    }

    /// Storage reporting itself as non-persistent.
    #[must_use]
    pub fn non_persistent() -> Self {
        Self {
            persistent: false,
            ..Self::persistent()
        }
    }

    fn spools(&self) -> MutexGuard<'_, BTreeMap<LargeMessageId, Arc<Mutex<SpoolRecord>>>> {
        self.spools.lock().expect("spools poisoned")
    }

    /// Make `generate_id` fail.
    pub fn fail_generate_id(&self, fail: bool) { self.faults.generate.store(fail, Ordering::SeqCst); }

    /// Make spool appends fail.
    pub fn fail_append(&self, fail: bool) { self.faults.append.store(fail, Ordering::SeqCst); }

    /// Make spool appends panic.
    pub fn panic_on_append(&self, panic: bool) { self.faults.append_panics.store(panic, Ordering::SeqCst); }

    /// Make spool `finish` fail.
    pub fn fail_finish(&self, fail: bool) { self.faults.finish.store(fail, Ordering::SeqCst); }

    /// Make spool deletion fail.
    pub fn fail_delete(&self, fail: bool) { self.faults.delete.store(fail, Ordering::SeqCst); }

    /// Number of spools ever opened.
    #[must_use]
    pub fn spool_count(&self) -> usize { self.spools().len() }

    /// Snapshot of the spool for `id`.
    #[must_use]
    pub fn spool(&self, id: LargeMessageId) -> Option<SpoolRecord> {
        self.spools()
            .get(&id)
            .map(|record| record.lock().expect("spool poisoned").clone())
    }

    /// Snapshot of every spool, ordered by id.
    #[must_use]
    pub fn all_spools(&self) -> Vec<(LargeMessageId, SpoolRecord)> {
        self.spools()
            .iter()
            .map(|(id, record)| (*id, record.lock().expect("spool poisoned").clone()))
            .collect()
    }

    /// Large messages registered, with their message format.
    #[must_use]
    pub fn registered(&self) -> Vec<(LargeMessageId, u32)> {
        self.registered.lock().expect("registry poisoned").clone()
    }
}

impl Storage for MemoryStorage {
    fn is_persistent(&self) -> bool { self.persistent }

    fn generate_id(&self) -> Result<LargeMessageId, CollaboratorError> {
        if self.faults.generate.load(Ordering::SeqCst) {
            return Err("id sequence exhausted".into());
        }
        Ok(LargeMessageId::new(
            self.next_id.fetch_add(1, Ordering::SeqCst),
        ))
    }

    fn open_spool(&self, id: LargeMessageId) -> Result<Box<dyn Spool>, CollaboratorError> {
        let record = Arc::new(Mutex::new(SpoolRecord::default()));
        self.spools().insert(id, Arc::clone(&record));
        Ok(Box::new(MemorySpool {
            record,
            faults: Arc::clone(&self.faults),
        }))
    }

    fn register_large_message(
        &self,
        id: LargeMessageId,
        message: &LargeMessageAccumulator,
    ) -> Result<(), CollaboratorError> {
        self.registered
            .lock()
            .expect("registry poisoned")
            .push((id, message.message_format()));
        Ok(())
    }
}

/// Spool writing into a shared [`SpoolRecord`].
#[derive(Debug)]
pub struct MemorySpool {
    record: Arc<Mutex<SpoolRecord>>,
    faults: Arc<Faults>,
}

impl MemorySpool {
    fn record(&self) -> MutexGuard<'_, SpoolRecord> { self.record.lock().expect("spool poisoned") }
}

impl Spool for MemorySpool {
    fn append(&mut self, bytes: &[u8]) -> Result<(), CollaboratorError> {
        if self.faults.append_panics.load(Ordering::SeqCst) {
            panic!("spool write panicked");
        }
        if self.faults.append.load(Ordering::SeqCst) {
            return Err("disk full".into());
        }
        let mut record = self.record();
        assert!(!record.finished, "append after finish");
        record.bytes.extend_from_slice(bytes);
        record.appends += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), CollaboratorError> {
        if self.faults.finish.load(Ordering::SeqCst) {
            return Err("fsync failed".into());
        }
        self.record().finished = true;
        Ok(())
    }

    fn delete(self: Box<Self>) -> Result<(), CollaboratorError> {
        if self.faults.delete.load(Ordering::SeqCst) {
            return Err("permission denied".into());
        }
        self.record().deleted = true;
        Ok(())
    }
}
