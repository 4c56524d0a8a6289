//! In-memory [`TransactionStore`] for tests: records every write, can be
//! told to fail batches, and can hold batch submissions at a gate.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Semaphore;

use super::repository::{TransactionStore, page_offset};
use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::models::{StoredTransaction, TransactionRecord};

pub(crate) struct MemoryStore {
    rows: Mutex<Vec<StoredTransaction>>,
    batch_sizes: Mutex<Vec<usize>>,
    single_writes: AtomicUsize,
    fail_batches: AtomicBool,
    fail_singles: AtomicBool,
    gate: Semaphore,
    reopen_gate: Semaphore,
    reopens_started: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::with_permits(Semaphore::MAX_PERMITS, Semaphore::MAX_PERMITS)
    }

    /// Batch submissions block until [`MemoryStore::open_gate`] is called
    pub(crate) fn gated() -> Self {
        Self::with_permits(0, Semaphore::MAX_PERMITS)
    }

    /// Reopens block until [`MemoryStore::open_reopen_gate`] is called
    pub(crate) fn reopen_gated() -> Self {
        Self::with_permits(Semaphore::MAX_PERMITS, 0)
    }

    fn with_permits(permits: usize, reopen_permits: usize) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            batch_sizes: Mutex::new(Vec::new()),
            single_writes: AtomicUsize::new(0),
            fail_batches: AtomicBool::new(false),
            fail_singles: AtomicBool::new(false),
            gate: Semaphore::new(permits),
            reopen_gate: Semaphore::new(reopen_permits),
            reopens_started: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn open_gate(&self) {
        self.gate.add_permits(1024);
    }

    pub(crate) fn open_reopen_gate(&self) {
        self.reopen_gate.add_permits(1024);
    }

    pub(crate) fn reopens_started(&self) -> usize {
        self.reopens_started.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_singles(&self, fail: bool) {
        self.fail_singles.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn records(&self) -> Vec<TransactionRecord> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.record.clone())
            .collect()
    }

    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub(crate) fn single_writes(&self) -> usize {
        self.single_writes.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn append(&self, record: &TransactionRecord) {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.len() as i64 + 1;
        rows.push(StoredTransaction {
            id,
            record: record.clone(),
        });
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert_one(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        if self.fail_singles.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        self.single_writes.fetch_add(1, Ordering::SeqCst);
        self.append(record);
        Ok(())
    }

    async fn insert_batch(&self, records: &[TransactionRecord]) -> Result<usize, StoreError> {
        let _permit = self.gate.acquire().await.expect("gate closed");
        self.batch_sizes.lock().unwrap().push(records.len());
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        for record in records {
            self.append(record);
        }
        Ok(records.len())
    }

    async fn query_by_identity(
        &self,
        identity: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<StoredTransaction>, StoreError> {
        let offset = page_offset(page, page_size)? as usize;
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .rev()
            .filter(|t| t.record.involves(identity))
            .skip(offset)
            .take(page_size as usize)
            .cloned()
            .collect())
    }

    async fn count_by_identity(&self, identity: &str) -> Result<u64, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().filter(|t| t.record.involves(identity)).count() as u64)
    }

    fn is_healthy(&self) -> bool {
        !self.is_closed()
    }

    async fn reopen(&self, _storage: &StorageConfig) -> Result<(), StoreError> {
        self.reopens_started.fetch_add(1, Ordering::SeqCst);
        let _permit = self.reopen_gate.acquire().await.expect("reopen gate closed");
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
