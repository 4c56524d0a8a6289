//! Repository trait for the transaction log
//!
//! The pipeline and the lifecycle coordinator only talk to
//! [`TransactionStore`], so tests can substitute an in-memory store and the
//! SQLite backend stays an implementation detail.

use async_trait::async_trait;

use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::models::{StoredTransaction, TransactionRecord};

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Append one record.
    ///
    /// On a connection failure the store reconnects before returning the
    /// error; the record itself is not retried.
    async fn insert_one(&self, record: &TransactionRecord) -> Result<(), StoreError>;

    /// Append all records in one transaction (all or nothing).
    ///
    /// Returns the number of rows written.
    async fn insert_batch(&self, records: &[TransactionRecord]) -> Result<usize, StoreError>;

    /// Records where `identity` is receiver or sender (case-insensitive),
    /// newest first. `page` is 1-indexed; a page past the end is empty.
    async fn query_by_identity(
        &self,
        identity: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<StoredTransaction>, StoreError>;

    /// Number of records involving `identity`, ignoring paging
    async fn count_by_identity(&self, identity: &str) -> Result<u64, StoreError>;

    /// Whether the current connection is usable
    fn is_healthy(&self) -> bool;

    /// Close the current connection and open the one described by `storage`
    async fn reopen(&self, storage: &StorageConfig) -> Result<(), StoreError>;

    /// Final checkpoint and close. Errors are logged, not raised.
    async fn close(&self);
}

/// Row offset for a 1-indexed page
pub fn page_offset(page: u32, page_size: u32) -> Result<u64, StoreError> {
    if page == 0 || page_size == 0 {
        return Err(StoreError::InvalidPage);
    }
    Ok((page as u64 - 1) * page_size as u64)
}
