//! SQLite-backed transaction log
//!
//! Connection discipline:
//! - every operation holds the read side of `conn` for its whole duration,
//!   so lookups and counts run concurrently against a stable pool;
//! - writes additionally serialize on `writer` (SQLite is single-writer),
//!   always acquired after the read side;
//! - replacing the pool (reconnect, reopen, close) takes the write side and
//!   therefore waits for in-flight operations to finish.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Executor, Sqlite};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::repository::{TransactionStore, page_offset};
use super::schema;
use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::models::{StoredTransaction, TransactionRecord};

/// Readers share the pool; one extra connection for the serialized writer
const MAX_CONNECTIONS: u32 = 8;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Current connection state, replaced as a whole under the write lock
struct Connection {
    path: PathBuf,
    pool: Option<SqlitePool>,
    /// Bumped on every replacement so concurrent failures reconnect once
    generation: u64,
}

impl Connection {
    fn pool(&self) -> Result<&SqlitePool, StoreError> {
        self.pool.as_ref().ok_or(StoreError::Unavailable)
    }
}

pub struct SqliteStore {
    conn: RwLock<Connection>,
    writer: Mutex<()>,
    healthy: AtomicBool,
    /// Set by `close`; a closed store reports `Unavailable` without reconnecting
    closed: AtomicBool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    ///
    /// Failure here is fatal for the caller: nothing is left half-open.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let pool = open_pool(&path).await?;

        tracing::info!(path = %path.display(), "SQLite transaction log opened");

        Ok(Self {
            conn: RwLock::new(Connection {
                path,
                pool: Some(pool),
                generation: 0,
            }),
            writer: Mutex::new(()),
            healthy: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        })
    }

    pub async fn path(&self) -> PathBuf {
        self.conn.read().await.path.clone()
    }

    /// Log a failed operation and run the reconnection procedure if the
    /// failure is about the connection.
    async fn settle<T>(
        &self,
        op: &'static str,
        identity: &str,
        generation: u64,
        result: Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if let Err(e) = &result {
            tracing::error!(op, identity, error = %e, "Store operation failed");
            if e.is_connection_failure() && !self.closed.load(Ordering::SeqCst) {
                self.reconnect(generation).await;
            }
        }
        result
    }

    /// Close the current pool (errors ignored), open a fresh one and
    /// re-apply the schema. Not retried; the next failing operation will
    /// trigger another attempt.
    async fn reconnect(&self, observed_generation: u64) {
        let mut conn = self.conn.write().await;
        if conn.generation != observed_generation {
            // Someone else already replaced the connection we failed on
            return;
        }

        tracing::warn!(path = %conn.path.display(), "Attempting to reconnect to database...");
        self.healthy.store(false, Ordering::SeqCst);

        if let Some(pool) = conn.pool.take() {
            pool.close().await;
        }
        conn.generation += 1;

        match open_pool(&conn.path).await {
            Ok(pool) => {
                conn.pool = Some(pool);
                self.healthy.store(true, Ordering::SeqCst);
                tracing::info!("Database reconnection successful");
            }
            Err(e) => {
                tracing::error!(error = %e, "Database reconnection failed");
            }
        }
    }

    /// Close the pool underneath the store, as a crashed connection would.
    #[cfg(test)]
    pub(crate) async fn break_connection(&self) {
        if let Some(pool) = self.conn.read().await.pool.as_ref() {
            pool.close().await;
        }
    }
}

#[async_trait]
impl TransactionStore for SqliteStore {
    async fn insert_one(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let conn = self.conn.read().await;
        let generation = conn.generation;
        let result = async {
            let pool = conn.pool()?;
            let _writer = self.writer.lock().await;
            insert_record(pool, record).await?;
            Ok::<_, StoreError>(())
        }
        .await;
        drop(conn);

        self.settle("insert_one", record.receiver(), generation, result)
            .await
    }

    async fn insert_batch(&self, records: &[TransactionRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.read().await;
        let generation = conn.generation;
        let result = async {
            let pool = conn.pool()?;
            let _writer = self.writer.lock().await;

            let mut tx = pool.begin().await?;
            let written: Result<(), sqlx::Error> = async {
                for record in records {
                    insert_record(&mut *tx, record).await?;
                }
                Ok(())
            }
            .await;

            match written {
                Ok(()) => {
                    tx.commit().await?;
                    Ok::<_, StoreError>(records.len())
                }
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        tracing::error!("Failed to rollback batch: {}", rollback);
                    }
                    Err(StoreError::from(e))
                }
            }
        }
        .await;
        drop(conn);

        match &result {
            Ok(n) => tracing::debug!(count = n, "Batch inserted transactions"),
            Err(_) => tracing::error!(size = records.len(), "Batch insert rolled back"),
        }

        let identity = records.first().map(|r| r.receiver()).unwrap_or_default();
        self.settle("insert_batch", identity, generation, result)
            .await
    }

    async fn query_by_identity(
        &self,
        identity: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<StoredTransaction>, StoreError> {
        let offset = page_offset(page, page_size)?;

        let conn = self.conn.read().await;
        let generation = conn.generation;
        let result = async {
            let pool = conn.pool()?;
            let rows = sqlx::query(schema::SELECT_BY_IDENTITY)
                .bind(identity)
                .bind(identity)
                .bind(page_size as i64)
                .bind(offset as i64)
                .fetch_all(pool)
                .await?;
            Ok::<_, StoreError>(rows.iter().filter_map(row_to_transaction).collect::<Vec<_>>())
        }
        .await;
        drop(conn);

        self.settle("query_by_identity", identity, generation, result)
            .await
    }

    async fn count_by_identity(&self, identity: &str) -> Result<u64, StoreError> {
        let conn = self.conn.read().await;
        let generation = conn.generation;
        let result = async {
            let pool = conn.pool()?;
            let total = sqlx::query_scalar::<_, i64>(schema::COUNT_BY_IDENTITY)
                .bind(identity)
                .bind(identity)
                .fetch_one(pool)
                .await?;
            Ok::<_, StoreError>(total.max(0) as u64)
        }
        .await;
        drop(conn);

        self.settle("count_by_identity", identity, generation, result)
            .await
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn reopen(&self, storage: &StorageConfig) -> Result<(), StoreError> {
        let mut conn = self.conn.write().await;

        if let Some(pool) = conn.pool.take() {
            schema::checkpoint(&pool).await;
            pool.close().await;
        }
        self.healthy.store(false, Ordering::SeqCst);
        conn.generation += 1;
        conn.path = PathBuf::from(&storage.database_path);

        let pool = open_pool(&conn.path).await?;
        conn.pool = Some(pool);
        self.closed.store(false, Ordering::SeqCst);
        self.healthy.store(true, Ordering::SeqCst);

        tracing::info!(path = %conn.path.display(), "SQLite transaction log reopened");
        Ok(())
    }

    async fn close(&self) {
        let mut conn = self.conn.write().await;
        self.closed.store(true, Ordering::SeqCst);
        self.healthy.store(false, Ordering::SeqCst);

        if let Some(pool) = conn.pool.take() {
            schema::checkpoint(&pool).await;
            pool.close().await;
            conn.generation += 1;
            tracing::info!("Database connection closed gracefully");
        }
    }
}

// ============================================================
// HELPERS
// ============================================================

async fn open_pool(path: &Path) -> Result<SqlitePool, StoreError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .pragma("cache_size", "-50000")
        .pragma("temp_store", "MEMORY")
        .pragma("mmap_size", "536870912")
        .pragma("wal_autocheckpoint", "2000");

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    schema::init_schema(&pool).await?;
    Ok(pool)
}

async fn insert_record<'e, E>(executor: E, record: &TransactionRecord) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(schema::INSERT_TRANSACTION)
        .bind(record.receiver())
        .bind(record.sender())
        .bind(record.amount() as i64)
        .bind(record.timestamp())
        .execute(executor)
        .await?;
    Ok(())
}

/// Extension trait for safe row access with logging
trait SafeRow {
    /// Try to get a value from a column, log error and return None if it fails
    fn try_get_log<'r, T>(&'r self, column: &str) -> Option<T>
    where
        T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>;
}

impl SafeRow for SqliteRow {
    fn try_get_log<'r, T>(&'r self, column: &str) -> Option<T>
    where
        T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
    {
        use sqlx::Row;
        match self.try_get(column) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::error!("Failed to read column '{}': {}", column, e);
                None
            }
        }
    }
}

/// Unreadable rows are logged and skipped rather than failing the page
fn row_to_transaction(row: &SqliteRow) -> Option<StoredTransaction> {
    let id: i64 = row.try_get_log("id")?;
    let receiver: String = row.try_get_log("player_received")?;
    let sender: String = row.try_get_log("player_send")?;
    let amount: i64 = row.try_get_log("points_amount")?;
    let timestamp: DateTime<Utc> = row.try_get_log("timestamp")?;

    let amount = u32::try_from(amount).ok()?;
    match TransactionRecord::with_timestamp(receiver, sender, amount, timestamp) {
        Ok(record) => Some(StoredTransaction { id, record }),
        Err(e) => {
            tracing::error!(id, error = %e, "Skipping invalid stored transaction");
            None
        }
    }
}
