use sqlx::SqlitePool;

use crate::error::StoreError;

/// Append-only transaction log.
///
/// `id` is the insertion order used for newest-first queries. Non-positive
/// amounts are rejected by the CHECK constraint.
pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS point_transactions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    player_received TEXT    NOT NULL,
    player_send     TEXT    NOT NULL,
    points_amount   INTEGER NOT NULL CHECK (points_amount > 0),
    timestamp       TEXT    NOT NULL
)
"#;

/// Case-insensitive receiver lookup, newest first
pub const CREATE_RECEIVER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_player_received_nocase
ON point_transactions(player_received COLLATE NOCASE, id DESC)
"#;

/// Case-insensitive sender lookup, newest first
pub const CREATE_SENDER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_player_send_nocase
ON point_transactions(player_send COLLATE NOCASE, id DESC)
"#;

pub const INSERT_TRANSACTION: &str = r#"
INSERT INTO point_transactions (player_received, player_send, points_amount, timestamp)
VALUES (?, ?, ?, ?)
"#;

pub const SELECT_BY_IDENTITY: &str = r#"
SELECT id, player_received, player_send, points_amount, timestamp
FROM point_transactions
WHERE player_received = ? COLLATE NOCASE OR player_send = ? COLLATE NOCASE
ORDER BY id DESC
LIMIT ? OFFSET ?
"#;

pub const COUNT_BY_IDENTITY: &str = r#"
SELECT COUNT(*)
FROM point_transactions
WHERE player_received = ? COLLATE NOCASE OR player_send = ? COLLATE NOCASE
"#;

/// Create table and indexes. Idempotent, re-applied on every (re)connect.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    tracing::debug!("Applying SQLite schema...");

    for ddl in [
        CREATE_TRANSACTIONS_TABLE,
        CREATE_RECEIVER_INDEX,
        CREATE_SENDER_INDEX,
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    // Refresh planner statistics; failure only costs query plans
    if let Err(e) = sqlx::query("ANALYZE point_transactions")
        .execute(pool)
        .await
    {
        tracing::warn!("ANALYZE failed: {}", e);
    }

    tracing::debug!("SQLite schema ready");
    Ok(())
}

/// Final consolidation before closing: planner optimize + WAL truncate.
///
/// Errors are logged, never raised; the caller is shutting down.
pub async fn checkpoint(pool: &SqlitePool) {
    for pragma in ["PRAGMA optimize", "PRAGMA wal_checkpoint(TRUNCATE)"] {
        if let Err(e) = sqlx::query(pragma).execute(pool).await {
            tracing::warn!(pragma, "Checkpoint step failed: {}", e);
        }
    }
}
