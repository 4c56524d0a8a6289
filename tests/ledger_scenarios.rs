//! End-to-end scenarios against a real SQLite file
//!
//! Each test gets its own temporary directory and drives the ledger only
//! through the host-facing surface (NotificationSink, lookup, reload, stop).

use point_ledger::{
    AppConfig, CONSOLE, ConfigSource, LedgerError, NotificationSink, PlayerRef, PointLedger,
    SqliteStore, TransactionStore,
};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

// ============================================================
// HELPERS
// ============================================================

fn config_in(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.database_path = dir.join("points.db").to_string_lossy().into_owned();
    config.pipeline.drain_interval_ms = 10;
    config
}

fn player(name: &str) -> PlayerRef {
    PlayerRef::new(name, Uuid::new_v4())
}

/// Poll until `identity` has `expected` committed records
async fn wait_for_count(ledger: &PointLedger, identity: &str, expected: u64) {
    for _ in 0..400 {
        let page = ledger.lookup(identity, 1, 5).await.unwrap();
        if page.total_count >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{} never reached {} records", identity, expected);
}

// ============================================================
// ATTRIBUTION
// ============================================================

#[tokio::test]
async fn test_pay_command_then_balance_change_records_transfer() {
    let dir = TempDir::new().unwrap();
    let ledger = PointLedger::start(config_in(dir.path())).await.unwrap();

    ledger.on_command_observed("/p pay Bob 10", &player("Alice"));
    ledger.on_balance_changed(&player("Bob"), 10);
    wait_for_count(&ledger, "Bob", 1).await;

    let page = ledger.lookup("Bob", 1, 5).await.unwrap();
    let tx = &page.records[0].record;
    assert_eq!(tx.receiver(), "Bob");
    assert_eq!(tx.sender(), "Alice");
    assert_eq!(tx.amount(), 10);

    // The payer sees the same transaction
    let alice = ledger.lookup("Alice", 1, 5).await.unwrap();
    assert_eq!(alice.total_count, 1);

    ledger.stop().await;
}

#[tokio::test]
async fn test_balance_change_without_command_comes_from_console() {
    let dir = TempDir::new().unwrap();
    let ledger = PointLedger::start(config_in(dir.path())).await.unwrap();

    ledger.on_balance_changed(&player("Carol"), 5);
    wait_for_count(&ledger, "Carol", 1).await;

    let page = ledger.lookup("Carol", 1, 5).await.unwrap();
    assert_eq!(page.records[0].record.sender(), CONSOLE);
    assert_eq!(page.records[0].record.amount(), 5);

    ledger.stop().await;
}

#[tokio::test]
async fn test_expired_pay_intent_is_not_used() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.correlation.ttl_ms = 30;
    let ledger = PointLedger::start(config).await.unwrap();

    ledger.on_command_observed("/points pay Bob 3", &player("Alice"));
    tokio::time::sleep(Duration::from_millis(80)).await;
    ledger.on_balance_changed(&player("Bob"), 3);
    wait_for_count(&ledger, "Bob", 1).await;

    let page = ledger.lookup("Bob", 1, 5).await.unwrap();
    assert_eq!(page.records[0].record.sender(), CONSOLE);

    ledger.stop().await;
}

#[tokio::test]
async fn test_pay_intent_consumed_once() {
    let dir = TempDir::new().unwrap();
    let ledger = PointLedger::start(config_in(dir.path())).await.unwrap();

    ledger.on_command_observed("/playerpoints pay Bob 1", &player("Alice"));
    ledger.on_balance_changed(&player("Bob"), 1);
    ledger.on_balance_changed(&player("Bob"), 1);
    wait_for_count(&ledger, "Bob", 2).await;

    let page = ledger.lookup("Bob", 1, 5).await.unwrap();
    let senders: Vec<_> = page.records.iter().map(|t| t.record.sender()).collect();
    // Newest first
    assert_eq!(senders, vec![CONSOLE, "Alice"]);

    ledger.stop().await;
}

// ============================================================
// LOOKUP
// ============================================================

#[tokio::test]
async fn test_lookup_paginates_newest_first() {
    let dir = TempDir::new().unwrap();
    let ledger = PointLedger::start(config_in(dir.path())).await.unwrap();

    for amount in 1..=12 {
        ledger.on_balance_changed(&player("Dave"), amount);
    }
    wait_for_count(&ledger, "Dave", 12).await;

    let mut sizes = Vec::new();
    let mut amounts = Vec::new();
    for page in 1..=3 {
        let result = ledger.lookup("Dave", page, 5).await.unwrap();
        assert_eq!(result.total_count, 12);
        assert_eq!(result.total_pages(), 3);
        sizes.push(result.records.len());
        amounts.extend(result.records.iter().map(|t| t.record.amount()));
    }
    assert_eq!(sizes, vec![5, 5, 2]);
    assert_eq!(amounts, (1..=12).rev().collect::<Vec<u32>>());

    let beyond = ledger.lookup("Dave", 4, 5).await.unwrap();
    assert!(beyond.records.is_empty());
    assert!(!beyond.has_next());

    ledger.stop().await;
}

#[tokio::test]
async fn test_lookup_ignores_case() {
    let dir = TempDir::new().unwrap();
    let ledger = PointLedger::start(config_in(dir.path())).await.unwrap();

    ledger.on_command_observed("/p pay bob 2", &player("Alice"));
    ledger.on_balance_changed(&player("Bob"), 2);
    wait_for_count(&ledger, "Bob", 1).await;

    for query in ["bob", "BOB", "Bob"] {
        let page = ledger.lookup(query, 1, 5).await.unwrap();
        assert_eq!(page.total_count, 1, "query {}", query);
        assert_eq!(page.records[0].record.sender(), "Alice");
    }
    assert_eq!(ledger.lookup("ALICE", 1, 5).await.unwrap().total_count, 1);

    ledger.stop().await;
}

#[tokio::test]
async fn test_lookup_rejects_page_zero() {
    let dir = TempDir::new().unwrap();
    let ledger = PointLedger::start(config_in(dir.path())).await.unwrap();

    let result = ledger.lookup("Dave", 0, 5).await;
    assert!(matches!(result, Err(LedgerError::Store(_))));

    ledger.stop().await;
}

// ============================================================
// POLICY
// ============================================================

#[tokio::test]
async fn test_deduction_recorded_against_console() {
    let dir = TempDir::new().unwrap();
    let ledger = PointLedger::start(config_in(dir.path())).await.unwrap();

    ledger.on_balance_changed(&player("Erin"), -8);
    wait_for_count(&ledger, "Erin", 1).await;

    let page = ledger.lookup("Erin", 1, 5).await.unwrap();
    let tx = &page.records[0].record;
    assert_eq!(tx.receiver(), CONSOLE);
    assert_eq!(tx.sender(), "Erin");
    assert_eq!(tx.amount(), 8);

    ledger.stop().await;
}

#[tokio::test]
async fn test_uuid_identities_when_names_disabled() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.policy.use_player_name = false;
    let ledger = PointLedger::start(config).await.unwrap();

    let frank = player("Frank");
    ledger.on_balance_changed(&frank, 4);
    let identity = frank.uuid.to_string();
    wait_for_count(&ledger, &identity, 1).await;

    assert_eq!(ledger.lookup("Frank", 1, 5).await.unwrap().total_count, 0);

    ledger.stop().await;
}

// ============================================================
// LIFECYCLE
// ============================================================

#[tokio::test]
async fn test_stop_flushes_everything_queued() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    // Timer effectively off, small queue so some records overflow
    config.pipeline.drain_interval_ms = 60_000;
    config.pipeline.queue_capacity = 100;
    config.pipeline.max_batch_size = 40;
    let db_path = config.storage.database_path.clone();
    let ledger = PointLedger::start(config).await.unwrap();

    for _ in 0..300 {
        ledger.on_balance_changed(&player("Ivy"), 1);
    }
    let status = ledger.status();
    assert!(status.pipeline.overflowed > 0);

    let report = ledger.stop().await;
    assert_eq!(report.lost, 0);
    assert!(!ledger.status().store_healthy);

    let store = SqliteStore::open(&db_path).await.unwrap();
    assert_eq!(store.count_by_identity("ivy").await.unwrap(), 300);
    store.close().await;
}

#[tokio::test]
async fn test_changes_after_stop_are_rejected() {
    let dir = TempDir::new().unwrap();
    let ledger = PointLedger::start(config_in(dir.path())).await.unwrap();

    ledger.stop().await;
    ledger.on_balance_changed(&player("Jack"), 9);

    assert_eq!(ledger.status().pipeline.rejected, 1);
    assert!(matches!(
        ledger.lookup("Jack", 1, 5).await,
        Err(LedgerError::Stopped)
    ));
    // Second stop is a no-op
    ledger.stop().await;
}

#[tokio::test]
async fn test_reload_switches_database() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let ledger = PointLedger::start(config.clone()).await.unwrap();

    ledger.on_balance_changed(&player("Kim"), 1);
    wait_for_count(&ledger, "Kim", 1).await;

    let mut moved = config.clone();
    moved.storage.database_path = dir
        .path()
        .join("moved")
        .join("points.db")
        .to_string_lossy()
        .into_owned();
    let result = ledger
        .request_reload(ConfigSource::Loaded(moved))
        .await
        .unwrap_or(Err(LedgerError::ReloadAborted));
    assert!(result.is_ok());

    // New database starts empty
    assert_eq!(ledger.lookup("Kim", 1, 5).await.unwrap().total_count, 0);
    ledger.on_balance_changed(&player("Kim"), 2);
    wait_for_count(&ledger, "Kim", 1).await;
    assert_eq!(ledger.lookup("Kim", 1, 5).await.unwrap().records[0].record.amount(), 2);

    ledger.stop().await;
}

#[tokio::test]
async fn test_start_fails_when_database_cannot_open() {
    let dir = TempDir::new().unwrap();
    // A regular file where the parent directory should be
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"x").unwrap();

    let mut config = config_in(dir.path());
    config.storage.database_path = blocker.join("points.db").to_string_lossy().into_owned();

    let result = PointLedger::start(config).await;
    assert!(matches!(result, Err(LedgerError::Store(_))));
}
