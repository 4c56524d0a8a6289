//! PointLedger - lifecycle coordinator and host-facing surface
//!
//! Owns the store, the batch pipeline and the correlation cache, and runs
//! the two background tasks (periodic drain, correlation sweep) on the
//! runtime that was current at [`PointLedger::start`].
//!
//! ```text
//!  host threads                      runtime tasks
//!  ────────────                      ─────────────
//!  on_command_observed ─▶ CorrelationCache ◀── sweeper (every sweep_interval)
//!  on_balance_changed  ─▶ BatchPipeline    ◀── drain   (every drain_interval)
//!                                 │
//!                                 ▼
//!                          TransactionStore ◀── lookup / reload / stop
//! ```
//!
//! Shutdown order: reject new records, stop the drain timer, drain the
//! queue to empty, stop the sweeper, close the store.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::command::parse_pay_command;
use crate::config::{AppConfig, PolicyConfig};
use crate::core_types::{CONSOLE, PlayerRef};
use crate::correlation::CorrelationCache;
use crate::error::{ConfigError, LedgerError};
use crate::models::{LookupPage, TransactionRecord};
use crate::persistence::{SqliteStore, TransactionStore};
use crate::pipeline::{BatchPipeline, DrainTask, EnqueueOutcome, PipelineStatsSnapshot, ShutdownReport};

/// Crate version plus the git revision it was built from
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "+", env!("GIT_HASH"));

// ============================================================
// NOTIFICATION SINK
// ============================================================

/// Inbound events from the host.
///
/// Both methods are synchronous, never block on I/O and never fail; they
/// may be called from any thread.
pub trait NotificationSink: Send + Sync {
    /// A player issued a chat command (raw text including the leading `/`)
    fn on_command_observed(&self, raw_text: &str, issuer: &PlayerRef);

    /// A player's point balance changed by `delta`
    fn on_balance_changed(&self, player: &PlayerRef, delta: i32);
}

// ============================================================
// STATUS / RELOAD TYPES
// ============================================================

#[derive(Debug, Clone)]
pub struct LedgerStatus {
    pub store_healthy: bool,
    pub queued: usize,
    pub pending_correlations: usize,
    pub stopped: bool,
    pub version: &'static str,
    pub pipeline: PipelineStatsSnapshot,
}

impl std::fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "point_ledger {} | store={} queued={} pending_correlations={}{}",
            self.version,
            if self.store_healthy { "healthy" } else { "unavailable" },
            self.queued,
            self.pending_correlations,
            if self.stopped { " (stopped)" } else { "" }
        )
    }
}

/// Where a reload takes its configuration from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Already parsed
    Loaded(AppConfig),
    /// YAML file, read on the reload task
    File(PathBuf),
}

impl ConfigSource {
    fn resolve(self) -> Result<AppConfig, ConfigError> {
        match self {
            ConfigSource::Loaded(config) => {
                config.validate()?;
                Ok(config)
            }
            ConfigSource::File(path) => AppConfig::from_file(path),
        }
    }
}

/// Settings that reload may change while running
#[derive(Debug, Clone, Copy)]
struct LiveSettings {
    policy: PolicyConfig,
    correlation_ttl: Duration,
    page_size: u32,
}

impl LiveSettings {
    fn from_config(config: &AppConfig) -> Self {
        Self {
            policy: config.policy,
            correlation_ttl: config.correlation.ttl(),
            page_size: config.lookup.page_size,
        }
    }
}

struct BackgroundTasks {
    drain: DrainTask,
    sweeper: SweeperTask,
}

// ============================================================
// POINT LEDGER
// ============================================================

/// Cheap to clone; all clones share the same ledger.
#[derive(Clone)]
pub struct PointLedger {
    inner: Arc<LedgerInner>,
}

struct LedgerInner {
    store: Arc<dyn TransactionStore>,
    pipeline: Arc<BatchPipeline>,
    correlations: Arc<CorrelationCache>,
    settings: RwLock<LiveSettings>,
    tasks: Mutex<Option<BackgroundTasks>>,
    /// Serializes reload against stop so a closed store is never reopened
    lifecycle: Mutex<()>,
    max_batch_size: usize,
    runtime: Handle,
    stopped: AtomicBool,
}

impl PointLedger {
    /// Open the store and start the background tasks.
    ///
    /// Must be called from within a Tokio runtime; that runtime carries all
    /// store I/O for the lifetime of the ledger. A store that cannot be
    /// opened is fatal.
    pub async fn start(config: AppConfig) -> Result<Self, LedgerError> {
        config.validate()?;
        let store = SqliteStore::open(&config.storage.database_path).await?;
        tracing::info!(
            path = %config.storage.database_path,
            "[Ledger] Store opened"
        );
        Ok(Self::with_store(Arc::new(store), &config))
    }

    /// Start against an already-open store
    pub fn with_store(store: Arc<dyn TransactionStore>, config: &AppConfig) -> Self {
        let runtime = Handle::current();
        let pipeline = Arc::new(BatchPipeline::new(
            Arc::clone(&store),
            config.pipeline.queue_capacity,
            runtime.clone(),
        ));
        let correlations = Arc::new(CorrelationCache::new());

        let drain = pipeline.spawn_drain_task(
            config.pipeline.drain_interval(),
            config.pipeline.max_batch_size,
        );
        let sweeper = SweeperTask::spawn(
            &runtime,
            Arc::clone(&correlations),
            config.correlation.sweep_interval(),
        );

        tracing::info!(
            version = VERSION,
            queue_capacity = config.pipeline.queue_capacity,
            max_batch_size = config.pipeline.max_batch_size,
            drain_interval_ms = config.pipeline.drain_interval_ms,
            correlation_ttl_ms = config.correlation.ttl_ms,
            "[Ledger] Started"
        );

        Self {
            inner: Arc::new(LedgerInner {
                store,
                pipeline,
                correlations,
                settings: RwLock::new(LiveSettings::from_config(config)),
                tasks: Mutex::new(Some(BackgroundTasks { drain, sweeper })),
                lifecycle: Mutex::new(()),
                max_batch_size: config.pipeline.max_batch_size,
                runtime,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    fn settings(&self) -> LiveSettings {
        *self
            .inner
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Page size from the `lookup` config section
    pub fn default_page_size(&self) -> u32 {
        self.settings().page_size
    }

    // ------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------

    /// One page of transactions involving `identity` (either side,
    /// case-insensitive), newest first. `page` starts at 1.
    pub async fn lookup(
        &self,
        identity: &str,
        page: u32,
        page_size: u32,
    ) -> Result<LookupPage, LedgerError> {
        if self.is_stopped() {
            return Err(LedgerError::Stopped);
        }

        let total_count = self.inner.store.count_by_identity(identity).await?;
        let records = self
            .inner
            .store
            .query_by_identity(identity, page, page_size)
            .await?;

        tracing::debug!(
            identity,
            page,
            page_size,
            total_count,
            returned = records.len(),
            "[Ledger] Lookup"
        );

        Ok(LookupPage {
            identity: identity.to_string(),
            page,
            page_size,
            total_count,
            records,
        })
    }

    pub fn status(&self) -> LedgerStatus {
        LedgerStatus {
            store_healthy: self.inner.store.is_healthy(),
            queued: self.inner.pipeline.len(),
            pending_correlations: self.inner.correlations.len(),
            stopped: self.is_stopped(),
            version: VERSION,
            pipeline: self.inner.pipeline.stats(),
        }
    }

    // ------------------------------------------------------------
    // Reload
    // ------------------------------------------------------------

    /// Apply a new configuration while running.
    ///
    /// Clears pending correlations, reopens the store (possibly at a new
    /// path), then swaps in the new policy, TTL and page size. Queue
    /// capacity and timer intervals keep their start-up values.
    pub async fn reload(&self, config: &AppConfig) -> Result<(), LedgerError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.is_stopped() {
            return Err(LedgerError::Stopped);
        }
        config.validate()?;

        self.inner.correlations.clear();

        if let Err(e) = self.inner.store.reopen(&config.storage).await {
            tracing::error!(
                path = %config.storage.database_path,
                error = %e,
                "[Ledger] Reload failed to reopen store"
            );
            return Err(e.into());
        }

        *self
            .inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = LiveSettings::from_config(config);

        let swept = self.inner.correlations.sweep_expired();
        tracing::info!(
            path = %config.storage.database_path,
            record_balance_changes = config.policy.record_balance_changes,
            log_negative = config.policy.log_negative,
            use_player_name = config.policy.use_player_name,
            correlation_ttl_ms = config.correlation.ttl_ms,
            swept,
            "[Ledger] Reloaded"
        );
        Ok(())
    }

    /// Run [`PointLedger::reload`] on the ledger's runtime.
    ///
    /// The outcome arrives on the returned channel. A dropped sender means
    /// the task died before reporting; treat it as
    /// [`LedgerError::ReloadAborted`].
    pub fn request_reload(&self, source: ConfigSource) -> oneshot::Receiver<Result<(), LedgerError>> {
        let (tx, rx) = oneshot::channel();
        let ledger = self.clone();

        self.inner.runtime.spawn(async move {
            let result = match source.resolve() {
                Ok(config) => ledger.reload(&config).await,
                Err(e) => {
                    tracing::error!(error = %e, "[Ledger] Reload rejected: bad configuration");
                    Err(e.into())
                }
            };
            // Requester may have gone away
            let _ = tx.send(result);
        });

        rx
    }

    // ------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------

    /// Stop accepting records, flush everything queued, close the store.
    ///
    /// Idempotent; only the first call does work, later calls return an
    /// empty report. A reload already running finishes before the store
    /// is closed; one that starts later sees the ledger stopped.
    pub async fn stop(&self) -> ShutdownReport {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return ShutdownReport::default();
        }
        let _lifecycle = self.inner.lifecycle.lock().await;
        tracing::info!("[Ledger] Stopping");

        self.inner.pipeline.begin_shutdown();

        let tasks = self.inner.tasks.lock().await.take();
        let sweeper = match tasks {
            Some(BackgroundTasks { drain, sweeper }) => {
                drain.cancel().await;
                Some(sweeper)
            }
            None => None,
        };

        let report = self
            .inner
            .pipeline
            .shutdown_drain(self.inner.max_batch_size)
            .await;

        if let Some(sweeper) = sweeper {
            sweeper.cancel().await;
        }
        self.inner.correlations.clear();
        self.inner.store.close().await;

        if report.lost > 0 {
            tracing::error!(lost = report.lost, "[Ledger] Transactions lost during shutdown");
        }
        tracing::info!(
            flushed = report.flushed_in_batches,
            written_individually = report.written_individually,
            "[Ledger] Stopped. {}",
            self.inner.pipeline.stats()
        );
        report
    }

    fn enqueue(&self, record: TransactionRecord) {
        let receiver = record.receiver().to_string();
        match self.inner.pipeline.enqueue(record) {
            EnqueueOutcome::Queued => {}
            EnqueueOutcome::Overflow => {
                tracing::debug!(receiver = %receiver, "[Ledger] Queue full, record written directly");
            }
            EnqueueOutcome::Rejected => {
                tracing::warn!(receiver = %receiver, "[Ledger] Balance change after stop was not recorded");
            }
        }
    }
}

impl NotificationSink for PointLedger {
    fn on_command_observed(&self, raw_text: &str, issuer: &PlayerRef) {
        let Some(command) = parse_pay_command(raw_text) else {
            return;
        };
        let settings = self.settings();
        let payer = issuer.identity(settings.policy.use_player_name);

        self.inner
            .correlations
            .record_intent(command.target, &payer, settings.correlation_ttl);
        tracing::debug!(
            target_player = command.target,
            payer = %payer,
            "[Ledger] Pay intent recorded"
        );
    }

    fn on_balance_changed(&self, player: &PlayerRef, delta: i32) {
        let policy = self.settings().policy;
        if !policy.record_balance_changes || delta == 0 {
            return;
        }

        let identity = player.identity(policy.use_player_name);
        let amount = delta.unsigned_abs();

        let record = if delta > 0 {
            // Pay commands name the target by display name
            let key = player.name.as_deref().unwrap_or(&identity);
            let payer = self
                .inner
                .correlations
                .resolve_and_consume(key)
                .unwrap_or_else(|| CONSOLE.to_string());
            TransactionRecord::credit(identity, payer, amount)
        } else if policy.log_negative {
            TransactionRecord::debit(identity, amount)
        } else {
            return;
        };

        match record {
            Ok(record) => self.enqueue(record),
            Err(e) => tracing::warn!(
                uuid = %player.uuid,
                delta,
                error = %e,
                "[Ledger] Balance change not recordable"
            ),
        }
    }
}

// ============================================================
// CORRELATION SWEEPER
// ============================================================

/// Periodically evicts expired pay intents
struct SweeperTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperTask {
    fn spawn(runtime: &Handle, cache: Arc<CorrelationCache>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = cache.sweep_expired();
                        if swept > 0 {
                            tracing::debug!(swept, "[Ledger] Expired pay intents removed");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        Self { stop_tx, handle }
    }

    async fn cancel(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!("[Ledger] Sweeper ended abnormally: {}", e);
        }
    }
}
