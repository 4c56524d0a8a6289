//! point_ledger - durable ledger of point transfers
//!
//! Observes two independent host signals, pay commands and balance
//! changes, links them into sender/receiver transactions and appends them
//! to a SQLite log through a batching pipeline.
//!
//! # Modules
//!
//! - [`core_types`] - Identity, PlayerRef and the console identity
//! - [`models`] - TransactionRecord, StoredTransaction, LookupPage
//! - [`command`] - Pay-command grammar
//! - [`correlation`] - TTL cache linking pay commands to balance changes
//! - [`pipeline`] - Bounded queue drained in batches to the store
//! - [`persistence`] - TransactionStore trait and the SQLite backend
//! - [`ledger`] - PointLedger lifecycle and the NotificationSink
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup
//! - [`error`] - Error types

// Core types - must be first!
pub mod core_types;

pub mod command;
pub mod config;
pub mod correlation;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod persistence;
pub mod pipeline;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use core_types::{CONSOLE, Identity, PlayerRef, RecordId};
pub use error::{ConfigError, LedgerError, RecordError, StoreError};
pub use ledger::{ConfigSource, LedgerStatus, NotificationSink, PointLedger};
pub use models::{LookupPage, StoredTransaction, TransactionRecord};
pub use persistence::{SqliteStore, TransactionStore};

// Pipeline re-exports
pub use pipeline::{
    BatchPipeline, EnqueueOutcome, PipelineStats, PipelineStatsSnapshot, ShutdownReport,
    ShutdownSignal,
};
