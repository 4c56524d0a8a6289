use thiserror::Error;

/// Invalid transaction record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Invalid amount: must be positive")]
    ZeroAmount,

    #[error("Receiver and sender are both empty")]
    MissingParties,
}

/// Durable store failure
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store connection is not open")]
    Unavailable,

    #[error("Invalid page request: page and page size must be >= 1")]
    InvalidPage,
}

impl StoreError {
    /// Errors caused by the connection (as opposed to the request itself).
    ///
    /// Only these trigger the reconnection procedure.
    pub fn is_connection_failure(&self) -> bool {
        !matches!(self, StoreError::InvalidPage)
    }
}

/// Configuration loading/validation failure
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Lifecycle coordinator failure
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger is stopped")]
    Stopped,

    #[error("Reload task ended without reporting a result")]
    ReloadAborted,
}
