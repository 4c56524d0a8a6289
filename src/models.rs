// models.rs - Transaction record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{CONSOLE, Identity, RecordId, identities_match};
use crate::error::RecordError;

// ============================================================
// TRANSACTION RECORD
// ============================================================

/// An attributed point transfer.
///
/// Created when a balance change is attributed, never mutated afterwards.
/// `amount` is always positive; the direction is encoded by which side is
/// [`CONSOLE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    receiver: Identity,
    sender: Identity,
    amount: u32,
    timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    /// Create a record stamped with the current time
    pub fn new(
        receiver: impl Into<Identity>,
        sender: impl Into<Identity>,
        amount: u32,
    ) -> Result<Self, RecordError> {
        Self::with_timestamp(receiver, sender, amount, Utc::now())
    }

    /// Create a record with an explicit timestamp (used when reading back)
    pub fn with_timestamp(
        receiver: impl Into<Identity>,
        sender: impl Into<Identity>,
        amount: u32,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, RecordError> {
        let receiver = receiver.into();
        let sender = sender.into();

        if amount == 0 {
            return Err(RecordError::ZeroAmount);
        }
        if receiver.is_empty() && sender.is_empty() {
            return Err(RecordError::MissingParties);
        }

        Ok(Self {
            receiver,
            sender,
            amount,
            timestamp,
        })
    }

    /// Points received by `receiver`, sent by `payer` (or console)
    pub fn credit(
        receiver: impl Into<Identity>,
        payer: impl Into<Identity>,
        amount: u32,
    ) -> Result<Self, RecordError> {
        Self::new(receiver, payer, amount)
    }

    /// Points taken from `player`; console is the receiving side
    pub fn debit(player: impl Into<Identity>, amount: u32) -> Result<Self, RecordError> {
        Self::new(CONSOLE, player, amount)
    }

    /// Bypass validation so tests can feed the store rows it must reject.
    #[cfg(test)]
    pub(crate) fn unchecked(receiver: &str, sender: &str, amount: u32) -> Self {
        Self {
            receiver: receiver.to_string(),
            sender: sender.to_string(),
            amount,
            timestamp: Utc::now(),
        }
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn amount(&self) -> u32 {
        self.amount
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// True if the record was a deduction (player -> console)
    pub fn is_debit(&self) -> bool {
        self.receiver == CONSOLE
    }

    /// True if `identity` appears on either side (ASCII case-insensitive)
    pub fn involves(&self, identity: &str) -> bool {
        identities_match(&self.receiver, identity) || identities_match(&self.sender, identity)
    }
}

// ============================================================
// STORED TRANSACTION
// ============================================================

/// A record read back from the store, with its insertion-order id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredTransaction {
    pub id: RecordId,
    pub record: TransactionRecord,
}

// ============================================================
// LOOKUP PAGE
// ============================================================

/// One page of a paginated identity lookup
#[derive(Debug, Clone, Serialize)]
pub struct LookupPage {
    pub identity: Identity,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub records: Vec<StoredTransaction>,
}

impl LookupPage {
    /// `ceil(total_count / page_size)`
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(self.page_size as u64)
    }

    pub fn has_next(&self) -> bool {
        (self.page as u64) < self.total_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }
}
