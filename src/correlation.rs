//! Pay-command correlation cache
//!
//! Links an observed `pay` command to the balance change it causes. The two
//! signals arrive independently, so the link is inferred from the receiving
//! identity plus a short time window.
//!
//! Entries are keyed by the ASCII-lowercased receiving identity and hold the payer
//! together with an explicit expiry instant. Expiry is checked on read; a
//! periodic [`CorrelationCache::sweep_expired`] bounds memory when commands
//! never produce a matching balance change.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::core_types::{Identity, normalize_identity};

/// A payer waiting for the receiver's balance to change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCorrelation {
    pub payer: Identity,
    pub expires_at: Instant,
}

impl PendingCorrelation {
    #[inline]
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Thread-safe TTL map: receiving identity -> payer.
///
/// At most one live entry per receiving identity (last writer wins), and
/// each entry is consumed at most once.
pub struct CorrelationCache {
    entries: DashMap<String, PendingCorrelation>,
}

impl CorrelationCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Remember that `payer` just issued a pay command targeting `receiving`.
    ///
    /// Overwrites any previous entry for the same receiver.
    pub fn record_intent(&self, receiving: &str, payer: &str, ttl: Duration) {
        self.record_intent_at(receiving, payer, ttl, Instant::now());
    }

    pub fn record_intent_at(&self, receiving: &str, payer: &str, ttl: Duration, now: Instant) {
        let key = normalize_identity(receiving);
        tracing::trace!(receiver = %key, payer, ttl_ms = ttl.as_millis() as u64, "Pay intent recorded");
        self.entries.insert(
            key,
            PendingCorrelation {
                payer: payer.to_string(),
                expires_at: now + ttl,
            },
        );
    }

    /// Take the payer for `receiving` if a live entry exists.
    ///
    /// Lookup and removal happen under one shard lock, so two concurrent
    /// callers can never both obtain the same payer. An expired entry is
    /// removed as well and reported as no correlation.
    pub fn resolve_and_consume(&self, receiving: &str) -> Option<Identity> {
        self.resolve_and_consume_at(receiving, Instant::now())
    }

    pub fn resolve_and_consume_at(&self, receiving: &str, now: Instant) -> Option<Identity> {
        let key = normalize_identity(receiving);
        let (_, pending) = self.entries.remove(&key)?;
        if pending.is_live(now) {
            Some(pending.payer)
        } else {
            tracing::debug!(receiver = %key, payer = %pending.payer, "Correlation expired before use");
            None
        }
    }

    /// Evict every entry whose expiry has passed. Returns the number evicted.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, pending| pending.is_live(now));
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Swept expired correlations");
        }
        evicted
    }

    /// Drop every pending correlation
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CorrelationCache {
    fn default() -> Self {
        Self::new()
    }
}
