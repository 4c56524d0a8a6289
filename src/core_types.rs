//! Core types used throughout the system
//!
//! Identities are plain strings: a player name, a player UUID, or the
//! synthetic [`CONSOLE`] identity.

use uuid::Uuid;

/// Identity string of a participant in a point transfer.
pub type Identity = String;

/// Row id assigned by the store, monotonic in insertion order.
pub type RecordId = i64;

/// Synthetic identity used when no player can be attributed.
///
/// - As `sender`: points granted by an admin/console/plugin, or a pay command
///   whose correlation expired before the balance change arrived.
/// - As `receiver`: points taken from a player.
pub const CONSOLE: &str = "console";

/// A player as reported by the host event layer.
///
/// The host may or may not know the display name (e.g. offline players),
/// the UUID is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRef {
    pub name: Option<String>,
    pub uuid: Uuid,
}

impl PlayerRef {
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            name: Some(name.into()),
            uuid,
        }
    }

    /// Player known only by UUID
    pub fn anonymous(uuid: Uuid) -> Self {
        Self { name: None, uuid }
    }

    /// Identity recorded in the ledger for this player.
    ///
    /// Uses the display name when `use_player_name` is set and a name is
    /// known, the hyphenated UUID otherwise.
    pub fn identity(&self, use_player_name: bool) -> Identity {
        match (&self.name, use_player_name) {
            (Some(name), true) => name.clone(),
            _ => self.uuid.to_string(),
        }
    }
}

/// Case-normalized key used for identity matching.
///
/// Folds ASCII letters only, the same rule as SQLite `NOCASE` and
/// [`identities_match`], so the cache and the store agree on which
/// identities are equal.
#[inline]
pub fn normalize_identity(identity: &str) -> String {
    identity.to_ascii_lowercase()
}

/// Case-insensitive identity comparison (ASCII folding)
#[inline]
pub fn identities_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
