//! The [`Ledger`] service: shared state for the ledger components.
//!
//! The operations themselves live with their components:
//!
//! - [`visitation`](crate::visitation) -- `mark_visited`, `has_visited`, `record_food`
//! - [`registry`](crate::registry) -- `initialize_simulation`, `complete_simulation`
//! - [`event_log`](crate::event_log) -- `record_drug_delivery`, `record_tumor_kill`
//! - [`experience`](crate::experience) -- `submit_experience`, experience listings
//! - [`query`](crate::query) -- counts, run records, listings, notification polling
//!
//! Every mutating operation follows the same shape: validate, then commit
//! the record and its notification in one store call. The store publishes
//! the committed notification on the ledger's feed in sequence order.

use colony_types::NotificationKind;
use serde::Deserialize;

use crate::feed::{DEFAULT_FEED_CAPACITY, NotificationFeed, Subscription};
use crate::store::LedgerStore;

/// Whether run-scoped events require an active run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// Deliveries and kills are accepted for any run key, including keys
    /// that were never initialized or are already completed. Events may
    /// reach the ledger slightly out of order relative to initialization.
    #[default]
    Permissive,
    /// Deliveries and kills are rejected with
    /// [`LedgerError::RunNotActive`](crate::LedgerError::RunNotActive)
    /// unless the run is active.
    Strict,
}

impl core::str::FromStr for ConsistencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permissive" => Ok(Self::Permissive),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown consistency mode: {other}")),
        }
    }
}

/// Tunables for a [`Ledger`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedgerConfig {
    /// Run-state checks on event appends.
    #[serde(default)]
    pub consistency: ConsistencyMode,

    /// Broadcast buffer per feed subscriber.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
}

const fn default_feed_capacity() -> usize {
    DEFAULT_FEED_CAPACITY
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            consistency: ConsistencyMode::default(),
            feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

/// The simulation event ledger.
///
/// Cheap to share behind an [`Arc`](std::sync::Arc); all operations take
/// `&self`. Concurrency control is delegated to the store, which serializes
/// mutations per run key.
#[derive(Debug)]
pub struct Ledger<S> {
    pub(crate) store: S,
    pub(crate) feed: NotificationFeed,
    pub(crate) consistency: ConsistencyMode,
}

impl<S: LedgerStore> Ledger<S> {
    /// Create a ledger over `store` with default settings.
    pub fn new(store: S) -> Self {
        Self::with_config(store, &LedgerConfig::default())
    }

    /// Create a ledger over `store` with explicit settings.
    pub fn with_config(store: S, config: &LedgerConfig) -> Self {
        Self {
            store,
            feed: NotificationFeed::new(config.feed_capacity),
            consistency: config.consistency,
        }
    }

    /// Set the consistency mode.
    #[must_use]
    pub fn with_consistency(mut self, consistency: ConsistencyMode) -> Self {
        self.consistency = consistency;
        self
    }

    /// The active consistency mode.
    pub const fn consistency(&self) -> ConsistencyMode {
        self.consistency
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The live notification feed.
    pub const fn feed(&self) -> &NotificationFeed {
        &self.feed
    }

    /// Subscribe to all live notifications.
    pub fn subscribe(&self) -> Subscription {
        self.feed.subscribe()
    }

    /// Subscribe to live notifications of the given kinds.
    pub fn subscribe_kinds(&self, kinds: impl IntoIterator<Item = NotificationKind>) -> Subscription {
        self.feed.subscribe_kinds(kinds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[test]
    fn default_mode_is_permissive() {
        let ledger = Ledger::new(MemoryStore::new());
        assert_eq!(ledger.consistency(), ConsistencyMode::Permissive);
        let strict = ledger.with_consistency(ConsistencyMode::Strict);
        assert_eq!(strict.consistency(), ConsistencyMode::Strict);
    }

    #[test]
    fn consistency_mode_parses_case_insensitively() {
        assert_eq!("STRICT".parse::<ConsistencyMode>(), Ok(ConsistencyMode::Strict));
        assert_eq!(" permissive ".parse::<ConsistencyMode>(), Ok(ConsistencyMode::Permissive));
        assert!("lenient".parse::<ConsistencyMode>().is_err());
    }

    #[test]
    fn config_fields_default_when_absent() {
        let config: LedgerConfig = serde_json::from_str("{}").unwrap_or_default();
        assert_eq!(config, LedgerConfig::default());
        let strict: LedgerConfig =
            serde_json::from_str(r#"{"consistency": "strict"}"#).unwrap_or_default();
        assert_eq!(strict.consistency, ConsistencyMode::Strict);
    }
}
