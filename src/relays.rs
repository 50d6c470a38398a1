//! Relay list management
//!
//! The active relay list is either the user's custom list, persisted in the
//! credential store under [`RELAY_LIST_KEY`], or the built-in defaults. The
//! defaults are never written to the store; the first `add` copies them into
//! a custom list so customization starts from a known baseline.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::{CredentialStore, StoreError, RELAY_LIST_KEY};

/// Relays used when no custom list exists
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://relay.current.fyi",
    "wss://relay.snort.social",
    "wss://relay.primal.net",
];

/// URL schemes a relay address may use
pub const ACCEPTED_SCHEMES: &[&str] = &["wss://", "ws://"];

/// Relay list errors
#[derive(Error, Debug)]
pub enum RelayListError {
    /// Address is empty or uses an unsupported scheme
    #[error("Invalid relay address {0:?}: must start with wss:// or ws://")]
    InvalidAddress(String),

    /// Address is not in the custom list, or there is no custom list
    #[error("Relay not found in custom list: {0}")]
    NotFound(String),

    /// Removing the address would leave no relays
    #[error("Cannot remove {0}: it is the last relay (use reset to restore defaults)")]
    LastEndpoint(String),

    /// The store could not be read or written
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Result type for relay list operations
pub type RelayListResult<T> = Result<T, RelayListError>;

/// A validated relay address
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelayUrl(String);

impl RelayUrl {
    /// Validate an address
    ///
    /// Surrounding whitespace is trimmed; the remainder must be a `ws://` or
    /// `wss://` URL with something after the scheme.
    pub fn parse(address: &str) -> RelayListResult<Self> {
        let trimmed = address.trim();
        let has_host = ACCEPTED_SCHEMES.iter().any(|scheme| {
            trimmed
                .strip_prefix(scheme)
                .is_some_and(|rest| !rest.is_empty() && !rest.starts_with('/'))
        });

        if !has_host {
            return Err(RelayListError::InvalidAddress(address.to_string()));
        }
        Ok(RelayUrl(trimmed.to_string()))
    }

    /// The address as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RelayUrl {
    type Error = RelayListError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RelayUrl::parse(&value)
    }
}

impl From<RelayUrl> for String {
    fn from(url: RelayUrl) -> Self {
        url.0
    }
}

impl std::fmt::Display for RelayUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RelayUrl {
    type Err = RelayListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelayUrl::parse(s)
    }
}

/// The built-in default list
pub fn default_relays() -> Vec<RelayUrl> {
    DEFAULT_RELAYS
        .iter()
        .map(|url| RelayUrl(url.to_string()))
        .collect()
}

/// Result of [`RelayList::add`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// The relay was appended and the list persisted
    Added,
    /// The relay was already listed; nothing changed
    AlreadyPresent,
}

/// Manages the persisted relay list
pub struct RelayList<S> {
    store: S,
}

impl<S: CredentialStore> RelayList<S> {
    /// Wrap a store
    pub fn new(store: S) -> Self {
        RelayList { store }
    }

    /// The active list: the custom list if non-empty, else the defaults
    pub fn list(&self) -> Vec<RelayUrl> {
        match self.stored() {
            Ok(Some(relays)) => relays,
            Ok(None) => default_relays(),
            Err(e) => {
                warn!(error = %e, "could not read custom relay list, using defaults");
                default_relays()
            }
        }
    }

    /// Whether [`list`](Self::list) currently returns the defaults
    pub fn is_default(&self) -> bool {
        !matches!(self.stored(), Ok(Some(_)))
    }

    /// Append a relay, seeding from the defaults if there is no custom list
    pub fn add(&self, address: &str) -> RelayListResult<AddOutcome> {
        let url = RelayUrl::parse(address)?;
        let mut relays = self.stored()?.unwrap_or_else(default_relays);

        if relays.contains(&url) {
            debug!(relay = %url, "relay already listed");
            return Ok(AddOutcome::AlreadyPresent);
        }

        relays.push(url);
        self.persist(&relays)?;
        Ok(AddOutcome::Added)
    }

    /// Remove a relay from the custom list
    pub fn remove(&self, address: &str) -> RelayListResult<()> {
        let target = address.trim();
        let relays = self
            .stored()?
            .ok_or_else(|| RelayListError::NotFound(target.to_string()))?;

        if !relays.iter().any(|r| r.as_str() == target) {
            return Err(RelayListError::NotFound(target.to_string()));
        }

        let remaining: Vec<RelayUrl> = relays
            .into_iter()
            .filter(|r| r.as_str() != target)
            .collect();
        if remaining.is_empty() {
            return Err(RelayListError::LastEndpoint(target.to_string()));
        }

        self.persist(&remaining)
    }

    /// Drop the custom list, reverting to the defaults
    pub fn reset(&self) -> RelayListResult<()> {
        let removal = self.store.delete(RELAY_LIST_KEY)?;
        debug!(?removal, "custom relay list reset");
        Ok(())
    }

    /// The custom list, `None` when absent or empty
    ///
    /// Unparseable stored data is treated as absent.
    fn stored(&self) -> RelayListResult<Option<Vec<RelayUrl>>> {
        let Some(json) = self.store.get(RELAY_LIST_KEY)? else {
            return Ok(None);
        };

        match serde_json::from_str::<Vec<RelayUrl>>(&json) {
            Ok(relays) if relays.is_empty() => Ok(None),
            Ok(relays) => Ok(Some(relays)),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable custom relay list");
                Ok(None)
            }
        }
    }

    fn persist(&self, relays: &[RelayUrl]) -> RelayListResult<()> {
        let json = serde_json::Value::from(
            relays.iter().map(RelayUrl::as_str).collect::<Vec<_>>(),
        )
        .to_string();
        self.store.set(RELAY_LIST_KEY, &json)?;
        debug!(count = relays.len(), "custom relay list saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn manager() -> RelayList<MemoryStore> {
        RelayList::new(MemoryStore::new())
    }

    fn urls(list: &[RelayUrl]) -> Vec<&str> {
        list.iter().map(RelayUrl::as_str).collect()
    }

    #[test]
    fn test_parse_accepts_ws_schemes() {
        assert_eq!(RelayUrl::parse("wss://x").unwrap().as_str(), "wss://x");
        assert_eq!(RelayUrl::parse(" ws://localhost:7777 ").unwrap().as_str(), "ws://localhost:7777");
    }

    #[test]
    fn test_parse_rejects_bad_addresses() {
        for bad in ["", "   ", "https://relay.example.com", "relay.example.com", "wss://", "ws:///path"] {
            assert!(
                matches!(RelayUrl::parse(bad), Err(RelayListError::InvalidAddress(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_list_defaults_when_nothing_stored() {
        let relays = manager();
        assert!(relays.is_default());
        assert_eq!(urls(&relays.list()), DEFAULT_RELAYS);
    }

    #[test]
    fn test_first_add_seeds_from_defaults() {
        let relays = manager();
        assert_eq!(relays.add("wss://x").unwrap(), AddOutcome::Added);

        let list = relays.list();
        assert!(!relays.is_default());
        assert_eq!(list.len(), DEFAULT_RELAYS.len() + 1);
        assert_eq!(urls(&list[..DEFAULT_RELAYS.len()]), DEFAULT_RELAYS);
        assert_eq!(list.last().unwrap().as_str(), "wss://x");
    }

    #[test]
    fn test_add_twice_is_already_present() {
        let relays = manager();
        relays.add("wss://x").unwrap();
        let after_first = relays.list();

        assert_eq!(relays.add("wss://x").unwrap(), AddOutcome::AlreadyPresent);
        assert_eq!(relays.list(), after_first);
    }

    #[test]
    fn test_add_default_relay_is_already_present() {
        let relays = manager();
        assert_eq!(relays.add(DEFAULT_RELAYS[0]).unwrap(), AddOutcome::AlreadyPresent);
        // Nothing materialized
        assert!(relays.is_default());
    }

    #[test]
    fn test_add_invalid_leaves_state_untouched() {
        let relays = manager();
        assert!(matches!(
            relays.add("http://x"),
            Err(RelayListError::InvalidAddress(_))
        ));
        assert!(relays.is_default());
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let store = MemoryStore::new();
        store
            .set(RELAY_LIST_KEY, r#"["wss://c","wss://a","wss://b"]"#)
            .unwrap();
        let relays = RelayList::new(store);

        relays.add("wss://0").unwrap();
        assert_eq!(urls(&relays.list()), ["wss://c", "wss://a", "wss://b", "wss://0"]);
    }

    #[test]
    fn test_remove_without_custom_list_is_not_found() {
        let relays = manager();
        assert!(matches!(
            relays.remove(DEFAULT_RELAYS[0]),
            Err(RelayListError::NotFound(_))
        ));
        assert!(relays.is_default());
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let relays = manager();
        relays.add("wss://x").unwrap();
        let before = relays.list();

        assert!(matches!(relays.remove("wss://y"), Err(RelayListError::NotFound(_))));
        assert_eq!(relays.list(), before);
    }

    #[test]
    fn test_remove_keeps_order() {
        let store = MemoryStore::new();
        store.set(RELAY_LIST_KEY, r#"["wss://a","wss://b","wss://c"]"#).unwrap();
        let relays = RelayList::new(store);

        relays.remove("wss://b").unwrap();
        assert_eq!(urls(&relays.list()), ["wss://a", "wss://c"]);
    }

    #[test]
    fn test_remove_last_endpoint_fails() {
        let store = MemoryStore::new();
        store.set(RELAY_LIST_KEY, r#"["wss://only"]"#).unwrap();
        let relays = RelayList::new(store);

        assert!(matches!(
            relays.remove("wss://only"),
            Err(RelayListError::LastEndpoint(_))
        ));
        assert_eq!(urls(&relays.list()), ["wss://only"]);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let relays = manager();
        relays.reset().unwrap();

        relays.add("wss://x").unwrap();
        relays.reset().unwrap();
        assert!(relays.is_default());
        assert_eq!(urls(&relays.list()), DEFAULT_RELAYS);

        relays.reset().unwrap();
    }

    #[test]
    fn test_corrupt_list_falls_back_to_defaults() {
        let store = MemoryStore::new();
        store.set(RELAY_LIST_KEY, "{oops").unwrap();
        let relays = RelayList::new(store);

        assert!(relays.is_default());
        assert_eq!(urls(&relays.list()), DEFAULT_RELAYS);
    }

    #[test]
    fn test_empty_stored_list_means_defaults() {
        let store = MemoryStore::new();
        store.set(RELAY_LIST_KEY, "[]").unwrap();
        let relays = RelayList::new(store);

        assert!(relays.is_default());
        assert!(matches!(relays.remove("wss://x"), Err(RelayListError::NotFound(_))));
    }
}
