//! Configuring registry: advisory exclusion markers for entities that
//! are mid-provisioning.
//!
//! A provisioning operation acquires a [`ConfiguringGuard`] before it
//! starts; the guard clears the marker when dropped, so every exit path
//! (success, error, panic unwind) releases it. Markers also carry an
//! expiry so a crashed process cannot exclude an entity forever.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::{ConfiguringMarker, epoch_secs};

/// Registry of configuring markers, shared by the reconciler and the
/// provisioning paths.
#[derive(Clone)]
pub struct ConfiguringRegistry {
    state: StateStore,
    ttl: Duration,
}

impl ConfiguringRegistry {
    pub fn new(state: StateStore, ttl: Duration) -> Self {
        Self { state, ttl }
    }

    /// Mark an entity as configuring for the registry's default TTL.
    pub fn acquire(&self, entity_id: &str) -> StateResult<ConfiguringGuard> {
        self.acquire_for(entity_id, self.ttl)
    }

    pub fn acquire_for(&self, entity_id: &str, ttl: Duration) -> StateResult<ConfiguringGuard> {
        let marker = ConfiguringMarker {
            entity_id: entity_id.to_string(),
            until: epoch_secs() + ttl.as_secs().max(1),
        };
        self.state.put_marker(&marker)?;
        debug!(%entity_id, until = marker.until, "entity marked configuring");
        Ok(ConfiguringGuard {
            registry: self.clone(),
            entity_id: entity_id.to_string(),
            armed: true,
        })
    }

    /// Whether an unexpired marker exists for the entity.
    pub fn is_configuring(&self, entity_id: &str) -> StateResult<bool> {
        let now = epoch_secs();
        Ok(self
            .state
            .get_marker(entity_id)?
            .is_some_and(|m| !m.is_expired(now)))
    }

    /// Ids of all entities currently configuring.
    pub fn active(&self) -> StateResult<HashSet<String>> {
        let now = epoch_secs();
        Ok(self
            .state
            .list_markers()?
            .into_iter()
            .filter(|m| !m.is_expired(now))
            .map(|m| m.entity_id)
            .collect())
    }

    pub fn release(&self, entity_id: &str) -> StateResult<()> {
        if self.state.delete_marker(entity_id)? {
            debug!(%entity_id, "configuring marker cleared");
        }
        Ok(())
    }

    /// Remove expired markers. Returns the purged entity ids.
    pub fn purge_expired(&self) -> StateResult<Vec<String>> {
        let now = epoch_secs();
        let mut purged = Vec::new();
        for marker in self.state.list_markers()? {
            if marker.is_expired(now) {
                self.state.delete_marker(&marker.entity_id)?;
                purged.push(marker.entity_id);
            }
        }
        if !purged.is_empty() {
            debug!(count = purged.len(), "expired configuring markers purged");
        }
        Ok(purged)
    }
}

/// Scoped configuring marker; cleared on drop.
#[must_use = "the marker is cleared as soon as the guard is dropped"]
pub struct ConfiguringGuard {
    registry: ConfiguringRegistry,
    entity_id: String,
    armed: bool,
}

impl ConfiguringGuard {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Clear the marker now, surfacing storage errors.
    pub fn release(mut self) -> StateResult<()> {
        self.armed = false;
        self.registry.release(&self.entity_id)
    }
}

impl Drop for ConfiguringGuard {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = self.registry.release(&self.entity_id)
        {
            warn!(entity_id = %self.entity_id, error = %e, "failed to clear configuring marker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConfiguringRegistry {
        ConfiguringRegistry::new(StateStore::open_in_memory().unwrap(), Duration::from_secs(600))
    }

    #[test]
    fn guard_clears_marker_on_drop() {
        let registry = registry();
        {
            let guard = registry.acquire("i-123").unwrap();
            assert_eq!(guard.entity_id(), "i-123");
            assert!(registry.is_configuring("i-123").unwrap());
        }
        assert!(!registry.is_configuring("i-123").unwrap());
    }

    #[test]
    fn guard_clears_marker_on_error_path() {
        fn provision(registry: &ConfiguringRegistry) -> Result<(), String> {
            let _guard = registry.acquire("i-456").map_err(|e| e.to_string())?;
            Err("boot failed".into())
        }
        let registry = registry();
        assert!(provision(&registry).is_err());
        assert!(!registry.is_configuring("i-456").unwrap());
    }

    #[test]
    fn explicit_release() {
        let registry = registry();
        let guard = registry.acquire("c1").unwrap();
        assert!(registry.active().unwrap().contains("c1"));
        guard.release().unwrap();
        assert!(registry.active().unwrap().is_empty());
    }

    #[test]
    fn expired_markers_are_ignored_and_purged() {
        let store = StateStore::open_in_memory().unwrap();
        let registry = ConfiguringRegistry::new(store.clone(), Duration::from_secs(600));
        store
            .put_marker(&ConfiguringMarker {
                entity_id: "stale".into(),
                until: epoch_secs().saturating_sub(5),
            })
            .unwrap();
        let _live = registry.acquire("live").unwrap();

        assert!(!registry.is_configuring("stale").unwrap());
        assert_eq!(registry.purge_expired().unwrap(), vec!["stale".to_string()]);
        assert!(store.get_marker("stale").unwrap().is_none());
        assert!(registry.is_configuring("live").unwrap());
    }
}
