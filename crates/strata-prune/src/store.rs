//! Backing store abstraction.
//!
//! The engine never touches version data itself. It asks a [`VersionStore`]
//! to persist, delete, and enumerate versions; the store is the source of
//! truth on restart.

use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use strata_retention::Version;

/// A version found in the backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoredVersion {
    pub version: Version,
    pub durable: bool,
}

/// Storage holding the data of each committed version.
#[async_trait]
pub trait VersionStore: Send + Sync + 'static {
    /// Write a version's data durably.
    async fn persist(&self, version: Version) -> Result<(), StoreError>;

    /// Physically remove a version's data.
    async fn delete(&self, version: Version) -> Result<(), StoreError>;

    /// Whether the store holds data for `version`.
    async fn has(&self, version: Version) -> bool;

    /// Every version currently held, with its durability bit.
    async fn versions(&self) -> Result<Vec<StoredVersion>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    durable: BTreeSet<Version>,
    ephemeral: BTreeSet<Version>,
    fail_persist: HashSet<Version>,
    fail_delete: HashSet<Version>,
    deletions: Vec<Version>,
    persists: Vec<Version>,
}

/// In-memory store for testing and simulation.
///
/// Versions written with [`save`](MemoryVersionStore::save) live in an
/// ephemeral tier until persisted. [`crash`](MemoryVersionStore::crash)
/// drops that tier, as a process restart would.
#[derive(Default)]
pub struct MemoryVersionStore {
    state: RwLock<MemoryState>,
    delete_delay: Duration,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every deletion take `delay` to complete.
    pub fn with_delete_delay(delay: Duration) -> Self {
        MemoryVersionStore {
            delete_delay: delay,
            ..Default::default()
        }
    }

    /// Write a version into the ephemeral tier (what the apply layer does on commit).
    pub fn save(&self, version: Version) {
        let mut state = self.state.write();
        if !state.durable.contains(&version) {
            state.ephemeral.insert(version);
        }
    }

    /// Fail the next persist of `version`.
    pub fn fail_persist_at(&self, version: Version) {
        self.state.write().fail_persist.insert(version);
    }

    /// Fail the next delete of `version`.
    pub fn fail_delete_at(&self, version: Version) {
        self.state.write().fail_delete.insert(version);
    }

    /// Drop everything that was never persisted.
    pub fn crash(&self) {
        self.state.write().ephemeral.clear();
    }

    /// All held versions, oldest first.
    pub fn stored(&self) -> Vec<Version> {
        let state = self.state.read();
        state.durable.union(&state.ephemeral).copied().collect()
    }

    /// Durable versions, oldest first.
    pub fn durable(&self) -> Vec<Version> {
        self.state.read().durable.iter().copied().collect()
    }

    /// Versions deleted so far, in deletion order.
    pub fn deletion_log(&self) -> Vec<Version> {
        self.state.read().deletions.clone()
    }

    /// Versions persisted so far, in persist order.
    pub fn persist_log(&self) -> Vec<Version> {
        self.state.read().persists.clone()
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn persist(&self, version: Version) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.fail_persist.remove(&version) {
            return Err(StoreError::Persist {
                version,
                reason: "injected persist failure".to_string(),
            });
        }
        if !state.ephemeral.remove(&version) && !state.durable.contains(&version) {
            return Err(StoreError::Persist {
                version,
                reason: "no data for version".to_string(),
            });
        }
        state.durable.insert(version);
        state.persists.push(version);
        Ok(())
    }

    async fn delete(&self, version: Version) -> Result<(), StoreError> {
        if !self.delete_delay.is_zero() {
            tokio::time::sleep(self.delete_delay).await;
        }

        let mut state = self.state.write();
        if state.fail_delete.remove(&version) {
            return Err(StoreError::Delete {
                version,
                reason: "injected delete failure".to_string(),
            });
        }
        // Deleting an absent version succeeds so interrupted sweeps can be replayed.
        state.durable.remove(&version);
        state.ephemeral.remove(&version);
        state.deletions.push(version);
        Ok(())
    }

    async fn has(&self, version: Version) -> bool {
        let state = self.state.read();
        state.durable.contains(&version) || state.ephemeral.contains(&version)
    }

    async fn versions(&self) -> Result<Vec<StoredVersion>, StoreError> {
        let state = self.state.read();
        let mut versions: Vec<StoredVersion> = state
            .durable
            .iter()
            .map(|&version| StoredVersion {
                version,
                durable: true,
            })
            .chain(state.ephemeral.iter().map(|&version| StoredVersion {
                version,
                durable: false,
            }))
            .collect();
        versions.sort_by_key(|s| s.version);
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_persist() {
        let store = MemoryVersionStore::new();
        store.save(1);
        store.save(2);

        store.persist(2).await.unwrap();
        assert_eq!(store.durable(), vec![2]);
        assert_eq!(store.stored(), vec![1, 2]);
        assert!(store.has(1).await);
    }

    #[tokio::test]
    async fn test_persist_unknown_fails() {
        let store = MemoryVersionStore::new();
        let err = store.persist(4).await.unwrap_err();
        assert_eq!(err.version(), Some(4));
    }

    #[tokio::test]
    async fn test_crash_drops_ephemeral() {
        let store = MemoryVersionStore::new();
        store.save(1);
        store.save(2);
        store.persist(1).await.unwrap();

        store.crash();

        let versions = store.versions().await.unwrap();
        assert_eq!(
            versions,
            vec![StoredVersion {
                version: 1,
                durable: true
            }]
        );
    }

    #[tokio::test]
    async fn test_injected_faults_fire_once() {
        let store = MemoryVersionStore::new();
        store.save(3);
        store.fail_delete_at(3);

        assert!(store.delete(3).await.is_err());
        assert!(store.has(3).await);
        store.delete(3).await.unwrap();
        assert!(!store.has(3).await);
        assert_eq!(store.deletion_log(), vec![3]);
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok() {
        let store = MemoryVersionStore::new();
        assert!(store.delete(42).await.is_ok());
    }
}
