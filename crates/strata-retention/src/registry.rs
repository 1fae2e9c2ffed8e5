//! Registry of materialized versions.
//!
//! The registry tracks every committed version that still exists, whether
//! its data has been flushed, and the pins external consumers hold on it.
//! It owns record and pin lifetimes; the pruning side only ever receives
//! candidate version numbers from it.

use crate::pin::{HolderId, PinHandle, PinLease};
use crate::policy::{RetentionPolicy, Version};
use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap, HashMap};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors returned by registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid version {got}: expected {expected}")]
    InvalidVersion { expected: Version, got: Version },

    #[error("Unknown version: {0}")]
    UnknownVersion(Version),

    #[error("Version already pruned: {0}")]
    VersionAlreadyPruned(Version),
}

impl RegistryError {
    /// A non-monotonic commit means the caller's history is corrupt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RegistryError::InvalidVersion { .. })
    }

    /// The version the failed operation referred to.
    pub fn version(&self) -> Version {
        match self {
            RegistryError::InvalidVersion { got, .. } => *got,
            RegistryError::UnknownVersion(v) | RegistryError::VersionAlreadyPruned(v) => *v,
        }
    }
}

/// State tracked for one committed version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: Version,
    pub durable: bool,
    pub pin_count: u32,
}

impl VersionRecord {
    fn committed(version: Version) -> Self {
        VersionRecord {
            version,
            durable: false,
            pin_count: 0,
        }
    }
}

/// Tracks live versions, their durability, and outstanding pins.
#[derive(Debug, Default)]
pub struct VersionRegistry {
    /// Live records keyed by version.
    records: BTreeMap<Version, VersionRecord>,

    /// Records whose physical deletion is in progress.
    in_flight: BTreeMap<Version, VersionRecord>,

    /// Outstanding pins keyed by lease id.
    leases: HashMap<u64, PinLease>,

    /// Highest version ever committed.
    last_version: Version,

    next_pin_id: u64,
}

impl VersionRegistry {
    /// Create an empty registry expecting version 1 as the first commit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry whose next commit must be `last_version + 1`.
    pub fn starting_after(last_version: Version) -> Self {
        VersionRegistry {
            last_version,
            ..Default::default()
        }
    }

    /// Rebuild from the versions found in the backing store.
    ///
    /// Each entry is `(version, durable)`. The highest version becomes
    /// `last_version`; pins do not survive a restart.
    pub fn rebuild<I>(stored: I) -> Self
    where
        I: IntoIterator<Item = (Version, bool)>,
    {
        let mut registry = VersionRegistry::new();
        for (version, durable) in stored {
            registry.records.insert(
                version,
                VersionRecord {
                    version,
                    durable,
                    pin_count: 0,
                },
            );
            registry.last_version = registry.last_version.max(version);
        }
        registry
    }

    /// Highest committed version (0 if nothing was committed).
    pub fn last_version(&self) -> Version {
        self.last_version
    }

    /// Number of live versions.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get the record of a live version.
    pub fn get(&self, version: Version) -> Option<&VersionRecord> {
        self.records.get(&version)
    }

    pub fn contains(&self, version: Version) -> bool {
        self.records.contains_key(&version)
    }

    /// All live versions, oldest first.
    pub fn versions(&self) -> Vec<Version> {
        self.records.keys().copied().collect()
    }

    /// Newest live version whose data is durable.
    pub fn latest_durable(&self) -> Option<Version> {
        self.records
            .values()
            .rev()
            .find(|r| r.durable)
            .map(|r| r.version)
    }

    /// Record a newly committed version.
    pub fn record_commit(&mut self, version: Version) -> Result<(), RegistryError> {
        let Some(expected) = self.last_version.checked_add(1) else {
            return Err(RegistryError::InvalidVersion {
                expected: self.last_version,
                got: version,
            });
        };
        if version != expected {
            return Err(RegistryError::InvalidVersion {
                expected,
                got: version,
            });
        }

        self.records
            .insert(version, VersionRecord::committed(version));
        self.last_version = version;
        Ok(())
    }

    /// Mark a version as flushed. Returns `false` if it already was.
    pub fn mark_durable(&mut self, version: Version) -> Result<bool, RegistryError> {
        let record = self
            .records
            .get_mut(&version)
            .ok_or(RegistryError::UnknownVersion(version))?;

        if record.durable {
            return Ok(false);
        }
        record.durable = true;
        Ok(true)
    }

    /// Pin a version so it cannot be deleted until released.
    pub fn pin(
        &mut self,
        version: Version,
        holder: impl Into<HolderId>,
    ) -> Result<PinHandle, RegistryError> {
        self.acquire(version, holder.into(), None)
    }

    /// Pin a version with a deadline after which the pin lapses.
    pub fn pin_with_ttl(
        &mut self,
        version: Version,
        holder: impl Into<HolderId>,
        ttl: Duration,
        now: Instant,
    ) -> Result<PinHandle, RegistryError> {
        self.acquire(version, holder.into(), Some(now + ttl))
    }

    fn acquire(
        &mut self,
        version: Version,
        holder: HolderId,
        expires_at: Option<Instant>,
    ) -> Result<PinHandle, RegistryError> {
        if version > self.last_version {
            return Err(RegistryError::UnknownVersion(version));
        }

        let record = self
            .records
            .get_mut(&version)
            .ok_or(RegistryError::VersionAlreadyPruned(version))?;
        record.pin_count += 1;

        let handle = PinHandle::new(self.next_pin_id, version, holder);
        self.next_pin_id += 1;
        self.leases.insert(
            handle.id(),
            PinLease {
                handle: handle.clone(),
                expires_at,
            },
        );
        Ok(handle)
    }

    /// Release a pin. Releasing twice is a no-op; returns whether a pin was released.
    pub fn unpin(&mut self, handle: &PinHandle) -> bool {
        match self.leases.remove(&handle.id()) {
            Some(lease) => {
                self.drop_pin(lease.handle.version());
                true
            }
            None => false,
        }
    }

    /// Release every pin held by `holder`.
    pub fn release_holder(&mut self, holder: &HolderId) -> Vec<PinHandle> {
        self.release_where(|lease| lease.handle.holder() == holder)
    }

    /// Release every pin whose deadline is at or before `now`.
    pub fn expire_pins(&mut self, now: Instant) -> Vec<PinHandle> {
        self.release_where(|lease| lease.is_expired(now))
    }

    fn release_where<F>(&mut self, pred: F) -> Vec<PinHandle>
    where
        F: Fn(&PinLease) -> bool,
    {
        let ids: Vec<u64> = self
            .leases
            .iter()
            .filter(|(_, lease)| pred(lease))
            .map(|(id, _)| *id)
            .collect();

        let mut released = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(lease) = self.leases.remove(&id) {
                self.drop_pin(lease.handle.version());
                released.push(lease.handle);
            }
        }
        released.sort_by_key(|h| h.id());
        released
    }

    fn drop_pin(&mut self, version: Version) {
        if let Some(record) = self.records.get_mut(&version) {
            record.pin_count = record.pin_count.saturating_sub(1);
        }
    }

    /// Current pin count of a version (0 if unknown).
    pub fn pin_count(&self, version: Version) -> u32 {
        self.records.get(&version).map_or(0, |r| r.pin_count)
    }

    /// Number of outstanding pins.
    pub fn active_pins(&self) -> usize {
        self.leases.len()
    }

    /// Versions that may be deleted at `height`, oldest first.
    ///
    /// A candidate is outside the policy's retained set, unpinned, and
    /// covered by durable storage (it is durable itself or a newer live
    /// version is). The iterator borrows the registry; call again to restart.
    pub fn prunable_candidates(&self, height: Version, policy: &RetentionPolicy) -> Candidates<'_> {
        let range = self
            .latest_durable()
            .map(|floor| self.records.range(..=floor));

        Candidates {
            range,
            height,
            policy: *policy,
        }
    }

    /// Whether a single live version is currently a deletion candidate.
    pub fn is_prunable(&self, version: Version, height: Version, policy: &RetentionPolicy) -> bool {
        let Some(record) = self.records.get(&version) else {
            return false;
        };
        let covered = self.latest_durable().is_some_and(|floor| version <= floor);
        covered && is_eligible(record, height, policy)
    }

    /// Claim a version for deletion.
    ///
    /// Re-checks eligibility and moves the record out of the live set, so
    /// pins requested from here on fail. Returns `false` if the version is
    /// no longer a candidate (for example, it was pinned after enumeration).
    pub fn begin_delete(&mut self, version: Version, height: Version, policy: &RetentionPolicy) -> bool {
        if !self.is_prunable(version, height, policy) {
            return false;
        }
        match self.records.remove(&version) {
            Some(record) => {
                self.in_flight.insert(version, record);
                true
            }
            None => false,
        }
    }

    /// Forget a version after the store confirmed its deletion.
    pub fn finish_delete(&mut self, version: Version) -> Option<VersionRecord> {
        self.in_flight.remove(&version)
    }

    /// Put a version back after its deletion failed.
    pub fn abort_delete(&mut self, version: Version) {
        if let Some(record) = self.in_flight.remove(&version) {
            self.records.insert(version, record);
        }
    }

    /// Versions whose deletion has been claimed but not confirmed.
    pub fn deleting(&self) -> Vec<Version> {
        self.in_flight.keys().copied().collect()
    }
}

fn is_eligible(record: &VersionRecord, height: Version, policy: &RetentionPolicy) -> bool {
    record.pin_count == 0 && !policy.is_always_retained(record.version, height)
}

/// Lazy, oldest-first sequence of deletion candidates.
#[derive(Clone)]
pub struct Candidates<'a> {
    range: Option<btree_map::Range<'a, Version, VersionRecord>>,
    height: Version,
    policy: RetentionPolicy,
}

impl Iterator for Candidates<'_> {
    type Item = Version;

    fn next(&mut self) -> Option<Version> {
        let range = self.range.as_mut()?;
        range
            .by_ref()
            .map(|(_, record)| record)
            .find(|record| is_eligible(record, self.height, &self.policy))
            .map(|record| record.version)
    }
}
