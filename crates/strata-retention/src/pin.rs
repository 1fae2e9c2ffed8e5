//! Pins held by external consumers of historical versions.

use crate::policy::Version;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Identifies the consumer holding a pin (a snapshot export, a query, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderId(pub String);

impl HolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for HolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for HolderId {
    fn from(id: &str) -> Self {
        HolderId::new(id)
    }
}

/// Receipt for a pin. Pass it back to release the pin.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PinHandle {
    id: u64,
    version: Version,
    holder: HolderId,
}

impl PinHandle {
    pub(crate) fn new(id: u64, version: Version, holder: HolderId) -> Self {
        PinHandle {
            id,
            version,
            holder,
        }
    }

    /// Registry-unique lease number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The pinned version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// The consumer holding the pin.
    pub fn holder(&self) -> &HolderId {
        &self.holder
    }
}

/// A live pin and its optional deadline.
#[derive(Clone, Debug)]
pub(crate) struct PinLease {
    pub(crate) handle: PinHandle,
    pub(crate) expires_at: Option<Instant>,
}

impl PinLease {
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}
