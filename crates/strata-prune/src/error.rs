//! Error types for flushing and pruning.

use strata_retention::{PolicyError, RegistryError, Version};
use thiserror::Error;

/// Failure reported by the backing store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Persist failed for version {version}: {reason}")]
    Persist { version: Version, reason: String },

    #[error("Delete failed for version {version}: {reason}")]
    Delete { version: Version, reason: String },

    #[error("Listing stored versions failed: {0}")]
    Scan(String),
}

impl StoreError {
    /// The version the store was operating on, if any.
    pub fn version(&self) -> Option<Version> {
        match self {
            StoreError::Persist { version, .. } | StoreError::Delete { version, .. } => {
                Some(*version)
            }
            StoreError::Scan(_) => None,
        }
    }
}

/// Error type for engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Storage I/O error: {0}")]
    Storage(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] PolicyError),
}

impl EngineError {
    /// Whether the error means upstream state is corrupt and the caller should stop.
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Registry(e) => e.is_fatal(),
            EngineError::Storage(_) | EngineError::Config(_) => false,
        }
    }

    /// Whether retrying on the next trigger may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
