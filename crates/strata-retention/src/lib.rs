//! # strata-retention
//!
//! Retention policy and version bookkeeping for the Strata versioned store.
//!
//! This crate provides:
//! - Retention policies: which versions are flushed and which are kept
//! - Named pruning strategies (`everything`, `nothing`, `syncable`)
//! - The version registry: live versions, durability, and pins
//! - Deletion candidates, yielded oldest first
//!
//! ## Example
//!
//! ```rust
//! use strata_retention::{RetentionPolicy, VersionRegistry};
//!
//! let policy = RetentionPolicy::everything();
//! let mut registry = VersionRegistry::new();
//!
//! for version in 1..=5 {
//!     registry.record_commit(version).unwrap();
//!     if policy.should_flush(version) {
//!         registry.mark_durable(version).unwrap();
//!     }
//! }
//!
//! let candidates: Vec<_> = registry.prunable_candidates(5, &policy).collect();
//! assert_eq!(candidates, vec![1, 2, 3, 4]);
//! ```

mod pin;
mod policy;
mod registry;

pub use pin::{HolderId, PinHandle};
pub use policy::{PolicyError, PruningStrategy, RetentionPolicy, Version};
pub use registry::{Candidates, RegistryError, VersionRecord, VersionRegistry};
