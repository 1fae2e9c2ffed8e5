//! # strata-prune
//!
//! Flush scheduling and garbage collection for the Strata versioned store.
//!
//! This crate provides:
//! - [`RetentionEngine`]: the entry point for commits and pins
//! - [`FlushScheduler`]: synchronous flushing of policy-selected versions
//! - [`PruningExecutor`]: oldest-first, one-at-a-time deletion sweeps
//! - [`VersionStore`]: the seam to the storage that holds version data
//!
//! ## Architecture
//!
//! ```text
//! commit layer ──on_commit──▶ FlushScheduler ──persist──▶ VersionStore
//!                                  │                          ▲
//!                            SweepTrigger                     │ delete
//!                                  ▼                          │
//!                          sweep worker ──▶ PruningExecutor ──┘
//! ```
//!
//! The registry is shared behind a single lock by the commit path, pin
//! callers, and the sweep worker.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strata_prune::{EngineConfigBuilder, MemoryVersionStore, RetentionEngine};
//! use strata_retention::PruningStrategy;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryVersionStore::new());
//! let config = EngineConfigBuilder::new()
//!     .strategy(PruningStrategy::Everything)
//!     .background_sweeps(false)
//!     .build();
//! let engine = RetentionEngine::open(store.clone(), config).await.unwrap();
//!
//! for version in 1..=5 {
//!     store.save(version);
//!     engine.on_commit(version).await.unwrap();
//! }
//! engine.settle().await;
//! assert_eq!(engine.retained_versions(), vec![5]);
//! # });
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod scheduler;
pub mod store;

use parking_lot::Mutex;
use std::sync::Arc;
use strata_retention::VersionRegistry;

/// Registry shared between the commit path, pin callers, and the sweep worker.
pub type SharedRegistry = Arc<Mutex<VersionRegistry>>;

pub use config::{EngineConfig, EngineConfigBuilder, SweepConfig};
pub use engine::{EngineEvent, RetentionEngine};
pub use error::{EngineError, Result, StoreError};
pub use executor::{PruneStats, PruningExecutor, SweepOutcome, SweepReport};
pub use scheduler::{CommitOutcome, FlushScheduler, SweepTrigger};
pub use store::{MemoryVersionStore, StoredVersion, VersionStore};
