//! Crash-safe pruning sweeps.
//!
//! A sweep deletes the registry's candidates oldest first, one at a time,
//! waiting for each deletion to be confirmed before moving on. Interrupting
//! a sweep at any point leaves a prefix of the candidates removed, so the
//! next sweep simply recomputes candidates and continues.

use crate::config::SweepConfig;
use crate::error::StoreError;
use crate::store::VersionStore;
use crate::SharedRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use strata_retention::{RetentionPolicy, Version};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How a sweep ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Every candidate was handled.
    Completed,

    /// The per-sweep deletion limit was reached; more candidates remain.
    Limited,

    /// Shutdown was requested between two deletions.
    Cancelled,

    /// The store failed to delete `version`; the rest of the sweep was abandoned.
    Aborted { version: Version, error: StoreError },
}

/// Result of one sweep.
#[derive(Clone, Debug)]
pub struct SweepReport {
    /// Height at which candidates were enumerated.
    pub height: Version,

    /// Versions deleted, in deletion order.
    pub pruned: Vec<Version>,

    /// Candidates that were no longer deletable when their turn came.
    pub skipped: Vec<Version>,

    pub outcome: SweepOutcome,
}

impl SweepReport {
    fn new(height: Version) -> Self {
        SweepReport {
            height,
            pruned: Vec::new(),
            skipped: Vec::new(),
            outcome: SweepOutcome::Completed,
        }
    }

    /// Whether the sweep went through all of its candidates.
    pub fn is_complete(&self) -> bool {
        self.outcome == SweepOutcome::Completed
    }

    /// Fold a follow-up sweep into this report.
    pub fn absorb(&mut self, next: SweepReport) {
        self.height = next.height;
        self.pruned.extend(next.pruned);
        self.skipped.extend(next.skipped);
        self.outcome = next.outcome;
    }
}

/// Statistics about pruning sweeps.
#[derive(Clone, Debug, Default)]
pub struct PruneStats {
    /// Sweeps run.
    pub sweeps: u64,

    /// Versions deleted.
    pub versions_pruned: u64,

    /// Candidates skipped because they were pinned or no longer eligible.
    pub versions_skipped: u64,

    /// Sweeps aborted by a store failure.
    pub failed_sweeps: u64,

    /// Height of the last sweep.
    pub last_height: Option<Version>,
}

/// Deletes prunable versions from the backing store.
pub struct PruningExecutor<S: VersionStore> {
    store: Arc<S>,
    registry: SharedRegistry,
    policy: RetentionPolicy,
    config: SweepConfig,

    /// Held for the duration of a sweep.
    gate: tokio::sync::Mutex<()>,

    stats: Mutex<PruneStats>,
}

impl<S: VersionStore> PruningExecutor<S> {
    pub fn new(
        store: Arc<S>,
        registry: SharedRegistry,
        policy: RetentionPolicy,
        config: SweepConfig,
    ) -> Self {
        PruningExecutor {
            store,
            registry,
            policy,
            config,
            gate: tokio::sync::Mutex::new(()),
            stats: Mutex::new(PruneStats::default()),
        }
    }

    pub fn stats(&self) -> PruneStats {
        self.stats.lock().clone()
    }

    /// Run one sweep. Waits if another sweep is in progress.
    ///
    /// `shutdown` is checked between deletions only; a deletion that has
    /// started always runs to completion.
    pub async fn sweep(&self, shutdown: &watch::Receiver<bool>) -> SweepReport {
        let _gate = self.gate.lock().await;
        let mut shutdown = shutdown.clone();

        let limit = self.config.deletion_limit();
        let (height, mut candidates) = {
            let registry = self.registry.lock();
            let height = registry.last_version();
            let candidates: Vec<Version> = registry
                .prunable_candidates(height, &self.policy)
                .take(limit.unwrap_or(usize::MAX).saturating_add(1))
                .collect();
            (height, candidates)
        };

        let mut report = SweepReport::new(height);
        let limited = limit.is_some_and(|limit| candidates.len() > limit);
        if let Some(limit) = limit {
            candidates.truncate(limit);
        }

        debug!(height, candidates = candidates.len(), "starting pruning sweep");

        let pause = self.config.deletion_pause();
        for (i, version) in candidates.into_iter().enumerate() {
            if *shutdown.borrow() {
                report.outcome = SweepOutcome::Cancelled;
                break;
            }
            if i > 0 && !pause.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown.changed() => {
                        report.outcome = SweepOutcome::Cancelled;
                        break;
                    }
                }
            }

            let claimed = {
                let mut registry = self.registry.lock();
                let current = registry.last_version();
                registry.begin_delete(version, current, &self.policy)
            };
            if !claimed {
                debug!(version, "skipping version no longer prunable");
                report.skipped.push(version);
                continue;
            }

            match self.store.delete(version).await {
                Ok(()) => {
                    self.registry.lock().finish_delete(version);
                    debug!(version, "pruned version");
                    report.pruned.push(version);
                }
                Err(error) => {
                    self.registry.lock().abort_delete(version);
                    warn!(version, %error, "pruning sweep aborted");
                    report.outcome = SweepOutcome::Aborted { version, error };
                    break;
                }
            }
        }

        if limited && report.outcome == SweepOutcome::Completed {
            report.outcome = SweepOutcome::Limited;
        }

        self.record(&report);
        if !report.pruned.is_empty() {
            info!(
                height,
                pruned = report.pruned.len(),
                skipped = report.skipped.len(),
                "pruning sweep finished"
            );
        }
        report
    }

    fn record(&self, report: &SweepReport) {
        let mut stats = self.stats.lock();
        stats.sweeps += 1;
        stats.versions_pruned += report.pruned.len() as u64;
        stats.versions_skipped += report.skipped.len() as u64;
        if matches!(report.outcome, SweepOutcome::Aborted { .. }) {
            stats.failed_sweeps += 1;
        }
        stats.last_height = Some(report.height);
    }
}
