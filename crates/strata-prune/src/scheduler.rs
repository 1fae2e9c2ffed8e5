//! Flush scheduling on the commit path.
//!
//! Every commit is recorded in the registry. Versions the policy marks for
//! flushing are persisted before the commit returns, so a successful commit
//! of such a version means it survives a crash. A pruning sweep is then
//! requested; requests are coalesced while one is already pending.

use crate::error::{EngineError, Result};
use crate::store::VersionStore;
use crate::SharedRegistry;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_retention::{RetentionPolicy, Version};
use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// Coalescing wake-up signal for the sweep worker.
#[derive(Debug, Default)]
pub struct SweepTrigger {
    pending: AtomicBool,
    notify: Notify,
}

impl SweepTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a sweep. Returns `false` if one was already pending.
    pub fn request(&self) -> bool {
        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.notify_one();
        true
    }

    /// Whether a sweep has been requested and not yet taken.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Clear the pending flag before running the requested sweep.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Wait until a sweep is requested.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Result of a successful commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitOutcome {
    pub version: Version,

    /// Whether this version is now durable.
    pub durable: bool,

    /// Every version flushed during this commit, including retried ones.
    pub flushed: Vec<Version>,

    /// Whether this commit enqueued a new sweep.
    pub sweep_requested: bool,
}

/// Decides, per commit, whether to flush, and requests pruning sweeps.
pub struct FlushScheduler<S: VersionStore> {
    store: Arc<S>,
    registry: SharedRegistry,
    policy: RetentionPolicy,
    trigger: Arc<SweepTrigger>,

    /// Flush-due versions whose persist failed.
    unflushed: Mutex<BTreeSet<Version>>,

    /// Serializes commits.
    commit_lock: tokio::sync::Mutex<()>,
}

impl<S: VersionStore> FlushScheduler<S> {
    pub fn new(
        store: Arc<S>,
        registry: SharedRegistry,
        policy: RetentionPolicy,
        trigger: Arc<SweepTrigger>,
    ) -> Self {
        FlushScheduler {
            store,
            registry,
            policy,
            trigger,
            unflushed: Mutex::new(BTreeSet::new()),
            commit_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Flush-due versions still waiting for a successful persist.
    pub fn unflushed(&self) -> Vec<Version> {
        self.unflushed.lock().iter().copied().collect()
    }

    /// Handle a newly committed version.
    ///
    /// Earlier versions whose flush failed are retried first. If any flush
    /// fails, the error is returned and the version stays queued; the commit
    /// itself remains recorded.
    pub async fn on_commit(&self, version: Version) -> Result<CommitOutcome> {
        let _serial = self.commit_lock.lock().await;

        let recorded = self.registry.lock().record_commit(version);
        if let Err(e) = recorded {
            if e.is_fatal() {
                error!(version, error = %e, "non-monotonic commit rejected");
            }
            return Err(e.into());
        }

        let mut due: Vec<Version> = std::mem::take(&mut *self.unflushed.lock())
            .into_iter()
            .collect();
        if self.policy.should_flush(version) {
            due.push(version);
        }

        let mut flushed = Vec::new();
        let mut failure = None;
        for v in due {
            if failure.is_some() {
                self.unflushed.lock().insert(v);
                continue;
            }
            match self.flush(v).await {
                Ok(true) => flushed.push(v),
                Ok(false) => {}
                Err(e) => {
                    warn!(version = v, error = %e, "flush failed; will retry on next commit");
                    self.unflushed.lock().insert(v);
                    failure = Some(e);
                }
            }
        }

        let sweep_requested = self.trigger.request();
        if !sweep_requested {
            debug!(version, "sweep already pending");
        }

        if let Some(e) = failure {
            return Err(e);
        }

        Ok(CommitOutcome {
            version,
            durable: flushed.contains(&version),
            flushed,
            sweep_requested,
        })
    }

    /// Persist a version and mark it durable. Returns `false` if it is gone.
    async fn flush(&self, version: Version) -> std::result::Result<bool, EngineError> {
        if !self.registry.lock().contains(version) {
            return Ok(false);
        }
        self.store.persist(version).await?;
        let marked = self.registry.lock().mark_durable(version);
        match marked {
            Ok(_) => {
                debug!(version, "flushed version");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryVersionStore;
    use strata_retention::{RegistryError, VersionRegistry};

    fn fixture(
        policy: RetentionPolicy,
    ) -> (
        Arc<MemoryVersionStore>,
        SharedRegistry,
        Arc<SweepTrigger>,
        FlushScheduler<MemoryVersionStore>,
    ) {
        let store = Arc::new(MemoryVersionStore::new());
        let registry: SharedRegistry = Arc::new(Mutex::new(VersionRegistry::new()));
        let trigger = Arc::new(SweepTrigger::new());
        let scheduler =
            FlushScheduler::new(store.clone(), registry.clone(), policy, trigger.clone());
        (store, registry, trigger, scheduler)
    }

    #[test]
    fn test_trigger_coalesces() {
        let trigger = SweepTrigger::new();
        assert!(trigger.request());
        assert!(!trigger.request());
        assert!(trigger.is_pending());

        assert!(trigger.take());
        assert!(!trigger.is_pending());
        assert!(trigger.request());
    }

    #[tokio::test]
    async fn test_flushes_only_on_interval() {
        let (store, registry, _trigger, scheduler) =
            fixture(RetentionPolicy::new(0, 3).unwrap());

        for v in 1..=6 {
            store.save(v);
            let outcome = scheduler.on_commit(v).await.unwrap();
            assert_eq!(outcome.durable, v % 3 == 0);
        }

        assert_eq!(store.durable(), vec![3, 6]);
        let registry = registry.lock();
        assert!(registry.get(3).unwrap().durable);
        assert!(!registry.get(4).unwrap().durable);
    }

    #[tokio::test]
    async fn test_only_one_sweep_enqueued() {
        let (store, _registry, trigger, scheduler) = fixture(RetentionPolicy::everything());

        store.save(1);
        assert!(scheduler.on_commit(1).await.unwrap().sweep_requested);
        store.save(2);
        assert!(!scheduler.on_commit(2).await.unwrap().sweep_requested);

        trigger.take();
        store.save(3);
        assert!(scheduler.on_commit(3).await.unwrap().sweep_requested);
    }

    #[tokio::test]
    async fn test_non_monotonic_commit_rejected() {
        let (store, _registry, _trigger, scheduler) = fixture(RetentionPolicy::everything());
        store.save(1);
        scheduler.on_commit(1).await.unwrap();

        let err = scheduler.on_commit(5).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::Registry(RegistryError::InvalidVersion {
                expected: 2,
                got: 5
            })
        );
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_failed_flush_retried_on_next_commit() {
        let (store, registry, _trigger, scheduler) =
            fixture(RetentionPolicy::new(0, 2).unwrap());

        store.save(1);
        scheduler.on_commit(1).await.unwrap();

        store.save(2);
        store.fail_persist_at(2);
        let err = scheduler.on_commit(2).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(scheduler.unflushed(), vec![2]);
        assert!(registry.lock().contains(2));
        assert!(!registry.lock().get(2).unwrap().durable);

        store.save(3);
        let outcome = scheduler.on_commit(3).await.unwrap();
        assert_eq!(outcome.flushed, vec![2]);
        assert!(!outcome.durable);
        assert!(scheduler.unflushed().is_empty());
        assert_eq!(store.durable(), vec![2]);
    }
}
