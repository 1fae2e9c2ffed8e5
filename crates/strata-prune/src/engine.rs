//! The retention engine: the single entry point for the commit layer and
//! for consumers of historical versions.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::executor::{PruneStats, PruningExecutor, SweepOutcome, SweepReport};
use crate::scheduler::{CommitOutcome, FlushScheduler, SweepTrigger};
use crate::store::VersionStore;
use crate::SharedRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_retention::{HolderId, PinHandle, RetentionPolicy, Version, VersionRegistry};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Events emitted by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// A version was committed.
    Committed { version: Version, durable: bool },
    /// A version was persisted, either on its own commit or on retry.
    Flushed { version: Version },
    /// Persisting a flush-due version failed.
    FlushFailed { version: Version, error: String },
    /// A pin was granted.
    Pinned { version: Version, holder: HolderId },
    /// A pin was released or expired.
    Unpinned { version: Version, holder: HolderId },
    /// A version was deleted from the store.
    Pruned { version: Version },
    /// A sweep went through its candidates.
    SweepFinished { pruned: usize, skipped: usize },
    /// A sweep was abandoned after a store failure.
    SweepFailed { version: Version, error: String },
}

/// Drives flushing and pruning for one versioned store.
pub struct RetentionEngine<S: VersionStore> {
    config: EngineConfig,
    policy: RetentionPolicy,
    store: Arc<S>,
    registry: SharedRegistry,
    scheduler: FlushScheduler<S>,
    executor: Arc<PruningExecutor<S>>,
    trigger: Arc<SweepTrigger>,
    event_tx: broadcast::Sender<EngineEvent>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: VersionStore> RetentionEngine<S> {
    /// Open the engine over `store`.
    ///
    /// The registry is rebuilt from the versions the store reports; nothing
    /// kept in memory by a previous process is trusted. When background
    /// sweeps are enabled this must be called inside a tokio runtime.
    pub async fn open(store: Arc<S>, config: EngineConfig) -> Result<Self> {
        let policy = config.policy()?;
        let stored = store.versions().await?;
        let registry = VersionRegistry::rebuild(stored.iter().map(|s| (s.version, s.durable)));
        info!(
            last_version = registry.last_version(),
            versions = registry.len(),
            %policy,
            "rebuilt version registry from store"
        );

        let registry: SharedRegistry = Arc::new(Mutex::new(registry));
        let trigger = Arc::new(SweepTrigger::new());
        let scheduler =
            FlushScheduler::new(store.clone(), registry.clone(), policy, trigger.clone());
        let executor = Arc::new(PruningExecutor::new(
            store.clone(),
            registry.clone(),
            policy,
            config.sweep.clone(),
        ));
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = if config.background_sweeps {
            Some(tokio::spawn(run_worker(
                executor.clone(),
                trigger.clone(),
                registry.clone(),
                event_tx.clone(),
                shutdown_rx,
                config.pin_expiry_interval(),
            )))
        } else {
            None
        };

        let has_worker = worker.is_some();
        let engine = RetentionEngine {
            config,
            policy,
            store,
            registry,
            scheduler,
            executor,
            trigger,
            event_tx,
            shutdown_tx,
            worker: Mutex::new(worker),
        };

        // Versions left prunable by an interrupted sweep are picked up right away.
        if has_worker {
            engine.trigger.request();
        }
        Ok(engine)
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Handle a version the store just produced.
    pub async fn on_commit(&self, version: Version) -> Result<CommitOutcome> {
        match self.scheduler.on_commit(version).await {
            Ok(outcome) => {
                for &flushed in &outcome.flushed {
                    let _ = self.event_tx.send(EngineEvent::Flushed { version: flushed });
                }
                let _ = self.event_tx.send(EngineEvent::Committed {
                    version,
                    durable: outcome.durable,
                });
                Ok(outcome)
            }
            Err(e) => {
                if e.is_retryable() {
                    let _ = self.event_tx.send(EngineEvent::FlushFailed {
                        version,
                        error: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    /// Pin a version for `holder`, applying the configured default TTL.
    pub fn request_pin(&self, version: Version, holder: impl Into<HolderId>) -> Result<PinHandle> {
        match self.config.pin_ttl() {
            Some(ttl) => self.request_pin_for(version, holder, ttl),
            None => {
                let handle = self.registry.lock().pin(version, holder)?;
                self.announce_pin(&handle);
                Ok(handle)
            }
        }
    }

    /// Pin a version for at most `ttl`.
    pub fn request_pin_for(
        &self,
        version: Version,
        holder: impl Into<HolderId>,
        ttl: Duration,
    ) -> Result<PinHandle> {
        let handle = self
            .registry
            .lock()
            .pin_with_ttl(version, holder, ttl, Instant::now())?;
        self.announce_pin(&handle);
        Ok(handle)
    }

    fn announce_pin(&self, handle: &PinHandle) {
        debug!(version = handle.version(), holder = %handle.holder(), "pin granted");
        let _ = self.event_tx.send(EngineEvent::Pinned {
            version: handle.version(),
            holder: handle.holder().clone(),
        });
    }

    /// Release a pin. Releasing twice is harmless.
    pub fn release_pin(&self, handle: &PinHandle) -> bool {
        let released = self.registry.lock().unpin(handle);
        if released {
            self.announce_release(handle);
            self.trigger.request();
        }
        released
    }

    /// Release every pin held by `holder`.
    pub fn release_holder(&self, holder: &HolderId) -> usize {
        let released = self.registry.lock().release_holder(holder);
        for handle in &released {
            self.announce_release(handle);
        }
        if !released.is_empty() {
            self.trigger.request();
        }
        released.len()
    }

    fn announce_release(&self, handle: &PinHandle) {
        debug!(version = handle.version(), holder = %handle.holder(), "pin released");
        let _ = self.event_tx.send(EngineEvent::Unpinned {
            version: handle.version(),
            holder: handle.holder().clone(),
        });
    }

    /// Live versions, oldest first.
    pub fn retained_versions(&self) -> Vec<Version> {
        self.registry.lock().versions()
    }

    pub fn last_version(&self) -> Version {
        self.registry.lock().last_version()
    }

    /// Whether `version` is live and flushed.
    pub fn is_durable(&self, version: Version) -> bool {
        self.registry.lock().get(version).is_some_and(|r| r.durable)
    }

    /// Current pin count of `version`.
    pub fn pin_count(&self, version: Version) -> u32 {
        self.registry.lock().pin_count(version)
    }

    /// Flush-due versions whose persist is still pending a retry.
    pub fn unflushed(&self) -> Vec<Version> {
        self.scheduler.unflushed()
    }

    pub fn stats(&self) -> PruneStats {
        self.executor.stats()
    }

    /// Ask the background worker for a sweep. Returns `false` if one is
    /// already pending.
    pub fn trigger_sweep(&self) -> bool {
        self.trigger.request()
    }

    /// Sweep on the caller's task until no further progress is possible.
    ///
    /// Runs even after [`shutdown`](Self::shutdown). Stops at the first store
    /// failure; the failure is in the returned report.
    pub async fn settle(&self) -> SweepReport {
        let (_hold, shutdown) = watch::channel(false);
        self.trigger.take();
        let mut report = self.executor.sweep(&shutdown).await;
        publish_report(&self.event_tx, &report);
        while report.outcome == SweepOutcome::Limited {
            let next = self.executor.sweep(&shutdown).await;
            publish_report(&self.event_tx, &next);
            report.absorb(next);
        }
        report
    }

    /// Stop the background worker.
    ///
    /// A deletion already handed to the store completes before this returns.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "sweep worker terminated abnormally");
            }
        }
        info!(last_version = self.last_version(), "retention engine stopped");
    }
}

impl<S: VersionStore> Drop for RetentionEngine<S> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn publish_report(events: &broadcast::Sender<EngineEvent>, report: &SweepReport) {
    for &version in &report.pruned {
        let _ = events.send(EngineEvent::Pruned { version });
    }
    match &report.outcome {
        SweepOutcome::Aborted { version, error } => {
            let _ = events.send(EngineEvent::SweepFailed {
                version: *version,
                error: error.to_string(),
            });
        }
        _ => {
            if !report.pruned.is_empty() || !report.skipped.is_empty() {
                let _ = events.send(EngineEvent::SweepFinished {
                    pruned: report.pruned.len(),
                    skipped: report.skipped.len(),
                });
            }
        }
    }
}

async fn run_worker<S: VersionStore>(
    executor: Arc<PruningExecutor<S>>,
    trigger: Arc<SweepTrigger>,
    registry: SharedRegistry,
    events: broadcast::Sender<EngineEvent>,
    mut shutdown: watch::Receiver<bool>,
    expiry_interval: Duration,
) {
    let mut ticker = tokio::time::interval(expiry_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!("sweep worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = trigger.notified() => {
                trigger.take();
                let report = executor.sweep(&shutdown).await;
                publish_report(&events, &report);
                if report.outcome == SweepOutcome::Limited {
                    trigger.request();
                }
            }
            _ = ticker.tick() => {
                let expired = registry.lock().expire_pins(Instant::now());
                if !expired.is_empty() {
                    for handle in &expired {
                        info!(version = handle.version(), holder = %handle.holder(), "pin expired");
                        let _ = events.send(EngineEvent::Unpinned {
                            version: handle.version(),
                            holder: handle.holder().clone(),
                        });
                    }
                    trigger.request();
                }
            }
        }

        if *shutdown.borrow() {
            break;
        }
    }

    debug!("sweep worker stopped");
}
