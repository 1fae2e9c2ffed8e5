//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use strata_retention::{PolicyError, PruningStrategy, RetentionPolicy};

/// Limits applied to a single pruning sweep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Maximum number of versions deleted per sweep (`None` = unbounded).
    pub max_deletions_per_sweep: Option<usize>,

    /// Pause between two deletions, in milliseconds.
    pub deletion_pause_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            max_deletions_per_sweep: None,
            deletion_pause_ms: 0,
        }
    }
}

impl SweepConfig {
    /// Per-sweep deletion limit. A limit of zero is treated as one so every
    /// sweep makes progress.
    pub fn deletion_limit(&self) -> Option<usize> {
        self.max_deletions_per_sweep.map(|limit| limit.max(1))
    }

    pub fn deletion_pause(&self) -> Duration {
        Duration::from_millis(self.deletion_pause_ms)
    }
}

/// Configuration for the retention engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Which versions are flushed and retained.
    pub strategy: PruningStrategy,

    /// Sweep batching and throttling.
    pub sweep: SweepConfig,

    /// Deadline applied to pins requested without an explicit TTL.
    pub pin_ttl_ms: Option<u64>,

    /// How often expired pins are collected (in milliseconds).
    pub pin_expiry_interval_ms: u64,

    /// Run sweeps on a background task after each commit.
    pub background_sweeps: bool,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            strategy: PruningStrategy::Syncable,
            sweep: SweepConfig::default(),
            pin_ttl_ms: None,
            pin_expiry_interval_ms: 1000,
            background_sweeps: true,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The validated retention policy.
    pub fn policy(&self) -> Result<RetentionPolicy, PolicyError> {
        self.strategy.to_policy()
    }

    pub fn pin_ttl(&self) -> Option<Duration> {
        self.pin_ttl_ms.map(Duration::from_millis)
    }

    pub fn pin_expiry_interval(&self) -> Duration {
        Duration::from_millis(self.pin_expiry_interval_ms.max(1))
    }
}

/// Builder for engine configuration.
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn strategy(mut self, strategy: PruningStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn custom(mut self, keep_recent: u64, keep_every: u64) -> Self {
        self.config.strategy = PruningStrategy::Custom {
            keep_recent,
            keep_every,
        };
        self
    }

    pub fn max_deletions_per_sweep(mut self, limit: usize) -> Self {
        self.config.sweep.max_deletions_per_sweep = Some(limit);
        self
    }

    pub fn deletion_pause(mut self, ms: u64) -> Self {
        self.config.sweep.deletion_pause_ms = ms;
        self
    }

    pub fn pin_ttl(mut self, ms: u64) -> Self {
        self.config.pin_ttl_ms = Some(ms);
        self
    }

    pub fn pin_expiry_interval(mut self, ms: u64) -> Self {
        self.config.pin_expiry_interval_ms = ms;
        self
    }

    pub fn background_sweeps(mut self, enabled: bool) -> Self {
        self.config.background_sweeps = enabled;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
