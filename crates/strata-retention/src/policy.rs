//! Retention policy for committed versions.
//!
//! A policy combines two rules: a recency window (`keep_recent`) that keeps
//! the newest versions around for rollback and historical queries, and an
//! interval (`keep_every`) that selects which versions are flushed to durable
//! storage and kept permanently.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Height of one committed snapshot of the store.
pub type Version = u64;

/// Errors raised while building a policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("keep_every must be at least 1")]
    ZeroInterval,

    #[error("Unknown pruning strategy: {0}")]
    UnknownStrategy(String),
}

/// Decides which versions are flushed and which are always retained.
///
/// Policies are immutable values; the registry and the scheduler each hold
/// their own copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPolicy")]
pub struct RetentionPolicy {
    keep_recent: u64,
    keep_every: u64,
}

#[derive(Deserialize)]
struct RawPolicy {
    keep_recent: u64,
    keep_every: u64,
}

impl TryFrom<RawPolicy> for RetentionPolicy {
    type Error = PolicyError;

    fn try_from(raw: RawPolicy) -> Result<Self, Self::Error> {
        RetentionPolicy::new(raw.keep_recent, raw.keep_every)
    }
}

impl RetentionPolicy {
    /// Create a policy. Fails if `keep_every` is zero.
    pub fn new(keep_recent: u64, keep_every: u64) -> Result<Self, PolicyError> {
        if keep_every == 0 {
            return Err(PolicyError::ZeroInterval);
        }
        Ok(RetentionPolicy {
            keep_recent,
            keep_every,
        })
    }

    /// Keep only the newest version.
    pub const fn everything() -> Self {
        RetentionPolicy {
            keep_recent: 1,
            keep_every: 1,
        }
    }

    /// Keep every version forever.
    pub const fn nothing() -> Self {
        RetentionPolicy {
            keep_recent: 0,
            keep_every: 1,
        }
    }

    /// Keep the last 10 versions plus every 10th version.
    pub const fn syncable() -> Self {
        RetentionPolicy {
            keep_recent: 10,
            keep_every: 10,
        }
    }

    /// How many of the newest versions are always kept.
    pub fn keep_recent(&self) -> u64 {
        self.keep_recent
    }

    /// Interval of versions that are flushed to disk.
    pub fn keep_every(&self) -> u64 {
        self.keep_every
    }

    /// Whether `version` is written to durable storage when committed.
    pub fn should_flush(&self, version: Version) -> bool {
        version % self.keep_every == 0
    }

    /// Whether `version` falls inside the recency window at `height`.
    ///
    /// A window of zero is disabled.
    pub fn in_recent_window(&self, version: Version, height: Version) -> bool {
        height.saturating_sub(version) < self.keep_recent
    }

    /// Whether `version` is kept permanently because of the interval.
    ///
    /// With `keep_every == 1` every version is flushed; it only becomes
    /// permanent when no recency window is configured. Otherwise the window
    /// alone governs what is kept.
    pub fn is_interval_retained(&self, version: Version) -> bool {
        if self.keep_every == 1 && self.keep_recent > 0 {
            return false;
        }
        self.should_flush(version)
    }

    /// Whether `version` must not be pruned at `height`, ignoring pins.
    pub fn is_always_retained(&self, version: Version, height: Version) -> bool {
        self.in_recent_window(version, height) || self.is_interval_retained(version)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::syncable()
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "keep_recent={} keep_every={}",
            self.keep_recent, self.keep_every
        )
    }
}

/// Named pruning strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruningStrategy {
    /// Delete all saved states, storing only the current state.
    Everything,
    /// Keep all historic states.
    Nothing,
    /// Delete only states not needed for state syncing.
    Syncable,
    /// Caller-provided window and interval.
    Custom { keep_recent: u64, keep_every: u64 },
}

impl PruningStrategy {
    /// Resolve the strategy into a validated policy.
    pub fn to_policy(self) -> Result<RetentionPolicy, PolicyError> {
        match self {
            PruningStrategy::Everything => Ok(RetentionPolicy::everything()),
            PruningStrategy::Nothing => Ok(RetentionPolicy::nothing()),
            PruningStrategy::Syncable => Ok(RetentionPolicy::syncable()),
            PruningStrategy::Custom {
                keep_recent,
                keep_every,
            } => RetentionPolicy::new(keep_recent, keep_every),
        }
    }
}

impl FromStr for PruningStrategy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "everything" => Ok(PruningStrategy::Everything),
            "nothing" => Ok(PruningStrategy::Nothing),
            "syncable" | "default" => Ok(PruningStrategy::Syncable),
            other => Err(PolicyError::UnknownStrategy(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retained(policy: &RetentionPolicy, height: Version) -> Vec<Version> {
        (1..=height)
            .filter(|v| policy.is_always_retained(*v, height))
            .collect()
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert_eq!(RetentionPolicy::new(5, 0), Err(PolicyError::ZeroInterval));
        assert!(RetentionPolicy::new(0, 1).is_ok());
    }

    #[test]
    fn test_should_flush_interval() {
        let policy = RetentionPolicy::new(0, 10).unwrap();

        assert!(policy.should_flush(0));
        assert!(policy.should_flush(10));
        assert!(policy.should_flush(20));
        assert!(!policy.should_flush(15));
        assert!(!policy.should_flush(1));
    }

    #[test]
    fn test_keep_every_one_flushes_all() {
        let policy = RetentionPolicy::everything();
        assert!((0..50).all(|v| policy.should_flush(v)));
    }

    #[test]
    fn test_everything_keeps_only_newest() {
        assert_eq!(retained(&RetentionPolicy::everything(), 5), vec![5]);
    }

    #[test]
    fn test_nothing_keeps_all() {
        assert_eq!(retained(&RetentionPolicy::nothing(), 5), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_syncable_window_and_interval() {
        let expected: Vec<Version> = vec![10, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25];
        assert_eq!(retained(&RetentionPolicy::syncable(), 25), expected);
    }

    #[test]
    fn test_zero_window_disabled() {
        let policy = RetentionPolicy::new(0, 5).unwrap();

        assert!(!policy.in_recent_window(7, 7));
        assert!(!policy.is_always_retained(7, 7));
        assert!(policy.is_always_retained(5, 7));
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "everything".parse::<PruningStrategy>(),
            Ok(PruningStrategy::Everything)
        );
        assert_eq!(" Nothing ".parse::<PruningStrategy>(), Ok(PruningStrategy::Nothing));
        assert_eq!(
            "default".parse::<PruningStrategy>(),
            Ok(PruningStrategy::Syncable)
        );
        assert!(matches!(
            "sometimes".parse::<PruningStrategy>(),
            Err(PolicyError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_strategy_to_policy() {
        assert_eq!(
            PruningStrategy::Syncable.to_policy().unwrap(),
            RetentionPolicy::syncable()
        );
        assert_eq!(
            PruningStrategy::Custom {
                keep_recent: 3,
                keep_every: 0
            }
            .to_policy(),
            Err(PolicyError::ZeroInterval)
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: RetentionPolicy =
            serde_json::from_str(r#"{"keep_recent":2,"keep_every":4}"#).unwrap();
        assert_eq!(ok.keep_recent(), 2);
        assert_eq!(ok.keep_every(), 4);

        let bad = serde_json::from_str::<RetentionPolicy>(r#"{"keep_recent":2,"keep_every":0}"#);
        assert!(bad.is_err());
    }
}
