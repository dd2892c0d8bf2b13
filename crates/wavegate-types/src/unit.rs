//! Service unit declarations
//!
//! A ServiceUnit is one independently deployable platform component targeting
//! exactly one cluster. Units are immutable once a plan has been built.

use crate::serde_helpers::{duration_secs, option_duration_secs};
use crate::{ClusterId, UnitName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Reference to the manifest applied for a unit (path, URL or reconciler app source)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestRef(String);

impl ManifestRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ManifestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exponential backoff policy for apply and health-gate attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,

    /// Multiplier applied per subsequent retry
    pub factor: u32,

    /// Upper bound for any single delay
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            factor: 2,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `retry` (1-based): `min(base * factor^(retry-1), max)`.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let multiplier = self.factor.max(1).checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts_made`.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// A deployable component bound to one target cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceUnit {
    /// Unique unit name
    pub name: UnitName,

    /// Target cluster context
    pub cluster: ClusterId,

    /// Manifest to apply
    pub manifest: ManifestRef,

    /// Explicit wave hint; computed from dependencies when absent
    #[serde(default)]
    pub wave: Option<u32>,

    /// Units that must be healthy in an earlier wave
    #[serde(default)]
    pub requires: BTreeSet<UnitName>,

    /// Health gate timeout override
    #[serde(default, with = "option_duration_secs")]
    pub health_timeout: Option<Duration>,

    /// Retry policy override
    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    /// A best-effort unit never blocks or fails its wave
    #[serde(default)]
    pub best_effort: bool,
}

impl ServiceUnit {
    pub fn new(
        name: impl Into<String>,
        cluster: impl Into<String>,
        manifest: impl Into<String>,
    ) -> Self {
        Self {
            name: UnitName::new(name),
            cluster: ClusterId::new(cluster),
            manifest: ManifestRef::new(manifest),
            wave: None,
            requires: BTreeSet::new(),
            health_timeout: None,
            retry: None,
            best_effort: false,
        }
    }

    pub fn requires(mut self, dependency: impl Into<String>) -> Self {
        self.requires.insert(UnitName::new(dependency));
        self
    }

    pub fn in_wave(mut self, wave: u32) -> Self {
        self.wave = Some(wave);
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }
}
