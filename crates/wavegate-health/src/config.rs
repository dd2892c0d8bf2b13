//! Health gate configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Polling behavior of the health gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthGateConfig {
    /// Interval between status reads.
    pub poll_interval: Duration,

    /// Timeout for units without their own.
    pub default_timeout: Duration,
}

impl Default for HealthGateConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            default_timeout: Duration::from_secs(600),
        }
    }
}
