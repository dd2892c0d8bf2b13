//! # Wavegate Health - Health gating and retry control
//!
//! After a unit is applied, the [`HealthGate`] polls the reconciler until the
//! unit is both Synced and Healthy or its timeout elapses. The
//! [`RetryController`] decides whether a failed attempt is tried again and
//! how long to wait first.
//!
//! The gate aggregates what the reconciler reports. It never decides for
//! itself what "healthy" means for a workload.
//!
//! ## Key Components
//!
//! - [`HealthGate`]: bounded polling of sync and health status
//! - [`RetryController`]: exponential backoff, bounded attempts, and error
//!   class filtering
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wavegate_cluster::{ClusterSpec, Credentials, InMemoryCluster, ResolvedContext};
//! use wavegate_health::{GateOutcome, HealthGate, HealthGateConfig};
//! use wavegate_types::ServiceUnit;
//!
//! # async fn example() {
//! let cluster = Arc::new(InMemoryCluster::new());
//! let gate = HealthGate::new(cluster, HealthGateConfig::default());
//!
//! let ctx = ResolvedContext::from_spec(&ClusterSpec::new("primary"), Credentials::ambient());
//! let unit = ServiceUnit::new("ingest", "primary", "apps/ingest.yaml");
//! match gate.wait_until_healthy(&ctx, &unit).await {
//!     GateOutcome::Healthy { .. } => println!("ready"),
//!     other => println!("not ready: {other:?}"),
//! }
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod gate;
pub mod retry;

pub use config::HealthGateConfig;
pub use error::{HealthError, HealthResult};
pub use gate::{GateOutcome, HealthGate};
pub use retry::{GiveUpReason, RetryController, RetryDecision, RetryFailure};
