//! Wavegate Deployment Engine
//!
//! Runs a [`WavePlan`](wavegate_types::WavePlan) wave by wave: verify
//! contexts, snapshot, apply, gate on health, and restore the wave if it
//! fails. Each run is driven by one control loop that exclusively owns the
//! [`DeploymentRun`](wavegate_types::DeploymentRun).
//!
//! ## Architectural Boundaries
//!
//! - `wavegate-planner` owns: turning declarations into waves
//! - `wavegate-cluster` owns: talking to clusters and the reconciler
//! - `wavegate-health` owns: what "healthy" means and when to retry
//! - `wavegate-state` owns: snapshots, restore, history and locks
//! - `wavegate-deployment` owns: the order in which all of the above happen
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use wavegate_cluster::{ClusterSpec, InMemoryCluster};
//! use wavegate_deployment::{Backends, CancelHandle, DeployRequest, Orchestrator, OrchestratorConfig};
//! use wavegate_observability::MemoryAuditSink;
//! use wavegate_state::{InMemoryRunHistory, InMemoryRunLock};
//! use wavegate_types::{ServiceUnit, Wave, WavePlan};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = Arc::new(InMemoryCluster::new());
//! let orchestrator = Orchestrator::new(
//!     OrchestratorConfig::new("staging"),
//!     vec![ClusterSpec::new("primary")],
//!     Backends {
//!         api: cluster.clone(),
//!         reconciler: cluster.clone(),
//!         credentials: cluster,
//!         history: Arc::new(InMemoryRunHistory::new()),
//!         lock: Arc::new(InMemoryRunLock::new()),
//!         audit: Arc::new(MemoryAuditSink::new()),
//!     },
//! );
//!
//! let plan = WavePlan::new(vec![Wave {
//!     number: 1,
//!     units: vec![ServiceUnit::new("ingest", "primary", "apps/ingest.yaml")],
//! }]);
//! let outcome = orchestrator
//!     .deploy(&plan, DeployRequest::default(), &CancelHandle::new())
//!     .await?;
//! println!("{}", outcome.status());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod cancel;
pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod outcome;

#[cfg(test)]
mod tests;

pub use cancel::{CancelHandle, CancelMode};
pub use config::OrchestratorConfig;
pub use error::{DeploymentError, Result};
pub use executor::{ExecutionOptions, UnitUpdate, WaveExecution, WaveExecutor};
pub use orchestrator::{Backends, DeployRequest, Orchestrator};
pub use outcome::{DryRunReport, FailedUnit, ManualIntervention, PlannedUnit, PlannedWave, RunOutcome};
