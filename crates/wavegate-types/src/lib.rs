//! Wavegate Types - Core types for wave-based deployment orchestration
//!
//! Wavegate rolls interdependent platform services out across one or more
//! Kubernetes clusters in waves, gating each wave on the health of the one
//! before it and rolling back the wave that fails.
//!
//! ## Architectural Boundaries
//!
//! - **Wavegate** owns: dependency resolution, wave sequencing, health gating,
//!   retry, rollback and the run record
//! - **GitOps reconciler** owns: converging cluster state to the desired revision
//! - **Cluster API** owns: storing and serving applied objects
//!
//! ## Key Concepts
//!
//! - **ServiceUnit**: one independently deployable component
//! - **WavePlan**: ordered waves, every unit's dependencies in an earlier wave
//! - **DeploymentRun**: the mutable record of a single orchestration
//! - **UnitStatus**: per-unit state machine with validated transitions
//! - **RunEvent**: structured record of every transition for observers

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod events;
pub mod ids;
pub mod plan;
pub mod run;
pub mod status;
pub mod unit;

mod serde_helpers;

// Re-export main types
pub use error::{Classify, ErrorClass, TransitionError, UnitError, ValidationError};
pub use events::{EventSeverity, RunEvent, RunEventEnvelope};
pub use ids::{ClusterId, RunId, UnitName};
pub use plan::{SelectionParseError, Wave, WavePlan, WaveRange, WaveSelection};
pub use run::{DeploymentRun, Revision, RollbackSnapshot, UnitRecord};
pub use status::{HealthState, ReconcileStatus, RunStatus, SyncStatus, UnitStatus};
pub use unit::{ManifestRef, RetryPolicy, ServiceUnit};
