//! Wavegate State - Rollback, run history and run locks
//!
//! - [`RollbackCoordinator`]: captures a snapshot of every unit right before
//!   its wave is applied and restores those snapshots when the wave fails
//! - [`RunHistory`]: append-only archive of finished runs
//! - [`RunLock`]: at most one active run per target cluster
//!
//! ## Architectural Boundaries
//!
//! - **wavegate-state** owns: what a unit looked like before a wave, what
//!   happened in past runs, and who holds a cluster
//! - **wavegate-deployment** owns: when to capture, when to restore

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod history;
pub mod lock;
pub mod rollback;

pub use error::{Result, RollbackError, StateError};
pub use history::{FileRunHistory, InMemoryRunHistory, RunHistory};
pub use lock::{FileRunLock, InMemoryRunLock, LockRecord, RunLock};
pub use rollback::{CaptureReport, RestoreFailure, RestoredUnit, RollbackCoordinator, RollbackReport};
