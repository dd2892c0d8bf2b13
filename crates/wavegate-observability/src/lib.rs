//! Wavegate Observability
//!
//! Everything here watches a run; nothing here steers one.
//!
//! - **Status**: [`StatusReporter`] folds the run event stream into a
//!   [`RunView`] for progress output and the `status` command
//! - **Logging**: [`init_tracing`] installs the process-wide subscriber
//! - **Audit**: tamper-evident record of runs and rollbacks, hash-chained
//!   so edits to the log are detectable

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod audit;
pub mod error;
pub mod logging;
pub mod reporter;

pub use audit::{
    AuditAction, AuditEntry, AuditEntryBuilder, AuditOutcome, AuditSink, ChainVerificationResult,
    FileAuditSink, IntegrityChain, IntegrityVerifier, MemoryAuditSink, PartialAuditEntry,
};
pub use error::{ObservabilityError, Result};
pub use logging::{init_tracing, LoggingConfig};
pub use reporter::{describe, RunView, StatusReporter, UnitView};
