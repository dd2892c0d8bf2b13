//! Tamper-evident audit trail
//!
//! Each entry carries the hash of its predecessor, so removing or editing a
//! past entry breaks the chain.

pub mod entry;
pub mod integrity;
pub mod sink;

pub use entry::{AuditAction, AuditEntry, AuditEntryBuilder, AuditOutcome, PartialAuditEntry};
pub use integrity::{ChainVerificationResult, IntegrityChain, IntegrityVerifier};
pub use sink::{AuditSink, FileAuditSink, MemoryAuditSink};
