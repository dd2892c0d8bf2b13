//! Audit entry types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use wavegate_types::RunId;

use crate::error::{ObservabilityError, Result};

/// An audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID
    pub id: Uuid,

    /// Timestamp of the event
    pub timestamp: DateTime<Utc>,

    /// Target environment
    pub environment: String,

    /// Operator or process that performed the action
    pub actor: String,

    /// Action performed
    pub action: AuditAction,

    /// Run the action belongs to
    pub run_id: Option<RunId>,

    /// Outcome of the action
    pub outcome: AuditOutcome,

    /// Additional details
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,

    /// Hash of the previous entry (for chain integrity)
    pub previous_hash: Option<String>,

    /// Hash of this entry
    pub entry_hash: String,
}

impl AuditEntry {
    /// Create a new audit entry builder
    pub fn builder() -> AuditEntryBuilder {
        AuditEntryBuilder::new()
    }

    /// Hash over the entry's content and its link, ignoring `entry_hash`.
    pub fn compute_hash(&self) -> String {
        digest(&HashInput {
            id: &self.id,
            timestamp: &self.timestamp,
            environment: &self.environment,
            actor: &self.actor,
            action: &self.action,
            run_id: self.run_id.as_ref(),
            outcome: &self.outcome,
            context: &self.context,
            previous_hash: self.previous_hash.as_deref(),
        })
    }
}

#[derive(Serialize)]
struct HashInput<'a> {
    id: &'a Uuid,
    timestamp: &'a DateTime<Utc>,
    environment: &'a str,
    actor: &'a str,
    action: &'a AuditAction,
    run_id: Option<&'a RunId>,
    outcome: &'a AuditOutcome,
    context: &'a BTreeMap<String, serde_json::Value>,
    previous_hash: Option<&'a str>,
}

fn digest(input: &HashInput<'_>) -> String {
    let encoded = serde_json::to_string(input).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    hex::encode(hasher.finalize())
}

/// Builder for audit entries
#[derive(Debug, Default)]
pub struct AuditEntryBuilder {
    environment: Option<String>,
    actor: Option<String>,
    action: Option<AuditAction>,
    run_id: Option<RunId>,
    outcome: Option<AuditOutcome>,
    context: BTreeMap<String, serde_json::Value>,
}

impl AuditEntryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn run(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Add context value. Values that fail to serialize are dropped.
    pub fn context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Build the entry (without hash; the sink links it into its chain)
    pub fn build(self) -> Result<PartialAuditEntry> {
        Ok(PartialAuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            environment: self
                .environment
                .ok_or(ObservabilityError::InvalidEntry("environment is required"))?,
            actor: self
                .actor
                .ok_or(ObservabilityError::InvalidEntry("actor is required"))?,
            action: self
                .action
                .ok_or(ObservabilityError::InvalidEntry("action is required"))?,
            run_id: self.run_id,
            outcome: self
                .outcome
                .ok_or(ObservabilityError::InvalidEntry("outcome is required"))?,
            context: self.context,
        })
    }
}

/// Audit entry before it is linked into a chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialAuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub environment: String,
    pub actor: String,
    pub action: AuditAction,
    pub run_id: Option<RunId>,
    pub outcome: AuditOutcome,
    pub context: BTreeMap<String, serde_json::Value>,
}

impl PartialAuditEntry {
    /// Links the entry after `previous_hash` and seals it.
    pub fn finalize(self, previous_hash: Option<String>) -> AuditEntry {
        let mut entry = AuditEntry {
            id: self.id,
            timestamp: self.timestamp,
            environment: self.environment,
            actor: self.actor,
            action: self.action,
            run_id: self.run_id,
            outcome: self.outcome,
            context: self.context,
            previous_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash();
        entry
    }
}

/// Audited actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    DeployStarted,
    DeployFinished,
    WaveRolledBack { wave: u32 },
    ManualRollback { from_wave: u32 },
    CancelRequested,
    LockRejected,
}

/// Outcome of an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure { reason: String },
    Partial { details: String },
}

impl AuditOutcome {
    pub fn success() -> Self {
        Self::Success
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    pub fn partial(details: impl Into<String>) -> Self {
        Self::Partial {
            details: details.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}
