//! Collaborator ports driven by the orchestrator

use crate::context::ResolvedContext;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use wavegate_types::{ReconcileStatus, Revision, ServiceUnit};

/// Result of an idempotent apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    Created,
    Configured,
    /// The live object already matched; nothing changed
    Unchanged,
}

/// Cluster API: stores applied objects
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Verify the context is reachable and able to reconcile.
    async fn check_access(&self, ctx: &ResolvedContext) -> Result<()>;

    /// Upsert the unit's manifest. Re-applying an applied manifest is a no-op.
    async fn apply(&self, ctx: &ResolvedContext, unit: &ServiceUnit) -> Result<ApplyOutcome>;

    /// Re-apply a previously captured revision.
    async fn reapply(
        &self,
        ctx: &ResolvedContext,
        unit: &ServiceUnit,
        revision: &Revision,
    ) -> Result<ApplyOutcome>;

    /// Currently applied revision, `None` when the unit does not exist.
    async fn live_revision(
        &self,
        ctx: &ResolvedContext,
        unit: &ServiceUnit,
    ) -> Result<Option<Revision>>;

    /// Delete the unit's objects. Removing an absent unit succeeds.
    async fn remove(&self, ctx: &ResolvedContext, unit: &ServiceUnit) -> Result<()>;

    fn name(&self) -> &str;
}

/// GitOps reconciler: reports sync and health for a unit
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn status(&self, ctx: &ResolvedContext, unit: &ServiceUnit) -> Result<ReconcileStatus>;

    /// Ask the reconciler to refresh and sync now.
    async fn request_sync(&self, ctx: &ResolvedContext, unit: &ServiceUnit) -> Result<()>;
}
