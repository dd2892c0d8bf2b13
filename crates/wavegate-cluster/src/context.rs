//! Cluster Context Manager
//!
//! Holds the named execution context of every target cluster and verifies
//! the ones a wave needs before any unit in that wave is applied. A context
//! that cannot be verified fails the units that need it; it is not retried.

use crate::api::ClusterApi;
use crate::credentials::{CredentialProvider, CredentialSource, Credentials};
use crate::error::{ClusterError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use wavegate_types::ClusterId;

/// Declared cluster context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub id: ClusterId,

    /// kubeconfig context name
    #[serde(default)]
    pub kube_context: Option<String>,

    /// API server override
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Namespace of the GitOps reconciler
    #[serde(default = "default_reconciler_namespace")]
    pub reconciler_namespace: String,

    #[serde(default)]
    pub credentials: CredentialSource,
}

fn default_reconciler_namespace() -> String {
    "argocd".to_string()
}

impl ClusterSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: ClusterId::new(id),
            kube_context: None,
            endpoint: None,
            reconciler_namespace: default_reconciler_namespace(),
            credentials: CredentialSource::Kubeconfig,
        }
    }

    pub fn with_kube_context(mut self, context: impl Into<String>) -> Self {
        self.kube_context = Some(context.into());
        self
    }

    pub fn with_credentials(mut self, source: CredentialSource) -> Self {
        self.credentials = source;
        self
    }
}

/// A verified context, ready for applies
#[derive(Debug, Clone)]
pub struct ResolvedContext {
    pub cluster: ClusterId,
    pub kube_context: Option<String>,
    pub endpoint: Option<String>,
    pub reconciler_namespace: String,
    pub credentials: Credentials,
    pub verified_at: DateTime<Utc>,
}

impl ResolvedContext {
    pub fn from_spec(spec: &ClusterSpec, credentials: Credentials) -> Self {
        Self {
            cluster: spec.id.clone(),
            kube_context: spec.kube_context.clone(),
            endpoint: spec.endpoint.clone(),
            reconciler_namespace: spec.reconciler_namespace.clone(),
            credentials,
            verified_at: Utc::now(),
        }
    }
}

/// Cached contexts are re-issued when their credentials lapse within this margin
pub const DEFAULT_RENEWAL_MARGIN: Duration = Duration::from_secs(60);

/// Verifies and caches cluster contexts for a run
pub struct ClusterContextManager {
    specs: HashMap<ClusterId, ClusterSpec>,
    credentials: Arc<dyn CredentialProvider>,
    api: Arc<dyn ClusterApi>,
    verified: DashMap<ClusterId, ResolvedContext>,
    renewal_margin: Duration,
}

impl ClusterContextManager {
    pub fn new(
        specs: impl IntoIterator<Item = ClusterSpec>,
        credentials: Arc<dyn CredentialProvider>,
        api: Arc<dyn ClusterApi>,
    ) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.id.clone(), s)).collect(),
            credentials,
            api,
            verified: DashMap::new(),
            renewal_margin: DEFAULT_RENEWAL_MARGIN,
        }
    }

    pub fn with_renewal_margin(mut self, margin: Duration) -> Self {
        self.renewal_margin = margin;
        self
    }

    /// Configured cluster ids
    pub fn cluster_ids(&self) -> impl Iterator<Item = &ClusterId> {
        self.specs.keys()
    }

    pub fn spec(&self, cluster: &ClusterId) -> Option<&ClusterSpec> {
        self.specs.get(cluster)
    }

    /// Returns a verified context, issuing credentials and probing on first
    /// use and again whenever the cached credentials are about to lapse.
    #[instrument(skip(self), fields(cluster = %cluster))]
    pub async fn ensure_ready(&self, cluster: &ClusterId) -> Result<ResolvedContext> {
        if let Some(ctx) = self.verified.get(cluster).map(|c| c.clone()) {
            if !ctx.credentials.expires_within(self.renewal_margin) {
                return Ok(ctx);
            }
            debug!(cluster = %cluster, expires_at = ?ctx.credentials.expires_at, "Renewing cluster credentials");
            self.verified.remove(cluster);
        }

        let spec = self
            .specs
            .get(cluster)
            .ok_or_else(|| ClusterError::UnknownCluster {
                cluster: cluster.clone(),
            })?;

        let credentials = self.credentials.credentials(spec).await?;
        let ctx = ResolvedContext::from_spec(spec, credentials);

        if let Err(err) = self.api.check_access(&ctx).await {
            warn!(cluster = %cluster, error = %err, "Cluster context failed verification");
            return Err(as_precondition(cluster, err));
        }

        info!(cluster = %cluster, api = self.api.name(), "Cluster context verified");
        self.verified.insert(cluster.clone(), ctx.clone());
        Ok(ctx)
    }

    /// Verifies every listed cluster concurrently.
    pub async fn ensure_all<'a>(
        &self,
        clusters: impl IntoIterator<Item = &'a ClusterId>,
    ) -> BTreeMap<ClusterId, Result<ResolvedContext>> {
        let checks = clusters.into_iter().map(|cluster| async move {
            (cluster.clone(), self.ensure_ready(cluster).await)
        });
        futures::future::join_all(checks).await.into_iter().collect()
    }

    /// Drops a cached context so the next use re-verifies it.
    pub fn invalidate(&self, cluster: &ClusterId) {
        self.verified.remove(cluster);
    }
}

/// Access check failures surface as preconditions: a wave never starts on a
/// context it could not verify.
fn as_precondition(cluster: &ClusterId, err: ClusterError) -> ClusterError {
    use wavegate_types::{Classify, ErrorClass};
    match err.class() {
        ErrorClass::Precondition => err,
        _ => ClusterError::Unreachable {
            cluster: cluster.clone(),
            reason: err.to_string(),
        },
    }
}
