//! Short-lived cluster credentials
//!
//! Credentials are issued per run. A failure here is a precondition failure
//! for every unit on the cluster and is never retried.

use crate::context::ClusterSpec;
use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

/// Where a cluster's credentials come from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSource {
    /// Use whatever the kube context already carries
    #[default]
    Kubeconfig,
    /// Issue a service-account token from a Vault Kubernetes secrets engine
    Vault { role: String },
}

/// Issued credentials
#[derive(Clone, Default)]
pub struct Credentials {
    pub token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Rely on the ambient kube context
    pub fn ambient() -> Self {
        Self::default()
    }

    pub fn bearer(token: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            token: Some(token.into()),
            expires_at: ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok().map(|d| Utc::now() + d)),
        }
    }

    /// True when the credentials lapse within `margin` from now. Ambient and
    /// non-expiring credentials never do.
    pub fn expires_within(&self, margin: Duration) -> bool {
        match (self.expires_at, chrono::Duration::from_std(margin)) {
            (Some(expires_at), Ok(margin)) => expires_at - margin <= Utc::now(),
            (Some(_), Err(_)) => true,
            (None, _) => false,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Issues credentials for a cluster
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self, spec: &ClusterSpec) -> Result<Credentials>;
}

/// Vault connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub address: String,
    /// Mount path of the Kubernetes secrets engine
    #[serde(default = "default_vault_mount")]
    pub mount: String,
    /// Environment variable holding the Vault token
    #[serde(default = "default_vault_token_env")]
    pub token_env: String,
}

fn default_vault_mount() -> String {
    "kubernetes".to_string()
}

fn default_vault_token_env() -> String {
    "VAULT_TOKEN".to_string()
}

#[derive(Debug, Deserialize)]
struct VaultCredsResponse {
    #[serde(default)]
    lease_duration: u64,
    data: VaultCredsData,
}

#[derive(Debug, Deserialize)]
struct VaultCredsData {
    service_account_token: String,
}

/// Credential provider honoring each cluster's [`CredentialSource`]
pub struct ClusterCredentialProvider {
    vault: Option<VaultConfig>,
    client: reqwest::Client,
}

impl ClusterCredentialProvider {
    pub fn new(vault: Option<VaultConfig>) -> Self {
        Self {
            vault,
            client: reqwest::Client::new(),
        }
    }

    async fn issue_from_vault(&self, spec: &ClusterSpec, role: &str) -> Result<Credentials> {
        let fail = |reason: String| ClusterError::Credentials {
            cluster: spec.id.clone(),
            reason,
        };

        let vault = self
            .vault
            .as_ref()
            .ok_or_else(|| fail("vault source configured but no vault address set".into()))?;
        let vault_token = std::env::var(&vault.token_env)
            .map_err(|_| fail(format!("{} is not set", vault.token_env)))?;

        let url = format!(
            "{}/v1/{}/creds/{}",
            vault.address.trim_end_matches('/'),
            vault.mount,
            role
        );
        let response = self
            .client
            .post(&url)
            .header("X-Vault-Token", vault_token)
            .json(&serde_json::json!({ "kubernetes_namespace": spec.reconciler_namespace }))
            .send()
            .await
            .map_err(|e| fail(format!("vault request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(fail(format!("vault returned {}", response.status())));
        }

        let body: VaultCredsResponse = response
            .json()
            .await
            .map_err(|e| fail(format!("unexpected vault response: {e}")))?;

        debug!(cluster = %spec.id, lease_secs = body.lease_duration, "Issued cluster credentials");
        let ttl = (body.lease_duration > 0).then(|| Duration::from_secs(body.lease_duration));
        Ok(Credentials::bearer(body.data.service_account_token, ttl))
    }
}

#[async_trait]
impl CredentialProvider for ClusterCredentialProvider {
    #[instrument(skip(self, spec), fields(cluster = %spec.id))]
    async fn credentials(&self, spec: &ClusterSpec) -> Result<Credentials> {
        match &spec.credentials {
            CredentialSource::Kubeconfig => Ok(Credentials::ambient()),
            CredentialSource::Vault { role } => self.issue_from_vault(spec, role).await,
        }
    }
}
