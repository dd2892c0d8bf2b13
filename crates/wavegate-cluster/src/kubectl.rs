//! kubectl-backed cluster adapter
//!
//! Each unit's manifest declares a reconciler `Application` named after the
//! unit. Applying the manifest hands the unit to the reconciler; health and
//! sync are then read back from the Application's status.

use crate::api::{ApplyOutcome, ClusterApi, Reconciler};
use crate::context::ResolvedContext;
use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};
use wavegate_types::{
    ClusterId, HealthState, ReconcileStatus, Revision, ServiceUnit, SyncStatus,
};

const APPLICATION_RESOURCE: &str = "applications.argoproj.io";
const RECONCILER_DEPLOYMENT: &str = "argocd-server";
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Cluster API and reconciler adapter that shells out to `kubectl`
#[derive(Debug, Clone)]
pub struct KubectlClient {
    binary: String,
    manifest_root: PathBuf,
    command_timeout: Duration,
}

impl Default for KubectlClient {
    fn default() -> Self {
        Self {
            binary: "kubectl".to_string(),
            manifest_root: PathBuf::from("."),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl KubectlClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Relative manifest references resolve against this directory.
    pub fn with_manifest_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.manifest_root = root.into();
        self
    }

    /// Upper bound for one kubectl invocation. A command still running is
    /// killed and reported as a network failure.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn manifest_path(&self, unit: &ServiceUnit) -> Result<String> {
        if unit.manifest.is_empty() {
            return Err(ClusterError::MalformedManifest(format!(
                "{} has no manifest reference",
                unit.name
            )));
        }
        let reference = unit.manifest.as_str();
        if reference.contains("://") {
            return Ok(reference.to_string());
        }
        Ok(self.manifest_root.join(reference).to_string_lossy().into_owned())
    }

    async fn run(&self, ctx: &ResolvedContext, args: &[&str], stdin: Option<&str>) -> Result<String> {
        // Kept alive until kubectl exits
        let credentials = credential_file(ctx)?;

        let mut command = Command::new(&self.binary);
        command
            .args(context_args(ctx))
            .arg(format!("--request-timeout={}s", self.command_timeout.as_secs().max(1)))
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(file) = &credentials {
            command.env("KUBECONFIG", kubeconfig_search_path(file.path())?);
        }

        debug!(cluster = %ctx.cluster, args = ?args, "Running kubectl");
        let mut child = command
            .spawn()
            .map_err(|e| ClusterError::ToolUnavailable(format!("failed to execute {}: {e}", self.binary)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| ClusterError::CommandFailed(format!("failed to write stdin: {e}")))?;
        }

        // Dropping the child on timeout kills it
        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!(cluster = %ctx.cluster, args = ?args, timeout_secs = self.command_timeout.as_secs(), "kubectl timed out");
                ClusterError::Network(format!(
                    "kubectl did not finish within {}s",
                    self.command_timeout.as_secs()
                ))
            })?
            .map_err(|e| ClusterError::CommandFailed(format!("kubectl did not complete: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_stderr(&ctx.cluster, stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// kubeconfig user carrying a cluster's issued token
fn credential_user(ctx: &ResolvedContext) -> String {
    format!("wavegate-{}", ctx.cluster)
}

/// Global flags selecting the context and credentials. Tokens never appear
/// here; the user entry points into [`credential_file`].
fn context_args(ctx: &ResolvedContext) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(context) = &ctx.kube_context {
        args.push(format!("--context={context}"));
    }
    if let Some(endpoint) = &ctx.endpoint {
        args.push(format!("--server={endpoint}"));
    }
    if ctx.credentials.token.is_some() {
        args.push(format!("--user={}", credential_user(ctx)));
    }
    args
}

/// Writes the issued token to an owner-only kubeconfig fragment holding a
/// single user entry. `None` for ambient credentials.
fn credential_file(ctx: &ResolvedContext) -> Result<Option<NamedTempFile>> {
    let Some(token) = &ctx.credentials.token else {
        return Ok(None);
    };
    let fragment = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "users": [{ "name": credential_user(ctx), "user": { "token": token } }],
    });
    let write = || -> std::io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("wavegate-kubeconfig-")
            .tempfile()?;
        file.write_all(fragment.to_string().as_bytes())?;
        file.flush()?;
        Ok(file)
    };
    write()
        .map(Some)
        .map_err(|e| ClusterError::CommandFailed(format!("failed to stage credentials: {e}")))
}

/// The operator's kubeconfig files followed by the credential fragment.
fn kubeconfig_search_path(fragment: &Path) -> Result<OsString> {
    let mut paths: Vec<PathBuf> = match std::env::var_os("KUBECONFIG") {
        Some(existing) if !existing.is_empty() => std::env::split_paths(&existing).collect(),
        _ => std::env::var_os("HOME")
            .map(|home| vec![PathBuf::from(home).join(".kube").join("config")])
            .unwrap_or_default(),
    };
    paths.push(fragment.to_path_buf());
    std::env::join_paths(paths)
        .map_err(|e| ClusterError::CommandFailed(format!("invalid KUBECONFIG: {e}")))
}

/// Maps kubectl stderr onto the cluster error taxonomy.
pub(crate) fn classify_stderr(cluster: &ClusterId, stderr: &str) -> ClusterError {
    let lower = stderr.to_ascii_lowercase();
    let message = stderr.to_string();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["too many requests", "throttl", "rate limit"]) {
        ClusterError::Throttled(message)
    } else if has(&["admission webhook", "denied the request", "violates policy"]) {
        ClusterError::PolicyRejected(message)
    } else if has(&["error validating", "strict decoding", "unknown field"]) {
        ClusterError::SchemaValidation(message)
    } else if has(&["error parsing", "yaml:", "json: cannot", "could not find expected"]) {
        ClusterError::MalformedManifest(message)
    } else if has(&["unauthorized", "forbidden", "must be logged in"]) {
        ClusterError::Unauthorized {
            cluster: cluster.clone(),
            reason: message,
        }
    } else if has(&[
        "unable to connect",
        "connection refused",
        "no such host",
        "i/o timeout",
        "tls handshake timeout",
        "connection reset",
    ]) {
        ClusterError::Network(message)
    } else if has(&["notfound", "not found"]) {
        ClusterError::NotFound(message)
    } else if has(&[
        "currently unable to handle",
        "please try again",
        "the object has been modified",
        "etcdserver",
    ]) {
        ClusterError::NotReady(message)
    } else {
        ClusterError::CommandFailed(message)
    }
}

/// Reads sync, health and revision from an Application object.
pub(crate) fn parse_application_status(raw: &str) -> Result<ReconcileStatus> {
    let app: Value =
        serde_json::from_str(raw).map_err(|e| ClusterError::Decode(format!("application: {e}")))?;
    let status = &app["status"];
    Ok(ReconcileStatus {
        sync: status["sync"]["status"]
            .as_str()
            .map(SyncStatus::parse)
            .unwrap_or_default(),
        health: status["health"]["status"]
            .as_str()
            .map(HealthState::parse)
            .unwrap_or_default(),
        revision: status["sync"]["revision"].as_str().map(str::to_string),
    })
}

/// Strips server-populated fields so a live object can be re-applied.
pub(crate) fn sanitize_live_object(object: &mut Value) {
    if let Some(map) = object.as_object_mut() {
        map.remove("status");
    }
    if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in [
            "resourceVersion",
            "uid",
            "generation",
            "creationTimestamp",
            "managedFields",
            "selfLink",
        ] {
            metadata.remove(field);
        }
        if let Some(annotations) = metadata
            .get_mut("annotations")
            .and_then(Value::as_object_mut)
        {
            annotations.remove("kubectl.kubernetes.io/last-applied-configuration");
        }
    }
}

fn revision_from_live(raw: &str) -> Result<Option<Revision>> {
    let mut object: Value =
        serde_json::from_str(raw).map_err(|e| ClusterError::Decode(format!("live object: {e}")))?;

    // `kubectl get -f` wraps multi-document manifests in a List
    if object["kind"] == "List" {
        let first = object["items"]
            .as_array()
            .and_then(|items| items.first())
            .cloned();
        match first {
            Some(first) => object = first,
            None => return Ok(None),
        }
    }

    let reference = object["spec"]["source"]["targetRevision"]
        .as_str()
        .or_else(|| object["metadata"]["resourceVersion"].as_str())
        .unwrap_or("unknown")
        .to_string();

    sanitize_live_object(&mut object);
    let document =
        serde_json::to_string(&object).map_err(|e| ClusterError::Decode(e.to_string()))?;
    Ok(Some(Revision::new(reference).with_document(document)))
}

fn apply_outcome(stdout: &str) -> ApplyOutcome {
    if stdout.lines().all(|l| l.trim().is_empty() || l.trim_end().ends_with("unchanged")) {
        ApplyOutcome::Unchanged
    } else if stdout.lines().any(|l| l.trim_end().ends_with("created")) {
        ApplyOutcome::Created
    } else {
        ApplyOutcome::Configured
    }
}

#[async_trait]
impl ClusterApi for KubectlClient {
    /// The context is usable when the API answers and the reconciler has
    /// ready replicas.
    #[instrument(skip(self, ctx), fields(cluster = %ctx.cluster))]
    async fn check_access(&self, ctx: &ResolvedContext) -> Result<()> {
        let raw = self
            .run(
                ctx,
                &[
                    "get",
                    "deployment",
                    RECONCILER_DEPLOYMENT,
                    "-n",
                    &ctx.reconciler_namespace,
                    "-o",
                    "json",
                ],
                None,
            )
            .await
            .map_err(|err| match err {
                ClusterError::Network(reason) => ClusterError::Unreachable {
                    cluster: ctx.cluster.clone(),
                    reason,
                },
                ClusterError::Unauthorized { reason, .. } => ClusterError::Unauthorized {
                    cluster: ctx.cluster.clone(),
                    reason,
                },
                other => ClusterError::ReconcilerUnavailable {
                    cluster: ctx.cluster.clone(),
                    reason: other.to_string(),
                },
            })?;

        let deployment: Value = serde_json::from_str(&raw)
            .map_err(|e| ClusterError::Decode(format!("reconciler deployment: {e}")))?;
        let ready = deployment["status"]["readyReplicas"].as_u64().unwrap_or(0);
        if ready == 0 {
            return Err(ClusterError::ReconcilerUnavailable {
                cluster: ctx.cluster.clone(),
                reason: format!("{RECONCILER_DEPLOYMENT} has no ready replicas"),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, ctx, unit), fields(cluster = %ctx.cluster, unit = %unit.name))]
    async fn apply(&self, ctx: &ResolvedContext, unit: &ServiceUnit) -> Result<ApplyOutcome> {
        let path = self.manifest_path(unit)?;
        let stdout = self.run(ctx, &["apply", "-f", &path], None).await?;
        Ok(apply_outcome(&stdout))
    }

    async fn reapply(
        &self,
        ctx: &ResolvedContext,
        unit: &ServiceUnit,
        revision: &Revision,
    ) -> Result<ApplyOutcome> {
        let document = revision.document.as_deref().ok_or_else(|| {
            ClusterError::MalformedManifest(format!(
                "snapshot of {} at {} carries no object",
                unit.name, revision.reference
            ))
        })?;
        let stdout = self.run(ctx, &["apply", "-f", "-"], Some(document)).await?;
        Ok(apply_outcome(&stdout))
    }

    async fn live_revision(
        &self,
        ctx: &ResolvedContext,
        unit: &ServiceUnit,
    ) -> Result<Option<Revision>> {
        let path = self.manifest_path(unit)?;
        match self
            .run(ctx, &["get", "-f", &path, "-o", "json"], None)
            .await
        {
            Ok(raw) => revision_from_live(&raw),
            Err(ClusterError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn remove(&self, ctx: &ResolvedContext, unit: &ServiceUnit) -> Result<()> {
        let path = self.manifest_path(unit)?;
        self.run(ctx, &["delete", "-f", &path, "--ignore-not-found"], None)
            .await
            .map(|_| ())
    }

    fn name(&self) -> &str {
        "kubectl"
    }
}

#[async_trait]
impl Reconciler for KubectlClient {
    async fn status(&self, ctx: &ResolvedContext, unit: &ServiceUnit) -> Result<ReconcileStatus> {
        let raw = self
            .run(
                ctx,
                &[
                    "get",
                    APPLICATION_RESOURCE,
                    unit.name.as_str(),
                    "-n",
                    &ctx.reconciler_namespace,
                    "-o",
                    "json",
                ],
                None,
            )
            .await;
        match raw {
            Ok(raw) => parse_application_status(&raw),
            // Not created yet by the reconciler: keep polling
            Err(ClusterError::NotFound(_)) => Ok(ReconcileStatus::new(
                SyncStatus::Unknown,
                HealthState::Missing,
            )),
            Err(err) => Err(err),
        }
    }

    async fn request_sync(&self, ctx: &ResolvedContext, unit: &ServiceUnit) -> Result<()> {
        self.run(
            ctx,
            &[
                "annotate",
                APPLICATION_RESOURCE,
                unit.name.as_str(),
                "-n",
                &ctx.reconciler_namespace,
                "argocd.argoproj.io/refresh=hard",
                "--overwrite",
            ],
            None,
        )
        .await
        .map(|_| ())
    }
}
