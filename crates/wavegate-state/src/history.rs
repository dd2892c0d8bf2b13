//! Append-only run history.
//!
//! Every finished run is archived as one record. A run that is modified
//! afterwards (for instance by a manual rollback) is appended again; the
//! latest record for an ID wins.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use wavegate_types::{DeploymentRun, RunId};

use crate::error::{Result, StateError};

/// Archive of finished runs.
#[async_trait]
pub trait RunHistory: Send + Sync {
    /// Append a run record.
    async fn append(&self, run: &DeploymentRun) -> Result<()>;

    /// Latest record of every run, newest first.
    async fn list(&self, limit: usize) -> Result<Vec<DeploymentRun>>;

    /// Latest record for a run ID.
    async fn get(&self, id: &RunId) -> Result<Option<DeploymentRun>>;

    /// Most recently appended run.
    async fn latest(&self) -> Result<Option<DeploymentRun>> {
        Ok(self.list(1).await?.into_iter().next())
    }
}

/// Collapses records to the latest per run, newest first.
fn latest_per_run(records: Vec<DeploymentRun>, limit: usize) -> Vec<DeploymentRun> {
    let mut seen = std::collections::HashSet::new();
    records
        .into_iter()
        .rev()
        .filter(|run| seen.insert(run.id().clone()))
        .take(limit)
        .collect()
}

/// In-memory history for tests and dry runs.
#[derive(Default)]
pub struct InMemoryRunHistory {
    records: RwLock<Vec<DeploymentRun>>,
}

impl InMemoryRunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }
}

#[async_trait]
impl RunHistory for InMemoryRunHistory {
    async fn append(&self, run: &DeploymentRun) -> Result<()> {
        self.records.write().push(run.clone());
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeploymentRun>> {
        Ok(latest_per_run(self.records.read().clone(), limit))
    }

    async fn get(&self, id: &RunId) -> Result<Option<DeploymentRun>> {
        Ok(self
            .records
            .read()
            .iter()
            .rev()
            .find(|run| run.id() == id)
            .cloned())
    }
}

/// JSON-lines history file.
pub struct FileRunHistory {
    path: PathBuf,
}

impl FileRunHistory {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<DeploymentRun>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut runs = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DeploymentRun>(line) {
                Ok(run) => runs.push(run),
                Err(err) => {
                    warn!(path = %self.path.display(), line = line_no + 1, error = %err, "Skipping unreadable history record");
                }
            }
        }
        Ok(runs)
    }
}

#[async_trait]
impl RunHistory for FileRunHistory {
    async fn append(&self, run: &DeploymentRun) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut line = serde_json::to_string(run)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StateError::Storage(format!("{}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(run_id = %run.id(), status = %run.status(), "Archived run");
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeploymentRun>> {
        Ok(latest_per_run(self.read_all().await?, limit))
    }

    async fn get(&self, id: &RunId) -> Result<Option<DeploymentRun>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .rev()
            .find(|run| run.id() == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavegate_types::{RunStatus, ServiceUnit, Wave, WavePlan};

    fn run() -> DeploymentRun {
        let plan = WavePlan::new(vec![Wave {
            number: 1,
            units: vec![ServiceUnit::new("ingest", "primary", "i.yaml")],
        }]);
        DeploymentRun::new("dev", &plan)
    }

    #[tokio::test]
    async fn file_history_appends_and_reads_latest() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileRunHistory::new(dir.path().join("state/history.jsonl"));

        assert!(history.latest().await.unwrap().is_none());

        let mut first = run();
        first.finish(RunStatus::Succeeded);
        history.append(&first).await.unwrap();

        let mut second = run();
        second.finish(RunStatus::Failed);
        history.append(&second).await.unwrap();

        let mut second_again = second.clone();
        second_again.finish(RunStatus::RolledBack);
        history.append(&second_again).await.unwrap();

        let listed = history.list(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id(), second.id());
        assert_eq!(listed[0].status(), RunStatus::RolledBack);
        assert_eq!(listed[1].id(), first.id());

        let fetched = history.get(first.id()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn unreadable_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let history = FileRunHistory::new(&path);
        history.append(&run()).await.unwrap();
        tokio::fs::write(
            &path,
            format!(
                "{}not json\n",
                tokio::fs::read_to_string(&path).await.unwrap()
            ),
        )
        .await
        .unwrap();

        assert_eq!(history.list(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn memory_history_matches_file_semantics() {
        let history = InMemoryRunHistory::new();
        let run = run();
        history.append(&run).await.unwrap();
        history.append(&run).await.unwrap();
        assert_eq!(history.record_count(), 2);
        assert_eq!(history.list(10).await.unwrap().len(), 1);
        assert_eq!(history.latest().await.unwrap().unwrap().id(), run.id());
    }
}
