//! Audit sinks for storing audit entries

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

use super::entry::{AuditEntry, PartialAuditEntry};
use super::integrity::{ChainVerificationResult, IntegrityChain, IntegrityVerifier};
use crate::error::Result;

/// Trait for audit sinks
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Links the entry into the chain and stores it
    async fn write(&self, entry: PartialAuditEntry) -> Result<AuditEntry>;

    async fn entry_count(&self) -> Result<u64>;
}

/// In-memory audit sink for tests
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: RwLock<Vec<AuditEntry>>,
    chain: RwLock<IntegrityChain>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, partial: PartialAuditEntry) -> Result<AuditEntry> {
        let mut chain = self.chain.write();
        let entry = partial.finalize(chain.previous_hash());
        chain.update(&entry);
        self.entries.write().push(entry.clone());
        Ok(entry)
    }

    async fn entry_count(&self) -> Result<u64> {
        Ok(self.chain.read().entry_count())
    }
}

/// Append-only JSON-lines audit file
///
/// Several processes may share one file. Each append holds an exclusive
/// lock on it and links to the entry that is last on disk at that moment.
pub struct FileAuditSink {
    path: PathBuf,
    chain: Mutex<IntegrityChain>,
}

impl FileAuditSink {
    /// Opens the log at `path`, resuming its chain if it already has entries.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let chain = if tokio::fs::try_exists(&path).await? {
            let entries = read_entries(&path).await?;
            IntegrityChain::from_state(
                entries.last().map(|e| e.entry_hash.clone()),
                entries.len() as u64,
            )
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            IntegrityChain::new()
        };

        Ok(Self {
            path,
            chain: Mutex::new(chain),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read_all(&self) -> Result<Vec<AuditEntry>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        read_entries(&self.path).await
    }

    /// Re-reads the file and checks every hash and link.
    pub async fn verify(&self) -> Result<ChainVerificationResult> {
        Ok(IntegrityVerifier::verify_chain(&self.read_all().await?))
    }
}

async fn read_entries(path: &Path) -> Result<Vec<AuditEntry>> {
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut entries = Vec::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}

/// Links `partial` to the current tail of the file and appends it, all
/// under an exclusive lock on the file.
fn append_locked(path: &Path, partial: PartialAuditEntry) -> Result<(AuditEntry, IntegrityChain)> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    file.lock()?;

    let mut content = String::new();
    file.read_to_string(&mut content)?;
    let mut count = 0u64;
    let mut tail = None;
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        count += 1;
        tail = Some(line);
    }
    let head = match tail {
        Some(line) => Some(serde_json::from_str::<AuditEntry>(line)?.entry_hash),
        None => None,
    };

    let mut chain = IntegrityChain::from_state(head, count);
    let entry = partial.finalize(chain.previous_hash());
    let mut line = serde_json::to_string(&entry)?;
    line.push('\n');
    file.write_all(line.as_bytes())?;
    file.flush()?;
    file.unlock()?;

    chain.update(&entry);
    Ok((entry, chain))
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn write(&self, partial: PartialAuditEntry) -> Result<AuditEntry> {
        let mut chain = self.chain.lock().await;
        let path = self.path.clone();
        let (entry, synced) = tokio::task::spawn_blocking(move || append_locked(&path, partial))
            .await
            .map_err(std::io::Error::other)??;
        *chain = synced;
        Ok(entry)
    }

    async fn entry_count(&self) -> Result<u64> {
        Ok(self.chain.lock().await.entry_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::{AuditAction, AuditOutcome};
    use wavegate_types::RunId;

    fn partial(action: AuditAction) -> PartialAuditEntry {
        AuditEntry::builder()
            .environment("prod")
            .actor("release-bot")
            .action(action)
            .run(RunId::generate())
            .outcome(AuditOutcome::success())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn memory_sink_links_entries() {
        let sink = MemoryAuditSink::new();
        let first = sink.write(partial(AuditAction::DeployStarted)).await.unwrap();
        let second = sink.write(partial(AuditAction::DeployFinished)).await.unwrap();

        assert_eq!(first.previous_hash, None);
        assert_eq!(second.previous_hash, Some(first.entry_hash));
        assert_eq!(sink.entry_count().await.unwrap(), 2);
        assert!(IntegrityVerifier::verify_chain(&sink.entries()).valid);
    }

    #[tokio::test]
    async fn file_sink_resumes_chain_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit/audit.jsonl");

        let sink = FileAuditSink::new(&path).await.unwrap();
        sink.write(partial(AuditAction::DeployStarted)).await.unwrap();
        let last = sink
            .write(partial(AuditAction::WaveRolledBack { wave: 2 }))
            .await
            .unwrap();
        drop(sink);

        let reopened = FileAuditSink::new(&path).await.unwrap();
        assert_eq!(reopened.entry_count().await.unwrap(), 2);
        let next = reopened
            .write(partial(AuditAction::DeployFinished))
            .await
            .unwrap();
        assert_eq!(next.previous_hash, Some(last.entry_hash));

        let result = reopened.verify().await.unwrap();
        assert!(result.valid);
        assert_eq!(result.total_entries, 3);
    }

    #[tokio::test]
    async fn sinks_sharing_a_file_keep_one_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        // Both open an empty log, as two concurrent sessions would
        let first = FileAuditSink::new(&path).await.unwrap();
        let second = FileAuditSink::new(&path).await.unwrap();

        let a = first.write(partial(AuditAction::DeployStarted)).await.unwrap();
        let b = second.write(partial(AuditAction::DeployStarted)).await.unwrap();
        let c = first.write(partial(AuditAction::DeployFinished)).await.unwrap();

        assert_eq!(b.previous_hash, Some(a.entry_hash));
        assert_eq!(c.previous_hash, Some(b.entry_hash));
        assert_eq!(first.entry_count().await.unwrap(), 3);

        let result = second.verify().await.unwrap();
        assert!(result.valid);
        assert_eq!(result.total_entries, 3);
    }

    #[tokio::test]
    async fn tampered_file_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = FileAuditSink::new(&path).await.unwrap();
        sink.write(partial(AuditAction::DeployStarted)).await.unwrap();
        sink.write(partial(AuditAction::DeployFinished)).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        tokio::fs::write(&path, content.replace("release-bot", "someone-else"))
            .await
            .unwrap();

        let result = sink.verify().await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.first_invalid_index, Some(0));
    }
}
