//! Run locks.
//!
//! At most one run may be active per target cluster. A run acquires every
//! cluster in its plan at once; if any is held, nothing is acquired. File
//! locks record which process holds them.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wavegate_types::{ClusterId, RunId};

use crate::error::{Result, StateError};

/// Mutual exclusion of runs over clusters.
pub trait RunLock: Send + Sync {
    /// Acquire all `clusters` for `run`, or none of them.
    fn acquire(&self, run: &RunId, clusters: &BTreeSet<ClusterId>) -> Result<()>;

    /// Release the clusters held by `run`. Clusters held by others are left alone.
    fn release(&self, run: &RunId, clusters: &BTreeSet<ClusterId>) -> Result<()>;
}

/// Process-local lock.
#[derive(Default)]
pub struct InMemoryRunLock {
    holders: Mutex<HashMap<ClusterId, RunId>>,
}

impl InMemoryRunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self, cluster: &ClusterId) -> Option<RunId> {
        self.holders.lock().get(cluster).cloned()
    }
}

impl RunLock for InMemoryRunLock {
    fn acquire(&self, run: &RunId, clusters: &BTreeSet<ClusterId>) -> Result<()> {
        let mut holders = self.holders.lock();
        if let Some((cluster, holder)) = clusters
            .iter()
            .find_map(|c| holders.get(c).filter(|h| *h != run).map(|h| (c, h)))
        {
            return Err(StateError::LockHeld {
                cluster: cluster.clone(),
                holder: holder.to_string(),
            });
        }
        for cluster in clusters {
            holders.insert(cluster.clone(), run.clone());
        }
        Ok(())
    }

    fn release(&self, run: &RunId, clusters: &BTreeSet<ClusterId>) -> Result<()> {
        let mut holders = self.holders.lock();
        for cluster in clusters {
            if holders.get(cluster) == Some(run) {
                holders.remove(cluster);
            }
        }
        Ok(())
    }
}

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub run: RunId,
    pub pid: u32,
    pub host: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    fn for_current_process(run: &RunId) -> Self {
        Self {
            run: run.clone(),
            pid: std::process::id(),
            host: current_host(),
            acquired_at: Utc::now(),
        }
    }

    /// Held by a process on this host that no longer exists.
    pub fn is_stale(&self) -> bool {
        self.host == current_host() && !process_alive(self.pid)
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (pid {} on {} since {})",
            self.run,
            self.pid,
            self.host,
            self.acquired_at.to_rfc3339()
        )
    }
}

fn current_host() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// Liveness is only checked on Linux; elsewhere every holder counts as alive.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// What a lock file currently says about its holder.
enum Holder {
    Record(LockRecord),
    /// Unparseable content, shown as is
    Opaque(String),
}

impl Holder {
    fn is_run(&self, run: &RunId) -> bool {
        match self {
            Holder::Record(record) => &record.run == run,
            Holder::Opaque(text) => text == &run.to_string(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Holder::Record(record) => record.to_string(),
            Holder::Opaque(text) => text.clone(),
        }
    }
}

/// Lock files under a directory, one per cluster, created atomically.
///
/// Shared by every process using the same state directory. A lock left by a
/// process that died on this host is reclaimed; any other lock stays until
/// its run releases it or an operator calls [`FileRunLock::force_release`].
pub struct FileRunLock {
    dir: PathBuf,
}

impl FileRunLock {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// One file per cluster id. Bytes outside `[A-Za-z0-9-]` are
    /// percent-encoded so distinct ids never share a file.
    fn lock_path(&self, cluster: &ClusterId) -> PathBuf {
        let mut name = String::with_capacity(cluster.as_str().len() + 5);
        for byte in cluster.as_str().bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                name.push(char::from(byte));
            } else {
                name.push_str(&format!("%{byte:02X}"));
            }
        }
        self.dir.join(format!("{name}.lock"))
    }

    fn read_holder(path: &Path) -> std::io::Result<Holder> {
        let content = std::fs::read_to_string(path)?;
        Ok(match serde_json::from_str::<LockRecord>(&content) {
            Ok(record) => Holder::Record(record),
            Err(_) => Holder::Opaque(content.trim().to_string()),
        })
    }

    fn try_create(path: &Path, record: &LockRecord) -> std::io::Result<()> {
        let content = serde_json::to_string(record).map_err(std::io::Error::other)?;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(content.as_bytes())
    }

    /// Removes the lock at `path` if it still holds `stale`.
    fn reclaim(path: &Path, stale: &LockRecord) -> std::io::Result<bool> {
        match Self::read_holder(path)? {
            Holder::Record(current) if &current == stale => {
                std::fs::remove_file(path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Creates the lock for one cluster, reclaiming it once if its holder is dead.
    fn acquire_one(&self, cluster: &ClusterId, record: &LockRecord) -> Result<()> {
        let path = self.lock_path(cluster);
        for _ in 0..2 {
            let err = match Self::try_create(&path, record) {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            if err.kind() != std::io::ErrorKind::AlreadyExists {
                return Err(StateError::Storage(format!("{}: {err}", path.display())));
            }

            let holder = match Self::read_holder(&path) {
                Ok(holder) => holder,
                // Released in between
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match holder {
                Holder::Record(stale) if stale.is_stale() => {
                    warn!(cluster = %cluster, holder = %stale, "Reclaiming lock of a dead process");
                    Self::reclaim(&path, &stale)?;
                }
                holder => {
                    return Err(StateError::LockHeld {
                        cluster: cluster.clone(),
                        holder: holder.describe(),
                    })
                }
            }
        }
        Err(StateError::Storage(format!(
            "{}: lock changed hands while reclaiming",
            path.display()
        )))
    }

    /// Current holder of each locked cluster among `clusters`.
    pub fn holders(&self, clusters: &BTreeSet<ClusterId>) -> Result<Vec<(ClusterId, String)>> {
        let mut held = Vec::new();
        for cluster in clusters {
            match Self::read_holder(&self.lock_path(cluster)) {
                Ok(holder) => held.push((cluster.clone(), holder.describe())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(held)
    }

    /// Removes the locks on `clusters` whoever holds them. Returns what was
    /// removed.
    pub fn force_release(&self, clusters: &BTreeSet<ClusterId>) -> Result<Vec<(ClusterId, String)>> {
        let held = self.holders(clusters)?;
        for (cluster, holder) in &held {
            match std::fs::remove_file(self.lock_path(cluster)) {
                Ok(()) => warn!(cluster = %cluster, holder = %holder, "Lock forcibly released"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(held)
    }
}

impl RunLock for FileRunLock {
    fn acquire(&self, run: &RunId, clusters: &BTreeSet<ClusterId>) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let record = LockRecord::for_current_process(run);

        let mut created: Vec<&ClusterId> = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            if let Err(err) = self.acquire_one(cluster, &record) {
                // Give back what this attempt took
                for taken in created {
                    if let Err(e) = std::fs::remove_file(self.lock_path(taken)) {
                        warn!(cluster = %taken, error = %e, "Failed to undo partial lock");
                    }
                }
                return Err(err);
            }
            created.push(cluster);
        }
        debug!(run_id = %run, clusters = clusters.len(), "Acquired run lock");
        Ok(())
    }

    fn release(&self, run: &RunId, clusters: &BTreeSet<ClusterId>) -> Result<()> {
        for cluster in clusters {
            let path = self.lock_path(cluster);
            match Self::read_holder(&path) {
                Ok(holder) if holder.is_run(run) => std::fs::remove_file(&path)?,
                Ok(_) => warn!(cluster = %cluster, "Lock held by another run; leaving it"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        debug!(run_id = %run, "Released run lock");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clusters(names: &[&str]) -> BTreeSet<ClusterId> {
        names.iter().map(|n| ClusterId::new(*n)).collect()
    }

    fn exercise(lock: &dyn RunLock) {
        let first = RunId::generate();
        let second = RunId::generate();

        lock.acquire(&first, &clusters(&["primary", "secondary"]))
            .unwrap();

        let err = lock
            .acquire(&second, &clusters(&["secondary", "tertiary"]))
            .unwrap_err();
        assert!(matches!(err, StateError::LockHeld { cluster, .. } if cluster.as_str() == "secondary"));

        // A refused acquire leaves nothing behind
        lock.acquire(&second, &clusters(&["tertiary"])).unwrap();
        lock.release(&second, &clusters(&["tertiary"])).unwrap();

        lock.release(&first, &clusters(&["primary", "secondary"]))
            .unwrap();
        lock.acquire(&second, &clusters(&["secondary", "tertiary"]))
            .unwrap();
    }

    #[test]
    fn in_memory_lock_conflicts_on_overlap() {
        exercise(&InMemoryRunLock::new());
    }

    #[test]
    fn file_lock_conflicts_on_overlap() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FileRunLock::new(dir.path().join("locks")));
    }

    #[test]
    fn release_ignores_foreign_holder() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileRunLock::new(dir.path());
        let owner = RunId::generate();
        lock.acquire(&owner, &clusters(&["primary"])).unwrap();

        lock.release(&RunId::generate(), &clusters(&["primary"]))
            .unwrap();
        assert!(lock.lock_path(&"primary".into()).exists());
    }

    #[test]
    fn similar_cluster_ids_use_distinct_files() {
        let lock = FileRunLock::new("/var/lib/wavegate/locks");
        let dotted = lock.lock_path(&"eu.west".into());
        let underscored = lock.lock_path(&"eu_west".into());
        assert_ne!(dotted, underscored);
        assert_eq!(dotted.file_name().unwrap(), "eu%2Ewest.lock");
        assert_eq!(
            lock.lock_path(&"../etc".into()).parent(),
            Some(Path::new("/var/lib/wavegate/locks"))
        );

        let dir = tempfile::tempdir().unwrap();
        let lock = FileRunLock::new(dir.path());
        lock.acquire(&RunId::generate(), &clusters(&["eu.west"])).unwrap();
        lock.acquire(&RunId::generate(), &clusters(&["eu_west"])).unwrap();
    }

    fn plant(lock: &FileRunLock, cluster: &str, record: &LockRecord) {
        std::fs::create_dir_all(&lock.dir).unwrap();
        std::fs::write(
            lock.lock_path(&cluster.into()),
            serde_json::to_string(record).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn holder_is_recorded_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileRunLock::new(dir.path());
        let owner = RunId::generate();
        lock.acquire(&owner, &clusters(&["primary"])).unwrap();

        let err = lock
            .acquire(&RunId::generate(), &clusters(&["primary"]))
            .unwrap_err();
        let StateError::LockHeld { holder, .. } = err else {
            panic!("expected a held lock");
        };
        assert!(holder.contains(&owner.to_string()));
        assert!(holder.contains(&format!("pid {}", std::process::id())));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn lock_of_dead_process_on_this_host_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileRunLock::new(dir.path());
        let crashed = LockRecord {
            run: RunId::generate(),
            pid: u32::MAX,
            host: current_host(),
            acquired_at: Utc::now(),
        };
        assert!(crashed.is_stale());
        plant(&lock, "primary", &crashed);

        let next = RunId::generate();
        lock.acquire(&next, &clusters(&["primary"])).unwrap();
        let held = lock.holders(&clusters(&["primary"])).unwrap();
        assert!(held[0].1.contains(&next.to_string()));
    }

    #[test]
    fn lock_from_another_host_needs_force_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileRunLock::new(dir.path());
        let remote = LockRecord {
            run: RunId::generate(),
            pid: u32::MAX,
            host: "build-agent-7".to_string(),
            acquired_at: Utc::now(),
        };
        assert!(!remote.is_stale());
        plant(&lock, "primary", &remote);

        let err = lock
            .acquire(&RunId::generate(), &clusters(&["primary"]))
            .unwrap_err();
        assert!(matches!(err, StateError::LockHeld { .. }));

        let removed = lock.force_release(&clusters(&["primary", "secondary"])).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, ClusterId::new("primary"));
        lock.acquire(&RunId::generate(), &clusters(&["primary"])).unwrap();
    }
}
