//! Transient on-disk storage for the blobs passed between stages.
//!
//! Every job gets its own uniquely named workspace directory under the store
//! root. Stages write into slots allocated from that workspace; the executor
//! finalizes a slot into an [`Artifact`] once the stage reports success and
//! releases every slot exactly once, whatever the outcome of the run.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// Logical type of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    RawVideo,
    RawAudio,
    TranscriptText,
    GeneratedDocument,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::RawVideo => "raw-video",
            ArtifactKind::RawAudio => "raw-audio",
            ArtifactKind::TranscriptText => "transcript-text",
            ArtifactKind::GeneratedDocument => "generated-document",
        }
    }

    /// File extension used for slots of this kind.
    fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::RawVideo => "media",
            ArtifactKind::RawAudio => "audio",
            ArtifactKind::TranscriptText => "txt",
            ArtifactKind::GeneratedDocument => "md",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(
            self,
            ArtifactKind::TranscriptText | ArtifactKind::GeneratedDocument
        )
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Artifact {kind} at {} is empty", .path.display())]
    Empty { kind: ArtifactKind, path: PathBuf },

    #[error("Expected {kind} artifact was not written to {}", .path.display())]
    Missing { kind: ArtifactKind, path: PathBuf },

    #[error("Artifact storage error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A reserved storage slot. Not `Clone`: releasing consumes it.
#[derive(Debug)]
pub struct ArtifactHandle {
    slot: u32,
    kind: ArtifactKind,
    path: PathBuf,
}

impl ArtifactHandle {
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Where the producing stage must write its output.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }
}

/// Immutable record of a finalized slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub size: u64,
    /// Hex SHA-256 of the content, when hashing is enabled.
    pub sha256: Option<String>,
    /// Container or codec hint reported by the producing stage (e.g. `mp3`).
    pub format: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    workspaces: AtomicUsize,
    allocated: AtomicUsize,
    released: AtomicUsize,
}

/// Snapshot of allocation bookkeeping across every job of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub workspaces: usize,
    pub allocated: usize,
    pub released: usize,
}

impl StoreStats {
    pub fn outstanding(&self) -> usize {
        self.allocated.saturating_sub(self.released)
    }
}

/// Shared artifact store. Safe to use from concurrently running jobs.
pub struct ArtifactStore {
    root: PathBuf,
    _owned_root: Option<TempDir>,
    hash_contents: bool,
    counters: Arc<Counters>,
}

impl ArtifactStore {
    /// Create a store under `root`, or under a fresh system temp directory.
    pub fn new(root: Option<&Path>, hash_contents: bool) -> Result<Self, StoreError> {
        let (root, owned) = match root {
            Some(dir) => {
                fs_err::create_dir_all(dir).map_err(|source| StoreError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
                (dir.to_path_buf(), None)
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("video-digest-")
                    .tempdir()
                    .map_err(|source| StoreError::Io {
                        path: std::env::temp_dir(),
                        source,
                    })?;
                (dir.path().to_path_buf(), Some(dir))
            }
        };

        Ok(Self {
            root,
            _owned_root: owned,
            hash_contents,
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the private workspace of one job.
    pub fn open_workspace(&self, job_id: Uuid) -> Result<JobWorkspace, StoreError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", job_id))
            .tempdir_in(&self.root)
            .map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;

        self.counters.workspaces.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Opened workspace {}", dir.path().display());

        Ok(JobWorkspace {
            dir,
            next_slot: 0,
            hash_contents: self.hash_contents,
            counters: Arc::clone(&self.counters),
        })
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            workspaces: self.counters.workspaces.load(Ordering::SeqCst),
            allocated: self.counters.allocated.load(Ordering::SeqCst),
            released: self.counters.released.load(Ordering::SeqCst),
        }
    }
}

/// Storage namespace of a single job. The directory is removed on drop.
pub struct JobWorkspace {
    dir: TempDir,
    next_slot: u32,
    hash_contents: bool,
    counters: Arc<Counters>,
}

impl JobWorkspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Reserve a new slot for an artifact of `kind`.
    pub fn allocate(&mut self, kind: ArtifactKind) -> ArtifactHandle {
        self.next_slot += 1;
        let path = self.dir.path().join(format!(
            "{:02}-{}.{}",
            self.next_slot,
            kind.as_str(),
            kind.extension()
        ));
        self.counters.allocated.fetch_add(1, Ordering::SeqCst);

        ArtifactHandle {
            slot: self.next_slot,
            kind,
            path,
        }
    }

    /// Drop whatever a failed attempt left in the slot.
    pub fn reset(&self, handle: &ArtifactHandle) -> Result<(), StoreError> {
        match fs_err::remove_file(&handle.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: handle.path.clone(),
                source,
            }),
        }
    }

    /// Validate the written slot and turn it into an immutable artifact.
    ///
    /// Hashing runs on the blocking pool; slots can hold whole videos.
    pub async fn finalize(
        &self,
        handle: &ArtifactHandle,
        format: Option<String>,
    ) -> Result<Artifact, StoreError> {
        let metadata = match tokio::fs::metadata(&handle.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Missing {
                    kind: handle.kind,
                    path: handle.path.clone(),
                })
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: handle.path.clone(),
                    source,
                })
            }
        };

        if !metadata.is_file() {
            return Err(StoreError::Missing {
                kind: handle.kind,
                path: handle.path.clone(),
            });
        }

        if metadata.len() == 0 {
            return Err(StoreError::Empty {
                kind: handle.kind,
                path: handle.path.clone(),
            });
        }

        let sha256 = if self.hash_contents {
            let path = handle.path.clone();
            let hashed = tokio::task::spawn_blocking(move || hash_file(&path))
                .await
                .map_err(|e| StoreError::Io {
                    path: handle.path.clone(),
                    source: std::io::Error::new(ErrorKind::Other, e),
                })?;
            Some(hashed?)
        } else {
            None
        };

        Ok(Artifact {
            kind: handle.kind,
            path: handle.path.clone(),
            size: metadata.len(),
            sha256,
            format,
        })
    }

    /// Delete the slot's storage. Failures are logged, never escalated.
    pub fn release(&self, handle: ArtifactHandle) {
        match std::fs::remove_file(&handle.path) {
            Ok(()) => tracing::debug!("Released {} slot {}", handle.kind, handle.slot),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("Slot {} ({}) had nothing to release", handle.slot, handle.kind)
            }
            Err(e) => tracing::warn!(
                "Failed to release {}: {}",
                handle.path.display(),
                e
            ),
        }
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn hash_file(path: &Path) -> Result<String, StoreError> {
    let mut file = fs_err::File::open(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (TempDir, ArtifactStore) {
        let root = TempDir::new().unwrap();
        let store = ArtifactStore::new(Some(root.path()), true).unwrap();
        (root, store)
    }

    #[tokio::test]
    async fn test_finalize_computes_size_and_hash() {
        let (_root, store) = store();
        let mut ws = store.open_workspace(Uuid::new_v4()).unwrap();
        let handle = ws.allocate(ArtifactKind::TranscriptText);
        std::fs::write(handle.path(), b"abc").unwrap();

        let artifact = ws.finalize(&handle, None).await.unwrap();
        assert_eq!(artifact.size, 3);
        assert_eq!(
            artifact.sha256.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        ws.release(handle);
    }

    #[tokio::test]
    async fn test_hashing_large_slot_keeps_runtime_responsive() {
        use std::sync::atomic::AtomicU64;

        let (_root, store) = store();
        let mut ws = store.open_workspace(Uuid::new_v4()).unwrap();
        let handle = ws.allocate(ArtifactKind::RawVideo);
        std::fs::write(handle.path(), vec![7u8; 16 * 1024 * 1024]).unwrap();

        // Current-thread runtime: the ticker only runs while finalize yields
        let ticks = Arc::new(AtomicU64::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            })
        };

        let artifact = ws.finalize(&handle, None).await.unwrap();
        ticker.abort();

        assert_eq!(artifact.size, 16 * 1024 * 1024);
        assert!(artifact.sha256.is_some());
        assert!(ticks.load(Ordering::SeqCst) > 0);
        ws.release(handle);
    }

    #[tokio::test]
    async fn test_zero_byte_slot_is_rejected() {
        let (_root, store) = store();
        let mut ws = store.open_workspace(Uuid::new_v4()).unwrap();
        let handle = ws.allocate(ArtifactKind::RawAudio);
        std::fs::write(handle.path(), b"").unwrap();

        assert!(matches!(
            ws.finalize(&handle, None).await,
            Err(StoreError::Empty { kind: ArtifactKind::RawAudio, .. })
        ));
        ws.release(handle);
    }

    #[tokio::test]
    async fn test_unwritten_slot_is_missing() {
        let (_root, store) = store();
        let mut ws = store.open_workspace(Uuid::new_v4()).unwrap();
        let handle = ws.allocate(ArtifactKind::RawVideo);

        assert!(matches!(
            ws.finalize(&handle, None).await,
            Err(StoreError::Missing { .. })
        ));
        ws.release(handle);
        assert_eq!(store.stats().outstanding(), 0);
    }

    #[test]
    fn test_release_counts_and_tolerates_missing_files() {
        let (_root, store) = store();
        let mut ws = store.open_workspace(Uuid::new_v4()).unwrap();
        let a = ws.allocate(ArtifactKind::RawVideo);
        let b = ws.allocate(ArtifactKind::RawAudio);
        std::fs::write(a.path(), b"video").unwrap();
        let a_path = a.path().to_path_buf();

        ws.release(a);
        ws.release(b);

        assert!(!a_path.exists());
        let stats = store.stats();
        assert_eq!(stats.allocated, 2);
        assert_eq!(stats.released, 2);
    }

    #[test]
    fn test_workspaces_are_isolated_per_job() {
        let (_root, store) = store();
        let job = Uuid::new_v4();
        let mut first = store.open_workspace(job).unwrap();
        let mut second = store.open_workspace(job).unwrap();
        assert_ne!(first.path(), second.path());

        let a = first.allocate(ArtifactKind::RawVideo);
        let b = second.allocate(ArtifactKind::RawVideo);
        assert_ne!(a.path(), b.path());
        first.release(a);
        second.release(b);
    }

    #[test]
    fn test_reset_clears_partial_output() {
        let (_root, store) = store();
        let mut ws = store.open_workspace(Uuid::new_v4()).unwrap();
        let handle = ws.allocate(ArtifactKind::RawVideo);
        std::fs::write(handle.path(), b"partial").unwrap();

        ws.reset(&handle).unwrap();
        assert!(!handle.path().exists());
        ws.reset(&handle).unwrap();
        ws.release(handle);
    }

    #[test]
    fn test_workspace_directory_removed_on_drop() {
        let (_root, store) = store();
        let ws = store.open_workspace(Uuid::new_v4()).unwrap();
        let dir = ws.path().to_path_buf();
        assert!(dir.exists());
        drop(ws);
        assert!(!dir.exists());
    }
}
