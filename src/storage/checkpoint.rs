//! File-backed checkpoint store
//!
//! One pretty-printed JSON document per job. Saves go through a temporary
//! file in the same directory which is synced and then renamed over the old
//! document.

use crate::storage::traits::{CheckpointStore, StorageError, StorageResult};
use crate::storage::{CheckpointState, CHECKPOINT_VERSION};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Stores checkpoints as `<dir>/<job_id>.checkpoint.json`
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Opens a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Path of the checkpoint document for a job
    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}.checkpoint.json", job_id))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, job_id: &str) -> StorageResult<Option<CheckpointState>> {
        let path = self.path_for(job_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state: CheckpointState =
            serde_json::from_str(&content).map_err(|e| StorageError::Corrupt {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if state.version != CHECKPOINT_VERSION {
            return Err(StorageError::VersionMismatch {
                found: state.version,
                expected: CHECKPOINT_VERSION,
            });
        }

        if state.job_id != job_id {
            return Err(StorageError::JobMismatch {
                found: state.job_id,
                expected: job_id.to_string(),
            });
        }

        Ok(Some(state))
    }

    fn save(&self, state: &CheckpointState) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(state)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(&state.job_id))
            .map_err(|e| StorageError::Io(e.error))?;
        sync_dir(&self.dir)?;

        tracing::debug!(
            "Saved checkpoint for job {} ({} seen keys)",
            state.job_id,
            state.seen.len()
        );
        Ok(())
    }

    fn clear(&self, job_id: &str) -> StorageResult<bool> {
        match std::fs::remove_file(self.path_for(job_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Makes the rename that replaced the checkpoint durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
