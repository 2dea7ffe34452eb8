use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;
use uuid::Uuid;

use super::audit::AuditSnapshot;
use super::domain::CaseId;

/// Append-only audit persistence. Snapshots are never updated or deleted.
pub trait SnapshotStore: Send + Sync {
    fn append(&self, snapshot: AuditSnapshot) -> Result<(), SnapshotStoreError>;
    fn latest(&self, case_id: &CaseId) -> Result<Option<AuditSnapshot>, SnapshotStoreError>;
    /// Oldest first.
    fn history(&self, case_id: &CaseId) -> Result<Vec<AuditSnapshot>, SnapshotStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotStoreError {
    #[error("snapshot {0} already exists")]
    Conflict(Uuid),
    #[error("case id '{0}' cannot be used as a storage key")]
    InvalidCaseId(String),
    #[error("snapshot store io failure at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("snapshot {path:?} could not be encoded or decoded: {source}")]
    Encoding {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),
}

/// One JSON document per snapshot under `<root>/<case_id>/`.
///
/// File names start with a per-case sequence number followed by the UTC
/// timestamp, so directory order is history order.
/// Each snapshot is written to a hidden temporary file and renamed into place,
/// so readers never observe a partial snapshot.
#[derive(Debug)]
pub struct FileSnapshotStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn case_dir(&self, case_id: &CaseId) -> Result<PathBuf, SnapshotStoreError> {
        let key = case_id.0.as_str();
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(SnapshotStoreError::InvalidCaseId(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    fn snapshot_paths(dir: &Path) -> Result<Vec<PathBuf>, SnapshotStoreError> {
        let io_error = |source| SnapshotStoreError::Io {
            path: dir.to_path_buf(),
            source,
        };
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            let visible = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| !name.starts_with('.') && name.ends_with(".json"));
            if visible {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn read(path: &Path) -> Result<AuditSnapshot, SnapshotStoreError> {
        let raw = fs::read(path).map_err(|source| SnapshotStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| SnapshotStoreError::Encoding {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn append(&self, snapshot: AuditSnapshot) -> Result<(), SnapshotStoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| SnapshotStoreError::Unavailable("write lock poisoned".to_string()))?;

        let dir = self.case_dir(snapshot.case_id())?;
        fs::create_dir_all(&dir).map_err(|source| SnapshotStoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let id_suffix = format!("-{}.json", snapshot.snapshot_id());
        let existing = Self::snapshot_paths(&dir)?;
        let exists = existing.iter().any(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(&id_suffix))
        });
        if exists {
            return Err(SnapshotStoreError::Conflict(snapshot.snapshot_id()));
        }

        let file_name = format!(
            "{:06}-{}{}",
            existing.len() + 1,
            snapshot.recorded_at().format("%Y%m%dT%H%M%S%.6fZ"),
            id_suffix
        );
        let target = dir.join(&file_name);
        let staging = dir.join(format!(".{file_name}.tmp"));

        let encoded =
            serde_json::to_vec_pretty(&snapshot).map_err(|source| SnapshotStoreError::Encoding {
                path: target.clone(),
                source,
            })?;
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| SnapshotStoreError::Io { path, source }
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
            .map_err(io_error(&staging))?;
        file.write_all(&encoded).map_err(io_error(&staging))?;
        file.sync_all().map_err(io_error(&staging))?;
        drop(file);

        if let Err(source) = fs::rename(&staging, &target) {
            let _ = fs::remove_file(&staging);
            return Err(SnapshotStoreError::Io {
                path: target,
                source,
            });
        }

        debug!(path = %target.display(), "snapshot written");
        Ok(())
    }

    fn latest(&self, case_id: &CaseId) -> Result<Option<AuditSnapshot>, SnapshotStoreError> {
        let dir = self.case_dir(case_id)?;
        match Self::snapshot_paths(&dir)?.last() {
            Some(path) => Self::read(path).map(Some),
            None => Ok(None),
        }
    }

    fn history(&self, case_id: &CaseId) -> Result<Vec<AuditSnapshot>, SnapshotStoreError> {
        let dir = self.case_dir(case_id)?;
        Self::snapshot_paths(&dir)?
            .iter()
            .map(|path| Self::read(path))
            .collect()
    }
}
