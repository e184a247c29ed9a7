use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::storage::ArtifactPath;

/// Filesystem-backed store for sanitized uploads and derived artifacts.
/// Only reachable through [`ArtifactPath`], so callers cannot construct
/// cross-tenant or escaping paths.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &ArtifactPath) -> PathBuf {
        self.root.join(path.relative())
    }

    pub fn exists(&self, path: &ArtifactPath) -> bool {
        std::fs::symlink_metadata(self.resolve(path)).is_ok()
    }

    /// Writes an artifact. Existing artifacts are never overwritten: the
    /// content is staged in a temporary file and hard-linked into place,
    /// which fails atomically when the target already exists.
    pub fn write(&self, path: &ArtifactPath, content: &[u8]) -> Result<PathBuf, StorageError> {
        let target = self.resolve(path);
        let dir = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        self.ensure_directory(&dir)?;

        let staging = dir.join(format!(
            ".{}.partial-{}",
            path.filename(),
            uuid::Uuid::new_v4().simple()
        ));
        self.write_new(&staging, content)?;

        let linked = std::fs::hard_link(&staging, &target);
        // The staging file is only a carrier; failing to remove it leaves a
        // hidden orphan but no visible artifact.
        let _ = std::fs::remove_file(&staging);

        match linked {
            Ok(()) => Ok(target),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StorageError::FileExists(target))
            }
            Err(e) => Err(StorageError::WriteFile {
                path: target,
                source: e,
            }),
        }
    }

    pub fn read(&self, path: &ArtifactPath) -> Result<Vec<u8>, StorageError> {
        let full = self.resolve(path);
        std::fs::read(&full).map_err(|e| StorageError::ReadFile {
            path: full,
            source: e,
        })
    }

    fn write_new(&self, path: &Path, content: &[u8]) -> Result<(), StorageError> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| StorageError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            })?;
        file.write_all(content)
            .and_then(|_| file.sync_all())
            .map_err(|e| StorageError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            })
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}
