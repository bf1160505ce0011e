//! On-disk snapshot cache for warm starts.
//!
//! One postcard-encoded [`Snapshot`] per cache path. Loading never fails a
//! session: a missing file, another user's snapshot or an older format all
//! read as "no snapshot".

use std::path::{Path, PathBuf};

use taskify_proto::codec::CodecError;
use taskify_proto::ids::UserId;
use taskify_proto::snapshot::{self, Snapshot};

/// Errors from reading or writing the cache file.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cache file is corrupt: {0}")]
    Codec(#[from] CodecError),

    /// Could not determine the user's cache directory.
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Snapshot file at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache at `<cache dir>/taskify/snapshot.bin`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NoCacheDir`] if the platform has no cache
    /// directory.
    pub fn at_default_path() -> Result<Self, CacheError> {
        let dir = dirs::cache_dir().ok_or(CacheError::NoCacheDir)?;
        Ok(Self::new(dir.join("taskify").join("snapshot.bin")))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the snapshot if one exists for `user` in the current format.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] for unreadable or corrupt files.
    pub fn load(&self, user: &UserId) -> Result<Option<Snapshot>, CacheError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let snapshot = snapshot::decode(&bytes)?;
        if snapshot.usable_for(user) {
            Ok(Some(snapshot))
        } else {
            tracing::debug!(path = %self.path.display(), owner = %snapshot.user_id, "ignoring foreign snapshot");
            Ok(None)
        }
    }

    /// Writes the snapshot, replacing any previous one atomically.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the directory or file cannot be written.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), CacheError> {
        let bytes = snapshot::encode(snapshot)?;
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| self.io(source))?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes).map_err(|source| self.io(source))?;
        std::fs::rename(&tmp, &self.path).map_err(|source| self.io(source))?;
        tracing::debug!(path = %self.path.display(), tasks = snapshot.tasks.len(), "snapshot saved");
        Ok(())
    }

    /// Deletes the cache file. A missing file is fine.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] for other failures.
    pub fn remove(&self) -> Result<(), CacheError> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(self.io(e)),
            _ => Ok(()),
        }
    }

    fn io(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
