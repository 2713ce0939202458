//! Versioned document storage used for checkpoints and run state

use async_trait::async_trait;
use polyarc_common::checksum::{sha256_bytes, verify_bytes};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::CheckpointError;

/// A stored document plus the token needed to overwrite it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedDocument {
    pub bytes: Vec<u8>,
    pub version: String,
}

/// Key/value store with conditional overwrite
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &str;

    /// Current document, or `None` if the key does not exist
    async fn read(&self, key: &str) -> Result<Option<VersionedDocument>, CheckpointError>;

    /// Overwrite `key` if its version still equals `expected`
    /// (`None` = the key must not exist yet)
    async fn write(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&str>,
        message: &str,
    ) -> Result<(), CheckpointError>;
}

/// Documents stored as files under a state directory.
///
/// The version token is the SHA-256 of the file content.
pub struct LocalFileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn read_path(path: &Path) -> Result<Option<Vec<u8>>, CheckpointError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CheckpointError::Io(e)),
        }
    }
}

#[async_trait]
impl DocumentStore for LocalFileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn read(&self, key: &str) -> Result<Option<VersionedDocument>, CheckpointError> {
        Ok(Self::read_path(&self.path(key))
            .await?
            .map(|bytes| VersionedDocument {
                version: sha256_bytes(&bytes),
                bytes,
            }))
    }

    async fn write(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&str>,
        _message: &str,
    ) -> Result<(), CheckpointError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path(key);

        let current = Self::read_path(&path).await?;
        let unchanged = match (&current, expected) {
            (None, None) => true,
            (Some(stored), Some(version)) => verify_bytes(stored, version).is_ok(),
            _ => false,
        };
        if !unchanged {
            return Err(CheckpointError::Conflict {
                key: key.to_string(),
                expected: expected.map(str::to_string),
            });
        }

        crate::sink::filesystem::write_atomic(&path, bytes)
            .await
            .map_err(|e| CheckpointError::backend(key, e.to_string()))
    }
}
