//! Local filesystem archive

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{ArchiveDocument, ArchiveSink, PutOutcome};
use crate::error::SinkError;

/// Writes documents under a root directory, mirroring their relative paths.
///
/// Writes go through a sibling temp file and a rename so a crash never leaves
/// a half-written record. A put whose bytes match the stored file leaves the
/// file untouched.
pub struct FilesystemSink {
    root: PathBuf,
}

impl FilesystemSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

/// Atomically replace `path` with `bytes`
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    let display = path.display().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SinkError::io(parent.display().to_string(), e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    fs::write(&tmp, bytes)
        .await
        .map_err(|e| SinkError::io(tmp.display().to_string(), e))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(SinkError::io(display, e));
    }
    Ok(())
}

#[async_trait]
impl ArchiveSink for FilesystemSink {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn put(&self, document: &ArchiveDocument<'_>) -> Result<PutOutcome, SinkError> {
        let path = self.resolve(&document.path);

        match fs::read(&path).await {
            Ok(existing) if existing == document.bytes => return Ok(PutOutcome::Unchanged),
            Ok(_) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(SinkError::io(path.display().to_string(), e)),
        }

        write_atomic(&path, &document.bytes).await?;
        Ok(PutOutcome::Written)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sink::DocumentRole;
    use polyarc_common::EntityKind;
    use tempfile::TempDir;

    fn document(bytes: &[u8]) -> ArchiveDocument<'static> {
        ArchiveDocument {
            kind: EntityKind::Markets,
            role: DocumentRole::Primary,
            path: "markets/2025/03/market_9.json".to_string(),
            bytes: bytes.to_vec(),
            partition: None,
            record: None,
            fetch: None,
        }
    }

    #[tokio::test]
    async fn test_put_creates_partition_dirs() {
        let dir = TempDir::new().unwrap();
        let sink = FilesystemSink::new(dir.path());

        let outcome = sink.put(&document(br#"{"id":9}"#)).await.unwrap();

        assert_eq!(outcome, PutOutcome::Written);
        let stored = std::fs::read(dir.path().join("markets/2025/03/market_9.json")).unwrap();
        assert_eq!(stored, br#"{"id":9}"#);
    }

    #[tokio::test]
    async fn test_identical_put_is_unchanged() {
        let dir = TempDir::new().unwrap();
        let sink = FilesystemSink::new(dir.path());

        sink.put(&document(b"{}")).await.unwrap();
        assert_eq!(sink.put(&document(b"{}")).await.unwrap(), PutOutcome::Unchanged);
        assert_eq!(sink.put(&document(b"[]")).await.unwrap(), PutOutcome::Written);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("markets/2025/03"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
