//! Publish datasets into sibling directories on local disk

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{count_directory, CountsFile, DatasetPublisher, PublishOutcome};
use crate::error::PublishError;

/// Mirrors each dataset into `<root>/<dataset>/`.
///
/// Used for dry runs and for hosts that sync the mirror with their own tooling.
pub struct LocalMirrorPublisher {
    root: PathBuf,
    counts_file_name: String,
}

impl LocalMirrorPublisher {
    pub fn new(root: impl Into<PathBuf>, counts_file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            counts_file_name: counts_file_name.into(),
        }
    }

    pub fn dataset_dir(&self, dataset: &str) -> PathBuf {
        self.root.join(dataset)
    }
}

/// Copy one file, reporting whether the destination changed
async fn mirror_file(from: &Path, to: &Path) -> Result<bool, PublishError> {
    let bytes = tokio::fs::read(from)
        .await
        .map_err(|e| PublishError::io(from.display().to_string(), e))?;

    if let Ok(existing) = tokio::fs::read(to).await {
        if existing == bytes {
            return Ok(false);
        }
    }

    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PublishError::io(parent.display().to_string(), e))?;
    }
    tokio::fs::write(to, &bytes)
        .await
        .map_err(|e| PublishError::io(to.display().to_string(), e))?;
    Ok(true)
}

#[async_trait]
impl DatasetPublisher for LocalMirrorPublisher {
    fn name(&self) -> &str {
        "mirror"
    }

    async fn publish(
        &self,
        dataset: &str,
        source_root: &Path,
        files: &[String],
    ) -> Result<PublishOutcome, PublishError> {
        let dest = self.dataset_dir(dataset);
        let mut changed = false;
        for file in files {
            if mirror_file(&source_root.join(file), &dest.join(file)).await? {
                debug!(dataset, file = %file, "Mirrored");
                changed = true;
            }
        }

        tokio::fs::create_dir_all(&dest)
            .await
            .map_err(|e| PublishError::io(dest.display().to_string(), e))?;

        // counted before the counts file is rewritten
        let counts_path = dest.join(&self.counts_file_name);
        let walk_root = dest.clone();
        let counts = tokio::task::spawn_blocking(move || count_directory(&walk_root))
            .await
            .map_err(|e| PublishError::io(dest.display().to_string(), std::io::Error::other(e)))??;

        tokio::fs::write(&counts_path, CountsFile::new(dataset, counts).to_bytes()?)
            .await
            .map_err(|e| PublishError::io(counts_path.display().to_string(), e))?;

        Ok(PublishOutcome {
            dataset: dataset.to_string(),
            files: files.len(),
            counts,
            changed,
        })
    }
}
