//! Dataset fan-out
//!
//! After a crawl, the files written under the archive root are grouped by
//! partition year and published into one dataset per year
//! (`<prefix>_<YYYY>`, undated records into `<prefix>`). Each dataset carries a
//! counts file that is recomputed from its full contents on every publish.

pub mod git;
pub mod mirror;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use crate::error::PublishError;
use polyarc_common::types::UNDATED_BUCKET;

pub use git::GitPublisher;
pub use mirror::LocalMirrorPublisher;

/// File counts of a dataset, classified by file name
///
/// Publishers count the dataset as it stands before the counts file is
/// rewritten. A counts file left by an earlier publish is therefore included
/// in `total_files` and `json_files`, matching what `git ls-files` reports
/// for a tracked counts file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetCounts {
    pub event_json: usize,
    pub event_meta: usize,
    pub json_files: usize,
    pub market_json: usize,
    pub market_meta: usize,
    pub series_json: usize,
    pub series_meta: usize,
    pub total_files: usize,
}

impl DatasetCounts {
    /// Classify paths by base name only, so both `events/...` and
    /// `by_created/events/...` layouts count the same
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts = Self::default();
        for path in paths {
            let path = path.as_ref();
            let name = path.rsplit('/').next().unwrap_or(path);
            counts.total_files += 1;
            if !name.ends_with(".json") {
                continue;
            }
            counts.json_files += 1;

            let is_meta = name.ends_with(".meta.json");
            let slot = match (name.split('_').next(), is_meta) {
                (Some("event"), false) => &mut counts.event_json,
                (Some("event"), true) => &mut counts.event_meta,
                (Some("market"), false) => &mut counts.market_json,
                (Some("market"), true) => &mut counts.market_meta,
                (Some("series"), false) => &mut counts.series_json,
                (Some("series"), true) => &mut counts.series_meta,
                _ => continue,
            };
            *slot += 1;
        }
        counts
    }
}

/// Count every file below `dir`, skipping VCS metadata
pub fn count_directory(dir: &Path) -> Result<DatasetCounts, PublishError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
    {
        let entry = entry.map_err(|e| {
            PublishError::io(
                dir.display().to_string(),
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            )
        })?;
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            paths.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(DatasetCounts::from_paths(paths))
}

/// Counts file written at the root of each dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountsFile {
    pub counts: DatasetCounts,
    pub repo: String,
    pub updated_at_utc: String,
}

impl CountsFile {
    pub fn new(repo: &str, counts: DatasetCounts) -> Self {
        Self {
            counts,
            repo: repo.to_string(),
            updated_at_utc: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PublishError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Dataset name for a partition directory (`2025` or `null`)
pub fn dataset_for(prefix: &str, partition_dir: &str) -> Option<String> {
    if partition_dir == UNDATED_BUCKET {
        return Some(prefix.to_string());
    }
    partition_dir
        .parse::<i32>()
        .ok()
        .map(|year| format!("{}_{:04}", prefix, year))
}

/// Group archive-relative paths (`<kind>/<YYYY|null>/...`) by dataset
pub fn group_by_dataset(paths: &[String], prefix: &str) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for path in paths {
        match path.split('/').nth(1).and_then(|dir| dataset_for(prefix, dir)) {
            Some(dataset) => groups.entry(dataset).or_default().push(path.clone()),
            None => warn!(path = %path, "Path outside partition layout; not published"),
        }
    }
    groups
}

/// Result of publishing one dataset
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub dataset: String,
    pub files: usize,
    pub counts: DatasetCounts,
    /// False when the dataset already held identical content
    pub changed: bool,
}

/// Destination that stores one dataset per partition year
#[async_trait]
pub trait DatasetPublisher: Send + Sync {
    fn name(&self) -> &str;

    /// Copy `files` (relative to `source_root`) into `dataset`, refresh its
    /// counts file and make the result durable.
    async fn publish(
        &self,
        dataset: &str,
        source_root: &Path,
        files: &[String],
    ) -> Result<PublishOutcome, PublishError>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FanoutReport {
    pub datasets: Vec<PublishOutcome>,
}

impl FanoutReport {
    pub fn touched(&self) -> Vec<String> {
        self.datasets.iter().map(|d| d.dataset.clone()).collect()
    }

    pub fn changed(&self) -> usize {
        self.datasets.iter().filter(|d| d.changed).count()
    }
}

/// Publish every written path through `publisher`, one dataset at a time
#[instrument(skip_all, fields(publisher = publisher.name(), files = paths.len()))]
pub async fn fan_out(
    publisher: &dyn DatasetPublisher,
    source_root: &Path,
    paths: &[String],
    prefix: &str,
) -> Result<FanoutReport, PublishError> {
    let mut report = FanoutReport::default();
    for (dataset, files) in group_by_dataset(paths, prefix) {
        let outcome = publisher.publish(&dataset, source_root, &files).await?;
        info!(
            dataset = %outcome.dataset,
            files = outcome.files,
            changed = outcome.changed,
            total_files = outcome.counts.total_files,
            "Dataset published"
        );
        report.datasets.push(outcome);
    }
    Ok(report)
}
