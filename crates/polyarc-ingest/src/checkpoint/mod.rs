//! Checkpoint and run-state persistence
//!
//! The checkpoint document maps each entity to the newest freshness timestamp
//! fully observed by a completed run:
//!
//! ```json
//! {
//!   "events": "2025-01-12T00:00:00Z",
//!   "markets": "2025-01-11T08:30:00Z"
//! }
//! ```
//!
//! Loads are forgiving (anything unreadable means "no checkpoint", i.e. a full
//! backfill). Saves are strict and never move a value backwards.

pub mod backend;
pub mod github;

use chrono::{DateTime, Utc};
use polyarc_common::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{CrawlConfig, StateBackendKind};
use crate::error::CheckpointError;
use crate::normalize::{format_timestamp, parse_timestamp};

pub use backend::{DocumentStore, LocalFileStore, VersionedDocument};
pub use github::GithubContentsStore;

/// Read-modify-write attempts before a conflict is surfaced
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Build the document store selected by the configuration
pub fn document_store(config: &CrawlConfig) -> Result<Arc<dyn DocumentStore>, CheckpointError> {
    match config.state.backend {
        StateBackendKind::File => Ok(Arc::new(LocalFileStore::new(&config.state.state_dir))),
        StateBackendKind::Github => Ok(Arc::new(GithubContentsStore::new(&config.github)?)),
    }
}

fn commit_message(subject: &str) -> String {
    format!("{} ({})", subject, Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))
}

/// Pretty JSON with sorted keys
fn render_document<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, CheckpointError> {
    serde_json::to_vec_pretty(value).map_err(|e| CheckpointError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Parse a stored checkpoint document. Unknown keys are kept so other tools
/// sharing the document are not clobbered.
fn parse_document(key: &str, bytes: &[u8]) -> Result<BTreeMap<String, Value>, CheckpointError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }
    serde_json::from_slice(bytes).map_err(|e| CheckpointError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn entity_values(document: &BTreeMap<String, Value>) -> BTreeMap<EntityKind, DateTime<Utc>> {
    EntityKind::ALL
        .iter()
        .filter_map(|kind| {
            let ts = document.get(kind.as_str())?.as_str().and_then(parse_timestamp)?;
            Some((*kind, ts))
        })
        .collect()
}

/// Per-entity checkpoints in a single document
pub struct CheckpointStore {
    backend: Arc<dyn DocumentStore>,
    key: String,
}

impl CheckpointStore {
    pub fn new(backend: Arc<dyn DocumentStore>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// All checkpoints. Any failure is logged and treated as empty.
    pub async fn load_all(&self) -> BTreeMap<EntityKind, DateTime<Utc>> {
        let document = match self.backend.read(&self.key).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                info!(key = %self.key, "No checkpoint document; starting from scratch");
                return BTreeMap::new();
            },
            Err(error) => {
                warn!(key = %self.key, error = %error, "Checkpoint unreadable; treating as absent");
                return BTreeMap::new();
            },
        };

        match parse_document(&self.key, &document.bytes) {
            Ok(parsed) => entity_values(&parsed),
            Err(error) => {
                warn!(key = %self.key, error = %error, "Checkpoint corrupt; treating as absent");
                BTreeMap::new()
            },
        }
    }

    pub async fn load(&self, kind: EntityKind) -> Option<DateTime<Utc>> {
        self.load_all().await.remove(&kind)
    }

    pub async fn save(
        &self,
        kind: EntityKind,
        value: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, CheckpointError> {
        let saved = self.save_all(&BTreeMap::from([(kind, value)])).await?;
        Ok(saved.get(&kind).copied().unwrap_or(value))
    }

    /// Merge `values` into the stored document, keeping the later timestamp
    /// per entity, and return what was persisted.
    pub async fn save_all(
        &self,
        values: &BTreeMap<EntityKind, DateTime<Utc>>,
    ) -> Result<BTreeMap<EntityKind, DateTime<Utc>>, CheckpointError> {
        let mut attempt = 1;
        loop {
            let current = self.backend.read(&self.key).await?;
            let mut document = match &current {
                Some(doc) => match parse_document(&self.key, &doc.bytes) {
                    Ok(parsed) => parsed,
                    Err(error) => {
                        warn!(key = %self.key, error = %error, "Overwriting corrupt checkpoint");
                        BTreeMap::new()
                    },
                },
                None => BTreeMap::new(),
            };

            let mut merged = entity_values(&document);
            for (kind, value) in values {
                let next = merged.get(kind).map_or(*value, |stored| (*stored).max(*value));
                merged.insert(*kind, next);
            }
            for (kind, value) in &merged {
                document.insert(kind.as_str().to_string(), Value::String(format_timestamp(value)));
            }

            let bytes = render_document(&self.key, &document)?;
            let version = current.as_ref().map(|doc| doc.version.as_str());
            match self
                .backend
                .write(&self.key, &bytes, version, &commit_message("Update Polymarket checkpoint"))
                .await
            {
                Ok(()) => {
                    info!(key = %self.key, backend = self.backend.name(), "Checkpoint saved");
                    return Ok(merged);
                },
                Err(CheckpointError::Conflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(key = %self.key, attempt, "Checkpoint changed underneath us, retrying");
                    attempt += 1;
                },
                Err(error) => return Err(error),
            }
        }
    }
}

/// Last completed crawl, used by the once-per-day guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_crawl_utc_day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_crawl_at_utc: Option<String>,
}

impl RunState {
    pub fn completed_on(&self, now: DateTime<Utc>) -> bool {
        self.last_crawl_utc_day.as_deref() == Some(utc_day(now).as_str())
    }
}

fn utc_day(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

pub struct RunStateStore {
    backend: Arc<dyn DocumentStore>,
    key: String,
}

impl RunStateStore {
    pub fn new(backend: Arc<dyn DocumentStore>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    pub async fn load(&self) -> RunState {
        match self.backend.read(&self.key).await {
            Ok(Some(doc)) => serde_json::from_slice(&doc.bytes).unwrap_or_else(|error| {
                warn!(key = %self.key, error = %error, "Run state corrupt; ignoring");
                RunState::default()
            }),
            Ok(None) => RunState::default(),
            Err(error) => {
                warn!(key = %self.key, error = %error, "Run state unreadable; ignoring");
                RunState::default()
            },
        }
    }

    /// Whether a crawl already completed on the UTC day of `now`
    pub async fn completed_on(&self, now: DateTime<Utc>) -> bool {
        self.load().await.completed_on(now)
    }

    pub async fn mark_completed(&self, now: DateTime<Utc>) -> Result<(), CheckpointError> {
        let state = RunState {
            last_crawl_utc_day: Some(utc_day(now)),
            last_crawl_at_utc: Some(format_timestamp(&now)),
        };
        let bytes = render_document(&self.key, &state)?;
        let current = self.backend.read(&self.key).await?;
        self.backend
            .write(
                &self.key,
                &bytes,
                current.as_ref().map(|doc| doc.version.as_str()),
                &commit_message("Update scheduler state"),
            )
            .await
    }
}

/// Dataset repositories touched by the latest fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetList {
    pub org: String,
    pub prefix: String,
    pub repos: Vec<String>,
    pub updated_at_utc: String,
}

/// Record the fan-out targets. Failures are returned for the caller to log.
pub async fn save_targets(
    backend: &dyn DocumentStore,
    key: &str,
    targets: &TargetList,
) -> Result<(), CheckpointError> {
    let mut targets = targets.clone();
    targets.repos.sort();
    targets.repos.dedup();
    let bytes = render_document(key, &targets)?;
    let current = backend.read(key).await?;
    backend
        .write(
            key,
            &bytes,
            current.as_ref().map(|doc| doc.version.as_str()),
            &commit_message("Update Polymarket targets"),
        )
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const KEY: &str = ".state/polymarket_checkpoint.json";

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
    }

    fn store(dir: &TempDir) -> CheckpointStore {
        CheckpointStore::new(Arc::new(LocalFileStore::new(dir.path())), KEY)
    }

    #[tokio::test]
    async fn test_missing_checkpoint_loads_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(store(&dir).load(EntityKind::Events).await, None);
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_loads_none() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".state")).unwrap();
        std::fs::write(dir.path().join(KEY), b"{not json").unwrap();

        let store = store(&dir);
        assert_eq!(store.load(EntityKind::Markets).await, None);

        // a later save replaces the corrupt document
        store.save(EntityKind::Markets, ts(3)).await.unwrap();
        assert_eq!(store.load(EntityKind::Markets).await, Some(ts(3)));
    }

    #[tokio::test]
    async fn test_save_is_monotonic() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert_eq!(store.save(EntityKind::Events, ts(12)).await.unwrap(), ts(12));
        assert_eq!(store.save(EntityKind::Events, ts(10)).await.unwrap(), ts(12));
        assert_eq!(store.load(EntityKind::Events).await, Some(ts(12)));

        // unchanged value is still a successful save
        store.save(EntityKind::Events, ts(12)).await.unwrap();
        assert_eq!(store.save(EntityKind::Events, ts(20)).await.unwrap(), ts(20));
    }

    #[tokio::test]
    async fn test_document_format_and_foreign_keys() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".state")).unwrap();
        std::fs::write(dir.path().join(KEY), br#"{"zzz_note": "keep me", "series": "2024-06-01T00:00:00+00"}"#)
            .unwrap();

        let store = store(&dir);
        store
            .save_all(&BTreeMap::from([(EntityKind::Markets, ts(5)), (EntityKind::Events, ts(6))]))
            .await
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join(KEY)).unwrap();
        let parsed: BTreeMap<String, Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["events"], "2025-01-06T00:00:00Z");
        assert_eq!(parsed["markets"], "2025-01-05T00:00:00Z");
        assert_eq!(parsed["series"], "2024-06-01T00:00:00Z");
        assert_eq!(parsed["zzz_note"], "keep me");
        assert!(text.find("\"events\"").unwrap() < text.find("\"markets\"").unwrap());
    }

    #[tokio::test]
    async fn test_run_state_once_per_day() {
        let dir = TempDir::new().unwrap();
        let runs = RunStateStore::new(
            Arc::new(LocalFileStore::new(dir.path())),
            ".state/polymarket_scheduler.json",
        );
        let morning = Utc.with_ymd_and_hms(2025, 5, 1, 6, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2025, 5, 1, 22, 0, 0).unwrap();
        let tomorrow = Utc.with_ymd_and_hms(2025, 5, 2, 0, 30, 0).unwrap();

        assert!(!runs.completed_on(morning).await);
        runs.mark_completed(morning).await.unwrap();
        assert!(runs.completed_on(evening).await);
        assert!(!runs.completed_on(tomorrow).await);

        let state = runs.load().await;
        assert_eq!(state.last_crawl_utc_day.as_deref(), Some("2025-05-01"));
        assert_eq!(state.last_crawl_at_utc.as_deref(), Some("2025-05-01T06:00:00Z"));
    }

    #[tokio::test]
    async fn test_targets_are_sorted_and_unique() {
        let dir = TempDir::new().unwrap();
        let backend = LocalFileStore::new(dir.path());
        let targets = TargetList {
            updated_at_utc: "now".to_string(),
            org: "statground".to_string(),
            prefix: "P".to_string(),
            repos: vec!["P_2025".to_string(), "P".to_string(), "P_2025".to_string()],
        };

        save_targets(&backend, ".state/polymarket_targets.json", &targets).await.unwrap();

        let stored: TargetList = serde_json::from_slice(
            &std::fs::read(dir.path().join(".state/polymarket_targets.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(stored.repos, vec!["P", "P_2025"]);
    }
}
