//! Partition writer
//!
//! Places each record in its `(kind, partition, id)` slot, renders the primary
//! and metadata documents, and hands them to the sinks. Rendering is
//! deterministic, so writing the same record twice produces identical bytes.

use polyarc_common::{EntityKind, PartitionKey};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::AcceptancePolicy;
use crate::error::SinkError;
use crate::fetch::FetchMeta;
use crate::manifest::RunManifest;
use crate::metadata;
use crate::normalize::{place, record_id, sorted};
use crate::sink::{ArchiveDocument, ArchiveSink, DocumentRole};

/// File name of the per-entity manifest
pub const MANIFEST_FILE_NAME: &str = "_manifest_incremental.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The partition is outside the run's acceptance policy
    OutsidePolicy(PartitionKey),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::OutsidePolicy(partition) => {
                write!(f, "partition {} outside acceptance policy", partition)
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingId,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::MissingId => f.write_str("missing or unusable id"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(PartitionKey),
    Skipped(SkipReason),
    Rejected(RejectReason),
}

/// Relative path of a record's primary document
pub fn primary_path(kind: EntityKind, partition: &PartitionKey, id: &str) -> String {
    format!(
        "{}/{}/{}_{}.json",
        kind.as_str(),
        partition.relative_dir(),
        kind.singular(),
        id
    )
}

/// Relative path of a record's metadata document
pub fn metadata_path(kind: EntityKind, partition: &PartitionKey, id: &str) -> String {
    format!(
        "{}/{}/{}_{}.meta.json",
        kind.as_str(),
        partition.relative_dir(),
        kind.singular(),
        id
    )
}

/// Compact, key-sorted encoding of a record
pub fn primary_bytes(record: &Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&sorted(record))
}

pub struct PartitionWriter {
    sink: Arc<dyn ArchiveSink>,
    acceptance: AcceptancePolicy,
    /// Relative paths written during this run
    ledger: Mutex<BTreeSet<String>>,
}

impl PartitionWriter {
    pub fn new(sink: Arc<dyn ArchiveSink>, acceptance: AcceptancePolicy) -> Self {
        Self {
            sink,
            acceptance,
            ledger: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn acceptance(&self) -> AcceptancePolicy {
        self.acceptance
    }

    /// Archive one record.
    ///
    /// Only a failed primary write is an error. A failed metadata write is
    /// logged and the record still counts as written.
    pub async fn write(
        &self,
        kind: EntityKind,
        record: &Value,
        fetch: Option<&FetchMeta>,
    ) -> Result<WriteOutcome, SinkError> {
        let Some(id) = record_id(record) else {
            return Ok(WriteOutcome::Rejected(RejectReason::MissingId));
        };

        let placement = place(kind, record);
        if !self.acceptance.accepts(&placement.partition) {
            return Ok(WriteOutcome::Skipped(SkipReason::OutsidePolicy(placement.partition)));
        }

        let path = primary_path(kind, &placement.partition, &id);
        let primary = ArchiveDocument {
            kind,
            role: DocumentRole::Primary,
            path: path.clone(),
            bytes: primary_bytes(record)?,
            partition: Some(placement.partition),
            record: Some(record),
            fetch,
        };
        let outcome = self.sink.put(&primary).await?;
        debug!(entity = %kind, id = %id, partition = %placement.partition, ?outcome, "Stored record");
        self.ledger.lock().await.insert(path);

        let meta_path = metadata_path(kind, &placement.partition, &id);
        let stored = match metadata::render(kind, record, &placement) {
            Ok(bytes) => {
                let document = ArchiveDocument {
                    kind,
                    role: DocumentRole::Metadata,
                    path: meta_path.clone(),
                    bytes,
                    partition: Some(placement.partition),
                    record: Some(record),
                    fetch,
                };
                self.sink.put(&document).await.map_err(|e| e.to_string())
            },
            Err(e) => Err(e.to_string()),
        };
        match stored {
            Ok(_) => {
                self.ledger.lock().await.insert(meta_path);
            },
            Err(error) => {
                warn!(entity = %kind, id = %id, error = %error, "Metadata write failed; primary kept")
            },
        }

        Ok(WriteOutcome::Written(placement.partition))
    }

    /// Store the run manifest for an entity. Manifests are not part of the
    /// ledger.
    pub async fn write_manifest(&self, manifest: &RunManifest) -> Result<(), SinkError> {
        let document = ArchiveDocument {
            kind: manifest.entity,
            role: DocumentRole::Manifest,
            path: format!("{}/{}", manifest.entity.as_str(), MANIFEST_FILE_NAME),
            bytes: serde_json::to_vec_pretty(manifest)?,
            partition: None,
            record: None,
            fetch: None,
        };
        self.sink.put(&document).await?;
        Ok(())
    }

    pub async fn flush(&self) -> Result<(), SinkError> {
        self.sink.flush().await
    }

    /// Every primary and metadata path written so far, sorted
    pub async fn written_paths(&self) -> Vec<String> {
        self.ledger.lock().await.iter().cloned().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sink::{FilesystemSink, MetadataFailingSink};
    use serde_json::json;
    use tempfile::TempDir;

    fn writer(dir: &TempDir, acceptance: AcceptancePolicy) -> PartitionWriter {
        PartitionWriter::new(Arc::new(FilesystemSink::new(dir.path())), acceptance)
    }

    #[tokio::test]
    async fn test_write_places_record_and_metadata() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir, AcceptancePolicy::All);
        let market = json!({"id": "77", "createdAt": "2025-03-01T00:00:00+00", "question": "Q"});

        let outcome = writer.write(EntityKind::Markets, &market, None).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Written(PartitionKey::Month { year: 2025, month: 3 }));
        assert!(dir.path().join("markets/2025/03/market_77.json").exists());
        assert!(dir.path().join("markets/2025/03/market_77.meta.json").exists());
        assert_eq!(
            writer.written_paths().await,
            vec![
                "markets/2025/03/market_77.json".to_string(),
                "markets/2025/03/market_77.meta.json".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_rewrite_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir, AcceptancePolicy::All);
        let event = json!({"zeta": 1, "id": 5, "alpha": {"b": 2, "a": 1}, "createdAt": "2024-02-02T00:00:00Z"});
        let path = dir.path().join("events/2024/02/event_5.json");

        writer.write(EntityKind::Events, &event, None).await.unwrap();
        let first = std::fs::read(&path).unwrap();
        writer.write(EntityKind::Events, &event, None).await.unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            String::from_utf8(first).unwrap(),
            r#"{"alpha":{"a":1,"b":2},"createdAt":"2024-02-02T00:00:00Z","id":5,"zeta":1}"#
        );
    }

    #[tokio::test]
    async fn test_missing_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir, AcceptancePolicy::All);

        let outcome = writer
            .write(EntityKind::Series, &json!({"slug": "x"}), None)
            .await
            .unwrap();

        assert_eq!(outcome, WriteOutcome::Rejected(RejectReason::MissingId));
        assert!(writer.written_paths().await.is_empty());
    }

    #[tokio::test]
    async fn test_acceptance_policy_skips() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir, AcceptancePolicy::Year(2025));

        let old = json!({"id": 1, "createdAt": "2023-06-01T00:00:00Z"});
        let undated = json!({"id": 2});
        let current = json!({"id": 3, "createdAt": "2025-06-01T00:00:00Z"});

        assert!(matches!(
            writer.write(EntityKind::Markets, &old, None).await.unwrap(),
            WriteOutcome::Skipped(_)
        ));
        assert!(matches!(
            writer.write(EntityKind::Markets, &undated, None).await.unwrap(),
            WriteOutcome::Skipped(_)
        ));
        assert!(matches!(
            writer.write(EntityKind::Markets, &current, None).await.unwrap(),
            WriteOutcome::Written(_)
        ));
        assert!(!dir.path().join("markets/2023").exists());
    }

    #[tokio::test]
    async fn test_undated_goes_to_null_bucket() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir, AcceptancePolicy::UndatedOnly);

        writer
            .write(EntityKind::Series, &json!({"id": "s1"}), None)
            .await
            .unwrap();

        assert!(dir.path().join("series/null/series_s1.json").exists());
    }

    #[tokio::test]
    async fn test_metadata_failure_keeps_primary() {
        let dir = TempDir::new().unwrap();
        let sink = MetadataFailingSink(FilesystemSink::new(dir.path()));
        let writer = PartitionWriter::new(Arc::new(sink), AcceptancePolicy::All);
        let market = json!({"id": "5", "createdAt": "2025-04-01T00:00:00Z"});

        let outcome = writer.write(EntityKind::Markets, &market, None).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Written(PartitionKey::Month { year: 2025, month: 4 }));
        assert!(dir.path().join("markets/2025/04/market_5.json").exists());
        assert!(!dir.path().join("markets/2025/04/market_5.meta.json").exists());
        assert_eq!(writer.written_paths().await, vec!["markets/2025/04/market_5.json".to_string()]);
    }
}
