//! Archive destinations
//!
//! The partition writer renders documents once and hands them to every
//! configured [`ArchiveSink`]. Sinks decide what they care about: the
//! filesystem stores every document, the table store only primary records.

pub mod filesystem;
pub mod table;

use async_trait::async_trait;
use polyarc_common::{EntityKind, PartitionKey};
use serde_json::Value;
use std::sync::Arc;

use crate::error::SinkError;
use crate::fetch::FetchMeta;

pub use filesystem::FilesystemSink;
pub use table::TableSink;

/// What a document is within the archive layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentRole {
    /// The record itself
    Primary,
    /// Derived metadata next to the record
    Metadata,
    /// Per-entity run manifest
    Manifest,
}

/// A rendered archive document
#[derive(Debug, Clone)]
pub struct ArchiveDocument<'a> {
    pub kind: EntityKind,
    pub role: DocumentRole,
    /// Path relative to the archive root (`events/2025/01/event_1.json`)
    pub path: String,
    pub bytes: Vec<u8>,
    pub partition: Option<PartitionKey>,
    /// Source record, for sinks that store structured rows
    pub record: Option<&'a Value>,
    /// Provenance of the page the record came from
    pub fetch: Option<&'a FetchMeta>,
}

/// Result of a single put
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PutOutcome {
    /// The sink does not store this kind of document
    Ignored,
    /// An identical copy was already stored
    Unchanged,
    Written,
}

/// Destination for archive documents
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    /// Store one document
    async fn put(&self, document: &ArchiveDocument<'_>) -> Result<PutOutcome, SinkError>;

    /// Push out anything buffered. Called after every page.
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Fans each document out to several sinks
#[derive(Clone, Default)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn ArchiveSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ArchiveSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }
}

#[async_trait]
impl ArchiveSink for SinkSet {
    fn name(&self) -> &str {
        "set"
    }

    /// Strongest outcome across sinks; the first failure aborts the put
    async fn put(&self, document: &ArchiveDocument<'_>) -> Result<PutOutcome, SinkError> {
        let mut outcome = PutOutcome::Ignored;
        for sink in &self.sinks {
            outcome = outcome.max(sink.put(document).await?);
        }
        Ok(outcome)
    }

    async fn flush(&self) -> Result<(), SinkError> {
        for sink in &self.sinks {
            sink.flush().await?;
        }
        Ok(())
    }
}

/// Filesystem sink that refuses every metadata document
#[cfg(test)]
pub(crate) struct MetadataFailingSink(pub FilesystemSink);

#[cfg(test)]
#[async_trait]
impl ArchiveSink for MetadataFailingSink {
    fn name(&self) -> &str {
        "metadata-failing"
    }

    async fn put(&self, document: &ArchiveDocument<'_>) -> Result<PutOutcome, SinkError> {
        if document.role == DocumentRole::Metadata {
            return Err(SinkError::io(
                document.path.clone(),
                std::io::Error::other("disk full"),
            ));
        }
        self.0.put(document).await
    }
}
