//! Common types used across Polyarc

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

/// Directory name of the bucket holding records with no derivable timestamp
pub const UNDATED_BUCKET: &str = "null";

/// The upstream entity kinds harvested by the crawler.
///
/// Events are the aggregate entity (they embed `markets[]`), markets are the
/// leaf entity and series group events together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Events,
    Markets,
    Series,
}

impl EntityKind {
    /// All kinds in crawl order
    pub const ALL: [EntityKind; 3] = [EntityKind::Events, EntityKind::Markets, EntityKind::Series];

    /// Plural name used for endpoints, archive directories and checkpoint keys
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Events => "events",
            EntityKind::Markets => "markets",
            EntityKind::Series => "series",
        }
    }

    /// Singular name used as the archive file prefix (`event_<id>.json`)
    pub fn singular(self) -> &'static str {
        match self {
            EntityKind::Events => "event",
            EntityKind::Markets => "market",
            EntityKind::Series => "series",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = ArchiveError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "events" | "event" => Ok(EntityKind::Events),
            "markets" | "market" => Ok(EntityKind::Markets),
            "series" => Ok(EntityKind::Series),
            other => Err(ArchiveError::UnknownEntity(other.to_string())),
        }
    }
}

/// Archive bucket a record lands in.
///
/// Derived only from the record's own canonical timestamp, never from fetch
/// order or run history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartitionKey {
    Month { year: i32, month: u32 },
    Undated,
}

impl PartitionKey {
    /// Bucket for an optional canonical timestamp
    pub fn from_timestamp(ts: Option<&DateTime<Utc>>) -> Self {
        match ts {
            Some(ts) => PartitionKey::Month {
                year: ts.year(),
                month: ts.month(),
            },
            None => PartitionKey::Undated,
        }
    }

    pub fn year(&self) -> Option<i32> {
        match self {
            PartitionKey::Month { year, .. } => Some(*year),
            PartitionKey::Undated => None,
        }
    }

    pub fn is_undated(&self) -> bool {
        matches!(self, PartitionKey::Undated)
    }

    /// Relative directory of the bucket: `YYYY/MM` or `null`
    pub fn relative_dir(&self) -> String {
        match self {
            PartitionKey::Month { year, month } => format!("{:04}/{:02}", year, month),
            PartitionKey::Undated => UNDATED_BUCKET.to_string(),
        }
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.relative_dir())
    }
}

impl std::str::FromStr for PartitionKey {
    type Err = ArchiveError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == UNDATED_BUCKET {
            return Ok(PartitionKey::Undated);
        }

        let invalid = || ArchiveError::InvalidPartition(s.to_string());
        let (year, month) = s.split_once('/').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }

        Ok(PartitionKey::Month { year, month })
    }
}
