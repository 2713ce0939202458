//! Polyarc Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Polyarc archive crawler.
//!
//! # Overview
//!
//! This crate provides common functionality used across all Polyarc workspace members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Checksums**: Content fingerprints used for idempotent writes and version tokens
//! - **Logging**: Centralised `tracing` subscriber setup
//! - **Types**: Entity kinds and archive partition keys
//!
//! # Example
//!
//! ```no_run
//! use polyarc_common::{EntityKind, PartitionKey, Result};
//! use polyarc_common::checksum::sha256_bytes;
//!
//! fn describe(kind: &str, partition: &str, body: &[u8]) -> Result<()> {
//!     let kind: EntityKind = kind.parse()?;
//!     let partition: PartitionKey = partition.parse()?;
//!     println!("{}/{} digest {}", kind, partition, sha256_bytes(body));
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ArchiveError, Result};
pub use types::{EntityKind, PartitionKey};
