//! Polyarc Ingest Library
//!
//! Incremental crawl engine for the Polymarket Gamma API.
//!
//! # Overview
//!
//! Each run pages through the `events`, `markets` and `series` listings
//! newest-first, archives every record into a time-partitioned layout, and
//! stops at the per-entity checkpoint left by the previous run:
//!
//! - **Normalizer** (`normalize`): timestamp parsing and partition keys
//! - **Fetch client** (`fetch`): page requests with retry and backoff
//! - **Pagination driver** (`driver`): ordering probe, paging, stop rules
//! - **Partition writer** (`writer`): idempotent primary and metadata documents
//! - **Sinks** (`sink`): filesystem partitions and a ClickHouse table store
//! - **Checkpoint store** (`checkpoint`): monotonic per-entity checkpoints
//! - **Fan-out** (`fanout`): yearly datasets with recomputed counts
//!
//! # Example
//!
//! ```no_run
//! use polyarc_ingest::{CrawlConfig, Crawler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let crawler = Crawler::from_config(CrawlConfig::from_env()?)?;
//!     let report = crawler.run(false).await?;
//!     println!("failures: {}", report.has_failures());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod error;
pub mod fanout;
pub mod fetch;
pub mod manifest;
pub mod metadata;
pub mod normalize;
pub mod run;
pub mod sink;
pub mod writer;

// Re-export commonly used types
pub use config::{AcceptancePolicy, CrawlConfig};
pub use driver::{CrawlSummary, PaginationDriver, StopReason};
pub use error::{IngestError, Result};
pub use run::{Crawler, EntityOutcome, EntityReport, RunReport};
pub use writer::{PartitionWriter, WriteOutcome};
