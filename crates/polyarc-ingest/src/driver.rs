//! Pagination driver
//!
//! Walks one entity endpoint newest-first until it meets the checkpoint, runs
//! out of data, or hits the page cap:
//!
//! ```text
//! ProbingOrder ──► Paging ──► Stopped
//! ```
//!
//! The probe tries the freshness order, then the fallback order, and keeps
//! the first response that carries a list as page 0.

use chrono::{DateTime, Utc};
use polyarc_common::EntityKind;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::config::PagingConfig;
use crate::error::{FetchError, IngestError, Result};
use crate::fetch::retry::random_jitter;
use crate::fetch::{Page, PageQuery, PageSource};
use crate::normalize::{freshness, FRESHNESS_ORDER};
use crate::writer::{PartitionWriter, WriteOutcome};

/// Why paging ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A record at or below the checkpoint was reached
    Boundary,
    /// A short page signalled the end of the listing
    EndOfData,
    /// A page carried no usable list
    NoData,
    /// The page safety cap was reached
    CapHit,
    /// A page request failed after the probe
    FetchFailed,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StopReason::Boundary => "boundary",
            StopReason::EndOfData => "end_of_data",
            StopReason::NoData => "no_data",
            StopReason::CapHit => "cap_hit",
            StopReason::FetchFailed => "fetch_failed",
        };
        f.write_str(name)
    }
}

/// Result of crawling one entity
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub entity: EntityKind,
    pub orders_attempted: Vec<String>,
    pub order: String,
    pub pages: usize,
    pub seen: usize,
    pub written: usize,
    pub skipped: usize,
    pub rejected: usize,
    /// Greatest freshness among written records
    pub best_seen: Option<DateTime<Utc>>,
    pub stop_reason: StopReason,
}

impl CrawlSummary {
    pub fn cap_hit(&self) -> bool {
        self.stop_reason == StopReason::CapHit
    }

    /// Whether every page the driver wanted was fetched
    pub fn completed(&self) -> bool {
        self.stop_reason != StopReason::FetchFailed
    }

    /// Checkpoint to persist given the value read at run start
    pub fn next_checkpoint(&self, before: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        if !self.completed() {
            return before;
        }
        match (before, self.best_seen) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

enum DriverState {
    ProbingOrder,
    Paging { order: String, page: Page },
    Stopped(StopReason),
}

#[derive(Default)]
struct Tally {
    orders_attempted: Vec<String>,
    order: String,
    pages: usize,
    seen: usize,
    written: usize,
    skipped: usize,
    rejected: usize,
    best_seen: Option<DateTime<Utc>>,
}

pub struct PaginationDriver<'a> {
    source: &'a dyn PageSource,
    writer: &'a PartitionWriter,
    paging: &'a PagingConfig,
}

impl<'a> PaginationDriver<'a> {
    pub fn new(
        source: &'a dyn PageSource,
        writer: &'a PartitionWriter,
        paging: &'a PagingConfig,
    ) -> Self {
        Self {
            source,
            writer,
            paging,
        }
    }

    fn query(&self, order: &str, page_index: usize) -> PageQuery {
        PageQuery {
            limit: self.paging.page_limit,
            offset: page_index * self.paging.page_limit,
            order: order.to_string(),
            ascending: false,
        }
    }

    fn candidate_orders(&self) -> Vec<String> {
        let mut orders = vec![self.paging.order_primary.clone()];
        if self.paging.order_fallback != self.paging.order_primary {
            orders.push(self.paging.order_fallback.clone());
        }
        orders
    }

    /// Crawl one entity against an optional checkpoint.
    ///
    /// Fails only when no ordering yields a list or a sink rejects a primary
    /// write. Later fetch failures end the crawl with
    /// [`StopReason::FetchFailed`].
    #[instrument(skip_all, fields(entity = %kind))]
    pub async fn crawl(
        &self,
        kind: EntityKind,
        checkpoint: Option<DateTime<Utc>>,
    ) -> Result<CrawlSummary> {
        let mut tally = Tally::default();
        let mut state = DriverState::ProbingOrder;

        let stop_reason = loop {
            state = match state {
                DriverState::ProbingOrder => {
                    let (order, page) = self.probe(kind, &mut tally).await?;
                    info!(order = %order, "Ordering selected");
                    tally.order = order.clone();
                    DriverState::Paging { order, page }
                },
                DriverState::Paging { order, page } => {
                    self.process_page(kind, checkpoint, &order, page, &mut tally)
                        .await?
                },
                DriverState::Stopped(reason) => break reason,
            };
        };

        let summary = CrawlSummary {
            entity: kind,
            orders_attempted: tally.orders_attempted,
            order: tally.order,
            pages: tally.pages,
            seen: tally.seen,
            written: tally.written,
            skipped: tally.skipped,
            rejected: tally.rejected,
            best_seen: tally.best_seen,
            stop_reason,
        };

        if summary.cap_hit() {
            warn!(pages = summary.pages, "Page cap reached before checkpoint or end of data");
        }
        info!(
            stop = %summary.stop_reason,
            pages = summary.pages,
            seen = summary.seen,
            written = summary.written,
            skipped = summary.skipped,
            rejected = summary.rejected,
            "Crawl finished"
        );

        Ok(summary)
    }

    async fn probe(&self, kind: EntityKind, tally: &mut Tally) -> Result<(String, Page)> {
        let mut last_error: Option<FetchError> = None;

        for order in self.candidate_orders() {
            tally.orders_attempted.push(order.clone());
            match self.source.fetch_page(kind, &self.query(&order, 0)).await {
                Ok(page) if page.items.is_some() => return Ok((order, page)),
                Ok(_) => warn!(order = %order, "Ordering returned no list, trying next"),
                Err(error) => {
                    warn!(order = %order, error = %error, "Ordering rejected, trying next");
                    last_error = Some(error);
                },
            }
        }

        Err(IngestError::OrderProbe {
            entity: kind,
            orders: tally.orders_attempted.clone(),
            last: last_error,
        })
    }

    async fn process_page(
        &self,
        kind: EntityKind,
        checkpoint: Option<DateTime<Utc>>,
        order: &str,
        page: Page,
        tally: &mut Tally,
    ) -> Result<DriverState> {
        let page_index = tally.pages;
        let offset = page_index * self.paging.page_limit;

        let items = match page.items.as_deref() {
            Some(items) if !items.is_empty() => items,
            _ => return Ok(DriverState::Stopped(StopReason::NoData)),
        };

        // Only a freshness-ordered listing can be cut at the checkpoint
        let boundary_at = checkpoint.filter(|_| order == FRESHNESS_ORDER);
        let mut boundary = false;

        for record in items.iter().filter(|item| item.is_object()) {
            tally.seen += 1;
            let fresh = freshness(record);

            if let (Some(limit), Some(ts)) = (boundary_at, fresh) {
                if ts <= limit {
                    boundary = true;
                    break;
                }
            }

            match self.writer.write(kind, record, Some(&page.meta)).await? {
                WriteOutcome::Written(_) => {
                    tally.written += 1;
                    if let Some(ts) = fresh {
                        tally.best_seen = Some(tally.best_seen.map_or(ts, |best| best.max(ts)));
                    }
                },
                WriteOutcome::Skipped(_) => tally.skipped += 1,
                WriteOutcome::Rejected(reason) => {
                    tally.rejected += 1;
                    warn!(reason = %reason, id = ?record.get("id").map(serde_json::Value::to_string), "Record rejected");
                },
            }
        }

        self.writer.flush().await?;
        tally.pages += 1;
        info!(page = page_index + 1, offset, order, items = items.len(), written = tally.written, "Page processed");

        if boundary {
            info!("Reached checkpoint");
            return Ok(DriverState::Stopped(StopReason::Boundary));
        }
        if items.len() < self.paging.page_limit {
            return Ok(DriverState::Stopped(StopReason::EndOfData));
        }
        if tally.pages >= self.paging.max_pages {
            return Ok(DriverState::Stopped(StopReason::CapHit));
        }

        let delay = self.paging.page_delay + random_jitter(self.paging.page_jitter);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.source.fetch_page(kind, &self.query(order, tally.pages)).await {
            Ok(page) => Ok(DriverState::Paging {
                order: order.to_string(),
                page,
            }),
            Err(error) => {
                warn!(offset = tally.pages * self.paging.page_limit, error = %error, "Page fetch failed, stopping");
                Ok(DriverState::Stopped(StopReason::FetchFailed))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{AcceptancePolicy, CrawlConfig};
    use crate::fetch::FetchMeta;
    use crate::sink::{FilesystemSink, MetadataFailingSink};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Serves canned pages keyed by (order, offset) and records every query
    #[derive(Default)]
    struct ScriptedSource {
        pages: HashMap<(String, usize), std::result::Result<Value, u16>>,
        calls: Mutex<Vec<PageQuery>>,
    }

    impl ScriptedSource {
        fn page(mut self, order: &str, offset: usize, body: Value) -> Self {
            self.pages.insert((order.to_string(), offset), Ok(body));
            self
        }

        fn fail(mut self, order: &str, offset: usize, status: u16) -> Self {
            self.pages.insert((order.to_string(), offset), Err(status));
            self
        }

        fn calls(&self) -> Vec<PageQuery> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageSource for ScriptedSource {
        async fn fetch_page(
            &self,
            _kind: EntityKind,
            query: &PageQuery,
        ) -> std::result::Result<Page, FetchError> {
            self.calls.lock().unwrap().push(query.clone());
            let meta = FetchMeta {
                url: format!("scripted://{}/{}", query.order, query.offset),
                params: BTreeMap::new(),
                status: 200,
                response_ms: 0,
                collected_at: Utc::now(),
            };
            match self.pages.get(&(query.order.clone(), query.offset)) {
                Some(Ok(body)) => Ok(Page {
                    items: body.as_array().cloned(),
                    meta,
                }),
                Some(Err(status)) => Err(FetchError::Request {
                    status: *status,
                    url: meta.url,
                    body: String::new(),
                }),
                None => Ok(Page {
                    items: Some(Vec::new()),
                    meta,
                }),
            }
        }
    }

    fn paging(limit: usize, max_pages: usize) -> PagingConfig {
        let mut config = CrawlConfig::default().without_delays();
        config.paging.page_limit = limit;
        config.paging.max_pages = max_pages;
        config.paging
    }

    fn record(id: usize, updated: &str) -> Value {
        json!({"id": id.to_string(), "updatedAt": updated, "createdAt": "2025-01-01T00:00:00Z"})
    }

    fn writer(dir: &TempDir) -> PartitionWriter {
        PartitionWriter::new(Arc::new(FilesystemSink::new(dir.path())), AcceptancePolicy::All)
    }

    #[tokio::test]
    async fn test_boundary_stops_mid_page() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let source = ScriptedSource::default().page(
            "updatedAt",
            0,
            json!([
                record(1, "2025-01-12T00:00:00Z"),
                record(2, "2025-01-11T00:00:00Z"),
                record(3, "2025-01-09T00:00:00Z"),
                record(4, "2025-01-05T00:00:00Z"),
            ]),
        );
        let paging = paging(4, 10);
        let checkpoint = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();

        let summary = PaginationDriver::new(&source, &writer, &paging)
            .crawl(EntityKind::Markets, Some(checkpoint))
            .await
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::Boundary);
        assert_eq!(summary.written, 2);
        assert_eq!(summary.pages, 1);
        assert_eq!(source.calls().len(), 1);
        assert_eq!(
            summary.best_seen,
            Some(Utc.with_ymd_and_hms(2025, 1, 12, 0, 0, 0).unwrap())
        );
        assert!(!dir.path().join("markets/2025/01/market_3.json").exists());
    }

    #[tokio::test]
    async fn test_fallback_order_ignores_checkpoint() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let source = ScriptedSource::default()
            .fail("updatedAt", 0, 422)
            .page("id", 0, json!([record(9, "2020-01-01T00:00:00Z"), record(8, "2020-01-01T00:00:00Z")]));
        let paging = paging(5, 10);
        let checkpoint = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();

        let summary = PaginationDriver::new(&source, &writer, &paging)
            .crawl(EntityKind::Series, Some(checkpoint))
            .await
            .unwrap();

        assert_eq!(summary.order, "id");
        assert_eq!(summary.orders_attempted, vec!["updatedAt", "id"]);
        assert_eq!(summary.written, 2);
        assert_eq!(summary.stop_reason, StopReason::EndOfData);
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_probe_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let source = ScriptedSource::default()
            .page("updatedAt", 0, json!({"error": "nope"}))
            .fail("id", 0, 400);
        let paging = paging(5, 10);

        let err = PaginationDriver::new(&source, &writer, &paging)
            .crawl(EntityKind::Events, None)
            .await
            .unwrap_err();

        match err {
            IngestError::OrderProbe { entity, orders, last } => {
                assert_eq!(entity, EntityKind::Events);
                assert_eq!(orders, vec!["updatedAt", "id"]);
                assert_eq!(last.and_then(|e| e.status()), Some(400));
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cap_hit_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let mut source = ScriptedSource::default();
        for page in 0..5 {
            source = source.page(
                "updatedAt",
                page * 2,
                json!([record(page * 2, "2025-01-01T00:00:00Z"), record(page * 2 + 1, "2025-01-01T00:00:00Z")]),
            );
        }
        let paging = paging(2, 3);

        let summary = PaginationDriver::new(&source, &writer, &paging)
            .crawl(EntityKind::Markets, None)
            .await
            .unwrap();

        assert!(summary.cap_hit());
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.written, 6);
        assert_eq!(source.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_mid_crawl_failure_keeps_checkpoint() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let source = ScriptedSource::default()
            .page("updatedAt", 0, json!([record(1, "2025-02-01T00:00:00Z"), record(2, "2025-02-01T00:00:00Z")]))
            .fail("updatedAt", 2, 404);
        let paging = paging(2, 10);
        let before = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let summary = PaginationDriver::new(&source, &writer, &paging)
            .crawl(EntityKind::Markets, Some(before))
            .await
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::FetchFailed);
        assert_eq!(summary.written, 2);
        assert_eq!(summary.next_checkpoint(Some(before)), Some(before));
    }

    #[tokio::test]
    async fn test_undated_and_non_object_records() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let source = ScriptedSource::default().page(
            "updatedAt",
            0,
            json!([{"id": "a"}, 17, {"title": "no id", "updatedAt": "2025-03-01T00:00:00Z"}]),
        );
        let paging = paging(10, 10);
        let checkpoint = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let summary = PaginationDriver::new(&source, &writer, &paging)
            .crawl(EntityKind::Series, Some(checkpoint))
            .await
            .unwrap();

        assert_eq!(summary.seen, 2);
        assert_eq!(summary.written, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.best_seen, None);
        assert_eq!(summary.next_checkpoint(Some(checkpoint)), Some(checkpoint));
        assert!(dir.path().join("series/null/series_a.json").exists());
    }

    #[test]
    fn test_next_checkpoint_never_moves_back() {
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let summary = CrawlSummary {
            entity: EntityKind::Events,
            orders_attempted: vec!["updatedAt".to_string()],
            order: "updatedAt".to_string(),
            pages: 1,
            seen: 1,
            written: 1,
            skipped: 0,
            rejected: 0,
            best_seen: Some(older),
            stop_reason: StopReason::EndOfData,
        };
        assert_eq!(summary.next_checkpoint(Some(newer)), Some(newer));
        assert_eq!(summary.next_checkpoint(None), Some(older));
    }

    #[tokio::test]
    async fn test_metadata_failure_still_advances_checkpoint() {
        let dir = TempDir::new().unwrap();
        let sink = MetadataFailingSink(FilesystemSink::new(dir.path()));
        let writer = PartitionWriter::new(Arc::new(sink), AcceptancePolicy::All);
        let source = ScriptedSource::default().page(
            "updatedAt",
            0,
            json!([record(1, "2025-01-12T00:00:00Z"), record(2, "2025-01-11T00:00:00Z")]),
        );
        let paging = paging(5, 10);
        let checkpoint = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();

        let summary = PaginationDriver::new(&source, &writer, &paging)
            .crawl(EntityKind::Markets, Some(checkpoint))
            .await
            .unwrap();

        assert_eq!(summary.written, 2);
        assert_eq!(summary.stop_reason, StopReason::EndOfData);
        assert_eq!(
            summary.next_checkpoint(Some(checkpoint)),
            Some(Utc.with_ymd_and_hms(2025, 1, 12, 0, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_non_freshness_primary_order_ignores_checkpoint() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let source = ScriptedSource::default().page(
            "createdAt",
            0,
            json!([record(1, "2025-01-12T00:00:00Z"), record(2, "2024-06-01T00:00:00Z")]),
        );
        let mut paging = paging(5, 10);
        paging.order_primary = "createdAt".to_string();
        let checkpoint = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();

        let summary = PaginationDriver::new(&source, &writer, &paging)
            .crawl(EntityKind::Markets, Some(checkpoint))
            .await
            .unwrap();

        assert_eq!(summary.order, "createdAt");
        assert_eq!(summary.written, 2);
        assert_eq!(summary.stop_reason, StopReason::EndOfData);
    }
}
