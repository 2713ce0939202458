//! Per-entity run manifest (`<kind>/_manifest_incremental.json`)

use chrono::{DateTime, Utc};
use polyarc_common::EntityKind;
use serde::Serialize;

use crate::config::CrawlConfig;
use crate::driver::{CrawlSummary, StopReason};
use crate::normalize::format_timestamp;

#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub generated_at_utc: String,
    pub entity: EntityKind,
    pub endpoint: String,
    pub order_attempted: Vec<String>,
    pub order_used: String,
    pub page_limit: usize,
    pub max_pages: usize,
    pub pages_fetched: usize,
    pub checkpoint_before: Option<String>,
    pub checkpoint_after: Option<String>,
    pub seen: usize,
    pub written: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub stop_reason: StopReason,
    pub cap_hit: bool,
    pub acceptance: String,
}

impl RunManifest {
    pub fn new(
        config: &CrawlConfig,
        summary: &CrawlSummary,
        checkpoint_before: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            generated_at_utc: format_timestamp(&Utc::now()),
            entity: summary.entity,
            endpoint: config.api.endpoint(summary.entity),
            order_attempted: summary.orders_attempted.clone(),
            order_used: summary.order.clone(),
            page_limit: config.paging.page_limit,
            max_pages: config.paging.max_pages,
            pages_fetched: summary.pages,
            checkpoint_before: checkpoint_before.as_ref().map(format_timestamp),
            checkpoint_after: summary
                .next_checkpoint(checkpoint_before)
                .as_ref()
                .map(format_timestamp),
            seen: summary.seen,
            written: summary.written,
            skipped: summary.skipped,
            rejected: summary.rejected,
            stop_reason: summary.stop_reason,
            cap_hit: summary.cap_hit(),
            acceptance: config.acceptance.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manifest_records_checkpoint_movement() {
        let config = CrawlConfig::default();
        let before = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        let summary = CrawlSummary {
            entity: EntityKind::Markets,
            orders_attempted: vec!["updatedAt".to_string()],
            order: "updatedAt".to_string(),
            pages: 1,
            seen: 3,
            written: 2,
            skipped: 0,
            rejected: 0,
            best_seen: Some(Utc.with_ymd_and_hms(2025, 1, 12, 0, 0, 0).unwrap()),
            stop_reason: StopReason::Boundary,
        };

        let manifest = RunManifest::new(&config, &summary, Some(before));
        let value = serde_json::to_value(&manifest).unwrap();

        assert_eq!(value["entity"], "markets");
        assert_eq!(value["endpoint"], "https://gamma-api.polymarket.com/markets");
        assert_eq!(value["checkpoint_before"], "2025-01-10T00:00:00Z");
        assert_eq!(value["checkpoint_after"], "2025-01-12T00:00:00Z");
        assert_eq!(value["stop_reason"], "boundary");
        assert_eq!(value["cap_hit"], false);
        assert_eq!(value["acceptance"], "all");
    }
}
