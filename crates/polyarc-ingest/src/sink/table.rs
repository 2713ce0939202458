//! Remote analytical table store (ClickHouse HTTP interface)
//!
//! Every primary record becomes one raw row (the full body plus request
//! provenance) and one typed row in the per-entity table. Rows are buffered
//! per page and sent as `INSERT ... FORMAT JSONEachRow` on flush.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polyarc_common::EntityKind;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{ArchiveDocument, ArchiveSink, DocumentRole, PutOutcome};
use crate::config::TableStoreConfig;
use crate::error::SinkError;
use crate::fetch::FetchMeta;
use crate::normalize::parse_value;

const SINK_NAME: &str = "clickhouse";

/// `DateTime64(3)` literal accepted by the default input format
fn ch_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn ts_field(record: &Value, key: &str) -> Option<String> {
    parse_value(record.get(key)).as_ref().map(ch_timestamp)
}

fn u64_of(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn str_field(record: &Value, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn f64_field(record: &Value, key: &str) -> Option<f64> {
    match record.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn flag(record: &Value, key: &str) -> u8 {
    match record.get(key) {
        Some(Value::Bool(true)) => 1,
        Some(Value::Number(n)) => u8::from(n.as_i64().unwrap_or(0) != 0),
        Some(Value::String(s)) => u8::from(matches!(s.as_str(), "true" | "1")),
        _ => 0,
    }
}

/// Ids from the first of `keys` that yields any: arrays of objects or scalars
fn ids_field(record: &Value, keys: &[&str]) -> Vec<u64> {
    keys.iter()
        .filter_map(|key| record.get(key).and_then(Value::as_array))
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(_) => u64_of(item.get("id")),
                    scalar => u64_of(Some(scalar)),
                })
                .collect::<Vec<_>>()
        })
        .find(|ids| !ids.is_empty())
        .unwrap_or_default()
}

/// Upstream sometimes ships lists as JSON-encoded strings
fn string_list(record: &Value, key: &str) -> Vec<String> {
    let decoded;
    let items = match record.get(key) {
        Some(Value::Array(items)) => items,
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => {
                decoded = items;
                &decoded
            },
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct RawRow<'a> {
    entity: &'static str,
    object_id: u64,
    collected_at_utc: String,
    raw_key: Uuid,
    endpoint: &'a str,
    request_params: String,
    http_status: u16,
    response_ms: u64,
    body_json: String,
}

#[derive(Debug, Serialize)]
struct EventRow {
    event_id: u64,
    raw_key: Uuid,
    collected_at_utc: String,
    created_at_utc: Option<String>,
    updated_at_utc: Option<String>,
    title: String,
    ticker: String,
    slug: String,
    description: String,
    active: u8,
    archived: u8,
    closed: u8,
    restricted: u8,
    start_date_utc: Option<String>,
    end_date_utc: Option<String>,
    closed_time_utc: Option<String>,
    creation_date_utc: Option<String>,
    series_slug: String,
    series_ids: Vec<u64>,
    market_ids: Vec<u64>,
    icon_url: String,
    image_url: String,
    volume: Option<f64>,
}

#[derive(Debug, Serialize)]
struct MarketRow {
    market_id: u64,
    raw_key: Uuid,
    collected_at_utc: String,
    created_at_utc: Option<String>,
    updated_at_utc: Option<String>,
    condition_id: String,
    question_id: String,
    slug: String,
    question: String,
    description: String,
    resolution_source: String,
    resolved_by: Option<String>,
    active: u8,
    approved: u8,
    archived: u8,
    closed: u8,
    restricted: u8,
    neg_risk: u8,
    start_date_utc: Option<String>,
    end_date_utc: Option<String>,
    closed_time_utc: Option<String>,
    best_ask: Option<f64>,
    best_bid: Option<f64>,
    last_trade_price: Option<f64>,
    spread: Option<f64>,
    volume: Option<f64>,
    outcomes: Vec<String>,
    outcome_prices: Vec<String>,
    clob_token_ids: Vec<String>,
    series_slug: String,
    series_ids: Vec<u64>,
    event_ids: Vec<u64>,
}

#[derive(Debug, Serialize)]
struct SeriesRow {
    series_id: u64,
    raw_key: Uuid,
    collected_at_utc: String,
    created_at_utc: Option<String>,
    updated_at_utc: Option<String>,
    slug: String,
    ticker: String,
    title: String,
    active: u8,
    archived: u8,
    closed: u8,
    recurrence: String,
    series_type: String,
    liquidity: Option<f64>,
    volume: Option<f64>,
    volume_24h: Option<f64>,
    event_ids: Vec<u64>,
}

fn typed_row(
    kind: EntityKind,
    id: u64,
    record: &Value,
    raw_key: Uuid,
    collected_at: &str,
) -> Result<String, serde_json::Error> {
    let collected_at_utc = collected_at.to_string();
    match kind {
        EntityKind::Events => serde_json::to_string(&EventRow {
            event_id: id,
            raw_key,
            collected_at_utc,
            created_at_utc: ts_field(record, "createdAt"),
            updated_at_utc: ts_field(record, "updatedAt"),
            title: str_field(record, "title"),
            ticker: str_field(record, "ticker"),
            slug: str_field(record, "slug"),
            description: str_field(record, "description"),
            active: flag(record, "active"),
            archived: flag(record, "archived"),
            closed: flag(record, "closed"),
            restricted: flag(record, "restricted"),
            start_date_utc: ts_field(record, "startDate"),
            end_date_utc: ts_field(record, "endDate"),
            closed_time_utc: ts_field(record, "closedTime"),
            creation_date_utc: ts_field(record, "creationDate"),
            series_slug: str_field(record, "seriesSlug"),
            series_ids: ids_field(record, &["series", "seriesIds"]),
            market_ids: ids_field(record, &["markets", "marketIds", "market_ids"]),
            icon_url: str_field(record, "icon"),
            image_url: str_field(record, "image"),
            volume: f64_field(record, "volume"),
        }),
        EntityKind::Markets => serde_json::to_string(&MarketRow {
            market_id: id,
            raw_key,
            collected_at_utc,
            created_at_utc: ts_field(record, "createdAt"),
            updated_at_utc: ts_field(record, "updatedAt"),
            condition_id: str_field(record, "conditionId"),
            question_id: match str_field(record, "questionID") {
                q if q.is_empty() => str_field(record, "questionId"),
                q => q,
            },
            slug: str_field(record, "slug"),
            question: str_field(record, "question"),
            description: str_field(record, "description"),
            resolution_source: str_field(record, "resolutionSource"),
            resolved_by: record
                .get("resolvedBy")
                .filter(|v| !v.is_null())
                .map(|_| str_field(record, "resolvedBy")),
            active: flag(record, "active"),
            approved: flag(record, "approved"),
            archived: flag(record, "archived"),
            closed: flag(record, "closed"),
            restricted: flag(record, "restricted"),
            neg_risk: flag(record, "negRisk"),
            start_date_utc: ts_field(record, "startDate"),
            end_date_utc: ts_field(record, "endDate"),
            closed_time_utc: ts_field(record, "closedTime"),
            best_ask: f64_field(record, "bestAsk"),
            best_bid: f64_field(record, "bestBid"),
            last_trade_price: f64_field(record, "lastTradePrice"),
            spread: f64_field(record, "spread"),
            volume: f64_field(record, "volume"),
            outcomes: string_list(record, "outcomes"),
            outcome_prices: string_list(record, "outcomePrices"),
            clob_token_ids: string_list(record, "clobTokenIds"),
            series_slug: str_field(record, "seriesSlug"),
            series_ids: ids_field(record, &["series"]),
            event_ids: ids_field(record, &["events", "eventIds"]),
        }),
        EntityKind::Series => serde_json::to_string(&SeriesRow {
            series_id: id,
            raw_key,
            collected_at_utc,
            created_at_utc: ts_field(record, "createdAt"),
            updated_at_utc: ts_field(record, "updatedAt"),
            slug: str_field(record, "slug"),
            ticker: str_field(record, "ticker"),
            title: str_field(record, "title"),
            active: flag(record, "active"),
            archived: flag(record, "archived"),
            closed: flag(record, "closed"),
            recurrence: str_field(record, "recurrence"),
            series_type: str_field(record, "seriesType"),
            liquidity: f64_field(record, "liquidity"),
            volume: f64_field(record, "volume"),
            volume_24h: f64_field(record, "volume24hr").or_else(|| f64_field(record, "volume24h")),
            event_ids: ids_field(record, &["events", "eventIds"]),
        }),
    }
}

fn raw_row(
    kind: EntityKind,
    id: u64,
    record: &Value,
    fetch: Option<&FetchMeta>,
    raw_key: Uuid,
    collected_at: &str,
) -> Result<String, serde_json::Error> {
    let request_params = match fetch {
        Some(meta) => serde_json::to_string(&meta.params)?,
        None => "{}".to_string(),
    };
    serde_json::to_string(&RawRow {
        entity: kind.singular(),
        object_id: id,
        collected_at_utc: collected_at.to_string(),
        raw_key,
        endpoint: fetch.map_or("", |m| m.url.as_str()),
        request_params,
        http_status: fetch.map_or(200, |m| m.status),
        response_ms: fetch.map_or(0, |m| m.response_ms),
        body_json: serde_json::to_string(record)?,
    })
}

/// Buffered ClickHouse writer
pub struct TableSink {
    client: Client,
    config: TableStoreConfig,
    /// table name -> pending JSONEachRow lines
    buffer: Mutex<BTreeMap<String, Vec<String>>>,
}

impl TableSink {
    pub fn new(config: TableStoreConfig) -> Result<Self, SinkError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            config,
            buffer: Mutex::new(BTreeMap::new()),
        })
    }

    fn entity_table(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Events => &self.config.event_table,
            EntityKind::Markets => &self.config.market_table,
            EntityKind::Series => &self.config.series_table,
        }
    }

    /// Rows waiting for the next flush
    pub async fn pending_rows(&self) -> usize {
        self.buffer.lock().await.values().map(Vec::len).sum()
    }

    async fn insert(&self, table: &str, lines: &[String]) -> Result<(), SinkError> {
        let query = format!(
            "INSERT INTO {}.{} FORMAT JSONEachRow",
            self.config.database, table
        );
        let url = format!("{}/", self.config.url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .query(&[("query", query.as_str())])
            .header("X-ClickHouse-User", &self.config.user)
            .header("X-ClickHouse-Key", &self.config.password)
            .body(lines.join("\n"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                sink: SINK_NAME.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(table, rows = lines.len(), "Inserted rows");
        Ok(())
    }
}

#[async_trait]
impl ArchiveSink for TableSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    async fn put(&self, document: &ArchiveDocument<'_>) -> Result<PutOutcome, SinkError> {
        let Some(record) = document.record else {
            return Ok(PutOutcome::Ignored);
        };
        if document.role != DocumentRole::Primary {
            return Ok(PutOutcome::Ignored);
        }
        // numeric ids only; the tables key on UInt64
        let Some(id) = u64_of(record.get("id")) else {
            return Ok(PutOutcome::Ignored);
        };

        let raw_key = Uuid::now_v7();
        let collected_at = ch_timestamp(
            &document
                .fetch
                .map_or_else(Utc::now, |meta| meta.collected_at),
        );

        let raw = raw_row(document.kind, id, record, document.fetch, raw_key, &collected_at)?;
        let typed = typed_row(document.kind, id, record, raw_key, &collected_at)?;

        let mut buffer = self.buffer.lock().await;
        buffer
            .entry(self.config.raw_table.clone())
            .or_default()
            .push(raw);
        buffer
            .entry(self.entity_table(document.kind).to_string())
            .or_default()
            .push(typed);

        Ok(PutOutcome::Written)
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let pending = std::mem::take(&mut *self.buffer.lock().await);
        for (table, lines) in pending.iter().filter(|(_, lines)| !lines.is_empty()) {
            self.insert(table, lines).await?;
        }
        Ok(())
    }
}
