//! Metadata documents stored next to each archived record

use polyarc_common::EntityKind;
use serde::Serialize;
use serde_json::Value;

use crate::normalize::{format_timestamp, partition_rule, sorted, Placement};

fn field(record: &Value, key: &str) -> Value {
    record.get(key).cloned().unwrap_or(Value::Null)
}

/// First of `keys` holding a non-null, non-empty value
fn first_field(record: &Value, keys: &[&str]) -> Value {
    keys.iter()
        .filter_map(|key| record.get(key))
        .find(|v| !v.is_null() && v.as_str() != Some(""))
        .cloned()
        .unwrap_or(Value::Null)
}

fn child_ids(record: &Value, key: &str) -> (usize, Vec<Value>) {
    let children = record
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let ids = children
        .iter()
        .filter_map(|child| child.get("id"))
        .filter(|id| !id.is_null())
        .cloned()
        .collect();
    (children.len(), ids)
}

#[derive(Debug, Serialize)]
struct EventMetadata {
    entity: &'static str,
    event_id: Value,
    folder_rule: &'static str,
    folder_dt_utc: Option<String>,
    #[serde(rename = "event_createdAt")]
    created_at: Value,
    #[serde(rename = "event_creationDate")]
    creation_date: Value,
    #[serde(rename = "event_startDate")]
    start_date: Value,
    #[serde(rename = "event_endDate")]
    end_date: Value,
    #[serde(rename = "event_updatedAt")]
    updated_at: Value,
    markets_len: usize,
    market_ids: Vec<Value>,
    series_len: usize,
    series_ids: Vec<Value>,
    series_slug: Value,
}

#[derive(Debug, Serialize)]
struct MarketMetadata {
    entity: &'static str,
    market_id: Value,
    folder_rule: &'static str,
    folder_dt_utc: Option<String>,
    #[serde(rename = "market_createdAt")]
    created_at: Value,
    #[serde(rename = "market_updatedAt")]
    updated_at: Value,
    #[serde(rename = "market_startDate")]
    start_date: Value,
    #[serde(rename = "market_endDate")]
    end_date: Value,
    #[serde(rename = "market_closedTime")]
    closed_time: Value,
    #[serde(rename = "conditionId")]
    condition_id: Value,
    slug: Value,
    question: Value,
}

#[derive(Debug, Serialize)]
struct SeriesMetadata {
    entity: &'static str,
    series_id: Value,
    folder_rule: &'static str,
    folder_dt_utc: Option<String>,
    #[serde(rename = "series_createdAt")]
    created_at: Value,
    #[serde(rename = "series_publishedAt")]
    published_at: Value,
    #[serde(rename = "series_updatedAt")]
    updated_at: Value,
    slug: Value,
    ticker: Value,
    title: Value,
    #[serde(rename = "startDate")]
    start_date: Value,
    recurrence: Value,
    #[serde(rename = "seriesType")]
    series_type: Value,
}

/// Render the pretty-printed metadata document for a record
pub fn render(
    kind: EntityKind,
    record: &Value,
    placement: &Placement,
) -> Result<Vec<u8>, serde_json::Error> {
    let folder_dt_utc = placement.canonical.as_ref().map(format_timestamp);
    let folder_rule = partition_rule(kind);
    let id = field(record, "id");

    let document = match kind {
        EntityKind::Events => {
            let (markets_len, market_ids) = child_ids(record, "markets");
            let (series_len, series_ids) = child_ids(record, "series");
            serde_json::to_value(&EventMetadata {
                entity: kind.singular(),
                event_id: id,
                folder_rule,
                folder_dt_utc,
                created_at: field(record, "createdAt"),
                creation_date: field(record, "creationDate"),
                start_date: field(record, "startDate"),
                end_date: first_field(record, &["endDate", "endDateIso"]),
                updated_at: field(record, "updatedAt"),
                markets_len,
                market_ids,
                series_len,
                series_ids,
                series_slug: field(record, "seriesSlug"),
            })
        },
        EntityKind::Markets => serde_json::to_value(&MarketMetadata {
            entity: kind.singular(),
            market_id: id,
            folder_rule,
            folder_dt_utc,
            created_at: field(record, "createdAt"),
            updated_at: field(record, "updatedAt"),
            start_date: field(record, "startDate"),
            end_date: first_field(record, &["endDate", "endDateIso"]),
            closed_time: field(record, "closedTime"),
            condition_id: field(record, "conditionId"),
            slug: field(record, "slug"),
            question: field(record, "question"),
        }),
        EntityKind::Series => serde_json::to_value(&SeriesMetadata {
            entity: kind.singular(),
            series_id: id,
            folder_rule,
            folder_dt_utc,
            created_at: field(record, "createdAt"),
            published_at: first_field(record, &["publishedAt", "published_at"]),
            updated_at: field(record, "updatedAt"),
            slug: field(record, "slug"),
            ticker: field(record, "ticker"),
            title: field(record, "title"),
            start_date: field(record, "startDate"),
            recurrence: field(record, "recurrence"),
            series_type: field(record, "seriesType"),
        }),
    }?;

    serde_json::to_vec_pretty(&sorted(&document))
}
