//! Timestamp and identity normalization
//!
//! Every record gets two derived instants: the *folder* timestamp, which picks
//! its archive partition, and the *freshness* timestamp, which drives the
//! checkpoint boundary. Both are pure functions of the record.

use chrono::{DateTime, SecondsFormat, Utc};
use polyarc_common::{EntityKind, PartitionKey};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// `date [T|space] hh:mm[:ss[.frac]] [Z|±hh[[:]mm]]`
static TIMESTAMP_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2})(?:[Tt ](\d{2}:\d{2})(:\d{2}(?:\.\d+)?)?)?\s*(Z|z|[+-]\d{2}(?::?\d{2})?)?$",
    )
    .ok()
});

/// Parse one of the timestamp spellings the upstream emits into UTC.
///
/// Accepts `Z`, `±hh:mm`, `±hhmm` and the truncated `±hh` offsets, a space or
/// `T` separator, any fractional precision, offset-less times (read as UTC)
/// and bare dates (midnight UTC). Anything else is `None`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let caps = TIMESTAMP_RE.as_ref()?.captures(raw)?;
    let date = caps.get(1)?.as_str();
    let hour_minute = caps.get(2).map_or("00:00", |m| m.as_str());
    let seconds = caps.get(3).map_or(":00", |m| m.as_str());
    let offset = match caps.get(4).map(|m| m.as_str()) {
        None | Some("Z") | Some("z") => "+00:00".to_string(),
        Some(off) => canonical_offset(off),
    };

    let rfc3339 = format!("{}T{}{}{}", date, hour_minute, seconds, offset);
    DateTime::parse_from_rfc3339(&rfc3339)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `+05` → `+05:00`, `+0530` → `+05:30`, `+05:30` unchanged
fn canonical_offset(offset: &str) -> String {
    let (sign, digits) = offset.split_at(1);
    let digits = digits.replace(':', "");
    match digits.len() {
        2 => format!("{}{}:00", sign, digits),
        4 => format!("{}{}:{}", sign, &digits[..2], &digits[2..]),
        _ => offset.to_string(),
    }
}

/// Parse a JSON field value; only strings carry timestamps
pub fn parse_value(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value.and_then(Value::as_str).and_then(parse_timestamp)
}

/// Persisted representation: ISO-8601 UTC with a literal `Z`
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// First parseable value among `keys`
fn first_parsed(record: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter().find_map(|key| parse_value(record.get(key)))
}

/// Timestamp that decides the archive partition of a record
pub fn folder_timestamp(kind: EntityKind, record: &Value) -> Option<DateTime<Utc>> {
    if let Some(created) = parse_value(record.get("createdAt")) {
        return Some(created);
    }

    match kind {
        EntityKind::Events => record
            .get("markets")
            .and_then(Value::as_array)?
            .iter()
            .filter_map(|market| first_parsed(market, &["published_at", "publishedAt"]))
            .max(),
        EntityKind::Markets => first_parsed(record, &["published_at", "publishedAt"]),
        EntityKind::Series => first_parsed(record, &["publishedAt", "published_at"]),
    }
}

/// Copy of `value` with every object's keys in sorted order
pub fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    out.insert(key.clone(), sorted(v));
                }
            }
            Value::Object(out)
        },
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Listing order whose sort key is the freshness timestamp
pub const FRESHNESS_ORDER: &str = "updatedAt";

/// Timestamp compared against the checkpoint: `updatedAt` (or `updated_at`),
/// then `createdAt`, then the publication time
pub fn freshness(record: &Value) -> Option<DateTime<Utc>> {
    first_parsed(
        record,
        &["updatedAt", "updated_at", "createdAt", "published_at", "publishedAt"],
    )
}

/// Human-readable description of how a kind is partitioned
pub fn partition_rule(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Events => "event.createdAt (fallback: max(markets[].published_at))",
        EntityKind::Markets => "market.createdAt (fallback: market.published_at)",
        EntityKind::Series => "series.createdAt (fallback: series.publishedAt)",
    }
}

/// Derived placement of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub canonical: Option<DateTime<Utc>>,
    pub partition: PartitionKey,
}

pub fn place(kind: EntityKind, record: &Value) -> Placement {
    let canonical = folder_timestamp(kind, record);
    Placement {
        partition: PartitionKey::from_timestamp(canonical.as_ref()),
        canonical,
    }
}

/// The record identifier as used in archive file names.
///
/// Strings and numbers are accepted. Empty strings and anything that could
/// escape the partition directory are treated as missing.
pub fn record_id(record: &Value) -> Option<String> {
    let id = match record.get("id")? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
        return None;
    }
    Some(id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_truncated_offset_matches_full_offset() {
        let short = parse_timestamp("2025-03-01T00:00:00+00").unwrap();
        let full = parse_timestamp("2025-03-01T00:00:00+00:00").unwrap();
        assert_eq!(short, full);
        assert_eq!(
            PartitionKey::from_timestamp(Some(&short)),
            PartitionKey::from_timestamp(Some(&full))
        );
    }

    #[test]
    fn test_parse_variants() {
        let expected = utc(2022, 11, 7, 20, 53, 5);
        assert_eq!(
            parse_timestamp("2022-11-07 20:53:05.178+00").unwrap().timestamp(),
            expected.timestamp()
        );
        assert_eq!(parse_timestamp("2022-11-07T20:53:05Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2022-11-07T22:53:05+0200").unwrap(), expected);
        assert_eq!(parse_timestamp("2022-11-07T15:53:05-05:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2022-11-07T20:53:05").unwrap(), expected);
        assert_eq!(parse_timestamp("2022-11-07T20:53Z").unwrap(), utc(2022, 11, 7, 20, 53, 0));
        assert_eq!(parse_timestamp("2022-11-07").unwrap(), utc(2022, 11, 7, 0, 0, 0));
    }

    #[test]
    fn test_offset_crosses_month_boundary() {
        let ts = parse_timestamp("2025-03-01T01:00:00+02").unwrap();
        assert_eq!(ts, utc(2025, 2, 28, 23, 0, 0));
        assert_eq!(PartitionKey::from_timestamp(Some(&ts)).relative_dir(), "2025/02");
    }

    #[test]
    fn test_unparseable_is_none() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2025-13-01T00:00:00Z").is_none());
        assert!(parse_value(Some(&json!(1_700_000_000))).is_none());
        assert!(parse_value(None).is_none());
    }

    #[test]
    fn test_format_uses_literal_z() {
        assert_eq!(format_timestamp(&utc(2025, 1, 12, 0, 0, 0)), "2025-01-12T00:00:00Z");
    }

    #[test]
    fn test_event_falls_back_to_latest_market_publication() {
        let event = json!({
            "id": "1",
            "markets": [
                {"id": "a", "published_at": "2024-05-01 10:00:00+00"},
                {"id": "b", "publishedAt": "2024-06-02T00:00:00Z"},
                {"id": "c"},
                "junk"
            ]
        });
        let placement = place(EntityKind::Events, &event);
        assert_eq!(placement.canonical, Some(utc(2024, 6, 2, 0, 0, 0)));
        assert_eq!(placement.partition.relative_dir(), "2024/06");

        let dated = json!({"id": "2", "createdAt": "2023-01-15T00:00:00Z", "markets": []});
        assert_eq!(place(EntityKind::Events, &dated).partition.relative_dir(), "2023/01");
    }

    #[test]
    fn test_leaf_fallback_and_undated() {
        let market = json!({"id": 7, "createdAt": "garbage", "published_at": "2021-02-03 04:05:06+00"});
        assert_eq!(place(EntityKind::Markets, &market).partition.relative_dir(), "2021/02");

        let series = json!({"id": "s", "publishedAt": "2020-12-31T23:59:59Z"});
        assert_eq!(place(EntityKind::Series, &series).partition.relative_dir(), "2020/12");

        let undated = json!({"id": "u"});
        assert!(place(EntityKind::Series, &undated).partition.is_undated());
    }

    #[test]
    fn test_freshness_chain() {
        let record = json!({
            "updatedAt": "2025-01-12T00:00:00Z",
            "createdAt": "2024-01-01T00:00:00Z"
        });
        assert_eq!(freshness(&record), Some(utc(2025, 1, 12, 0, 0, 0)));

        let snake = json!({
            "updated_at": "2025-02-03T04:05:06Z",
            "createdAt": "2024-01-01T00:00:00Z"
        });
        assert_eq!(freshness(&snake), Some(utc(2025, 2, 3, 4, 5, 6)));

        let created_only = json!({"createdAt": "2024-01-01T00:00:00Z"});
        assert_eq!(freshness(&created_only), Some(utc(2024, 1, 1, 0, 0, 0)));

        let published = json!({"published_at": "2022-11-07 20:53:05+00"});
        assert_eq!(freshness(&published), Some(utc(2022, 11, 7, 20, 53, 5)));

        assert_eq!(freshness(&json!({"id": 1})), None);
    }

    #[test]
    fn test_record_id_rules() {
        assert_eq!(record_id(&json!({"id": "123"})), Some("123".to_string()));
        assert_eq!(record_id(&json!({"id": 42})), Some("42".to_string()));
        assert_eq!(record_id(&json!({"id": ""})), None);
        assert_eq!(record_id(&json!({"id": null})), None);
        assert_eq!(record_id(&json!({"id": "../etc"})), None);
        assert_eq!(record_id(&json!({"id": "a/b"})), None);
        assert_eq!(record_id(&json!({"slug": "x"})), None);
    }
}
