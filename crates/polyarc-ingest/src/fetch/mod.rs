//! Upstream HTTP fetch client
//!
//! One call issues one page request. Transient failures (429, 5xx, network,
//! undecodable bodies) are retried through [`retry::retry_with_backoff`];
//! other client errors fail immediately so the driver can fall back to a
//! different ordering.

pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polyarc_common::EntityKind;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{FetchError, IngestError, Result};
use retry::{retry_with_backoff, BackoffPolicy, RetryError};

/// Longest error body kept in a [`FetchError::Request`]
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Query for one page of an entity listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub limit: usize,
    pub offset: usize,
    pub order: String,
    pub ascending: bool,
}

impl PageQuery {
    pub fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("limit", self.limit.to_string()),
            ("offset", self.offset.to_string()),
            ("order", self.order.clone()),
            ("ascending", self.ascending.to_string()),
        ]
    }
}

/// How a list is pulled out of a response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnwrapStrategy {
    /// The body itself is the array
    RawArray,
    /// The array sits under this key of a wrapping object
    Keyed(String),
}

impl UnwrapStrategy {
    /// Strategies tried in order for an entity: raw array, `data`, the
    /// entity name, `results`
    pub fn for_entity(kind: EntityKind) -> Vec<UnwrapStrategy> {
        vec![
            UnwrapStrategy::RawArray,
            UnwrapStrategy::Keyed("data".to_string()),
            UnwrapStrategy::Keyed(kind.as_str().to_string()),
            UnwrapStrategy::Keyed("results".to_string()),
        ]
    }

    fn matches(&self, body: &Value) -> bool {
        match self {
            UnwrapStrategy::RawArray => body.is_array(),
            UnwrapStrategy::Keyed(key) => body.get(key).is_some_and(Value::is_array),
        }
    }

    fn take(&self, body: Value) -> Option<Vec<Value>> {
        match (self, body) {
            (UnwrapStrategy::RawArray, Value::Array(items)) => Some(items),
            (UnwrapStrategy::Keyed(key), Value::Object(mut map)) => match map.remove(key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Pull the record list out of a body, or `None` when no strategy matches
pub fn unwrap_list(body: Value, strategies: &[UnwrapStrategy]) -> Option<Vec<Value>> {
    let strategy = strategies.iter().find(|s| s.matches(&body))?;
    strategy.take(body)
}

/// Provenance of a successful request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchMeta {
    pub url: String,
    pub params: BTreeMap<String, String>,
    pub status: u16,
    pub response_ms: u64,
    pub collected_at: DateTime<Utc>,
}

/// One fetched page. `items` is `None` when the body held no list.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Option<Vec<Value>>,
    pub meta: FetchMeta,
}

/// Source of entity pages
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(
        &self,
        kind: EntityKind,
        query: &PageQuery,
    ) -> std::result::Result<Page, FetchError>;
}

/// reqwest-backed page source for the Gamma API
pub struct FetchClient {
    client: Client,
    api: ApiConfig,
    backoff: BackoffPolicy,
}

impl FetchClient {
    pub fn new(api: &ApiConfig, backoff: BackoffPolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = &api.api_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| IngestError::config("POLY_API_TOKEN contains invalid characters"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(api.request_timeout)
            .user_agent(api.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| IngestError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api: api.clone(),
            backoff,
        })
    }

    async fn fetch_once(
        &self,
        kind: EntityKind,
        query: &PageQuery,
    ) -> std::result::Result<Page, FetchError> {
        let endpoint = self.api.endpoint(kind);
        let request = self
            .client
            .get(&endpoint)
            .query(&query.params())
            .build()
            .map_err(|source| FetchError::InvalidRequest {
                url: endpoint.clone(),
                source,
            })?;
        let url = request.url().to_string();

        let started = Instant::now();
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|source| FetchError::Network {
                url: url.clone(),
                source,
            })?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited { url });
        }
        if status.is_server_error() {
            return Err(FetchError::Server {
                status: status.as_u16(),
                url,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Request {
                status: status.as_u16(),
                url,
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let bytes = response.bytes().await.map_err(|source| FetchError::Network {
            url: url.clone(),
            source,
        })?;
        let response_ms = started.elapsed().as_millis() as u64;

        let items = if bytes.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            let body: Value = serde_json::from_slice(&bytes).map_err(|source| {
                FetchError::Decode {
                    url: url.clone(),
                    source,
                }
            })?;
            unwrap_list(body, &UnwrapStrategy::for_entity(kind))
        };

        debug!(
            entity = %kind,
            url = %url,
            status = status.as_u16(),
            response_ms,
            items = items.as_ref().map(Vec::len),
            "Fetched page"
        );

        Ok(Page {
            items,
            meta: FetchMeta {
                url,
                params: query
                    .params()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                status: status.as_u16(),
                response_ms,
                collected_at: Utc::now(),
            },
        })
    }
}

#[async_trait]
impl PageSource for FetchClient {
    async fn fetch_page(
        &self,
        kind: EntityKind,
        query: &PageQuery,
    ) -> std::result::Result<Page, FetchError> {
        retry_with_backoff(&self.backoff, FetchError::is_retryable, |_| {
            self.fetch_once(kind, query)
        })
        .await
        .map_err(|err| match err {
            RetryError::Fatal(err) => err,
            RetryError::Exhausted { attempts, last } => FetchError::RetriesExhausted {
                attempts,
                last: Box::new(last),
            },
        })
    }
}
