//! Error types for the crawl engine
//!
//! The taxonomy separates what is retried (transient upstream failures), what
//! fails a single ordering attempt (request errors), and what must abort the
//! run (checkpoint, credential and archive integrity failures). Record-level
//! anomalies never become errors; they are counted in the crawl summary.

use polyarc_common::EntityKind;
use thiserror::Error;

/// Result type alias for crawl engine operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Outcome classification of a single upstream request
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP 429 from the upstream
    #[error("Rate limited by upstream (HTTP 429) at {url}")]
    RateLimited { url: String },

    /// Any 5xx from the upstream
    #[error("Upstream server error (HTTP {status}) at {url}")]
    Server { status: u16, url: String },

    /// Non-retryable client error: bad parameters, auth failure, not found
    #[error("Request rejected (HTTP {status}) at {url}: {body}")]
    Request { status: u16, url: String, body: String },

    /// The request could not be built, e.g. a malformed base URL
    #[error("Invalid request for {url}: {source}")]
    InvalidRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Timeout, connection reset, DNS failure, truncated body
    #[error("Network error at {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Response body was not valid JSON
    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// Retry budget spent on transient failures
    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether the retry primitive should try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. }
                | FetchError::Server { .. }
                | FetchError::Network { .. }
                | FetchError::Decode { .. }
        )
    }

    /// HTTP status associated with the failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::RateLimited { .. } => Some(429),
            FetchError::Server { status, .. } | FetchError::Request { status, .. } => {
                Some(*status)
            },
            FetchError::RetriesExhausted { last, .. } => last.status(),
            FetchError::InvalidRequest { .. }
            | FetchError::Network { .. }
            | FetchError::Decode { .. } => None,
        }
    }
}

/// Checkpoint persistence failures
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint backend error for '{key}': {message}")]
    Backend { key: String, message: String },

    /// The stored document changed between read and write
    #[error("Checkpoint '{key}' was modified concurrently (expected version {expected:?})")]
    Conflict { key: String, expected: Option<String> },

    #[error("Checkpoint document '{key}' is corrupt: {message}")]
    Corrupt { key: String, message: String },

    #[error("Checkpoint backend '{backend}' requires a token ({hint})")]
    MissingCredential { backend: &'static str, hint: &'static str },

    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CheckpointError {
    pub fn backend(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Archive sink failures
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink IO error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sink HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sink '{sink}' returned HTTP {status}: {body}")]
    Status { sink: String, status: u16, body: String },

    #[error("Sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SinkError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Dataset fan-out failures
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Command `{command}` failed: {output}")]
    Command { command: String, output: String },

    #[error("Publish IO error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Publisher '{publisher}' requires a token ({hint})")]
    MissingCredential { publisher: &'static str, hint: &'static str },

    #[error("Publish serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PublishError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Top-level crawl engine error
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Neither the freshness order nor the fallback order produced a list
    #[error("Failed to fetch {entity}: API rejected or returned non-list for orders {orders:?}")]
    OrderProbe {
        entity: EntityKind,
        orders: Vec<String>,
        #[source]
        last: Option<FetchError>,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Archive(#[from] polyarc_common::ArchiveError),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let url = "https://example.test/events".to_string();
        assert!(FetchError::RateLimited { url: url.clone() }.is_retryable());
        assert!(FetchError::Server { status: 503, url: url.clone() }.is_retryable());
        assert!(!FetchError::Request {
            status: 422,
            url: url.clone(),
            body: String::new()
        }
        .is_retryable());
        let exhausted = FetchError::RetriesExhausted {
            attempts: 6,
            last: Box::new(FetchError::Server { status: 502, url }),
        };
        assert!(!exhausted.is_retryable());
        assert_eq!(exhausted.status(), Some(502));
    }
}
