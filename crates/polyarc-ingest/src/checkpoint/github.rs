//! GitHub contents API document store
//!
//! Documents live as files in a repository. The blob `sha` returned by
//! `GET /repos/{owner}/{repo}/contents/{path}` is the version token and is
//! sent back on `PUT` so a concurrent update is rejected instead of lost.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backend::{DocumentStore, VersionedDocument};
use crate::config::GithubConfig;
use crate::error::CheckpointError;

const GITHUB_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct ContentResponse {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct PutContentRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

pub struct GithubContentsStore {
    client: Client,
    api_url: String,
    owner: String,
    repo: String,
    branch: String,
}

impl GithubContentsStore {
    pub fn new(config: &GithubConfig) -> Result<Self, CheckpointError> {
        let token = config
            .token
            .as_deref()
            .ok_or(CheckpointError::MissingCredential {
                backend: "github",
                hint: "set GH_TOKEN or GH_PAT",
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| CheckpointError::backend("github", "token contains invalid characters"))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(Duration::from_secs(GITHUB_TIMEOUT_SECS))
            .user_agent(concat!("polyarc/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            owner: config.org.clone(),
            repo: config.orchestrator_repo.clone(),
            branch: config.branch.clone(),
        })
    }

    fn contents_url(&self, key: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url,
            self.owner,
            self.repo,
            key.trim_start_matches('/')
        )
    }
}

/// The API wraps base64 content at 60 columns
fn decode_content(key: &str, content: &str) -> Result<Vec<u8>, CheckpointError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact).map_err(|e| CheckpointError::Corrupt {
        key: key.to_string(),
        message: format!("invalid base64 content: {}", e),
    })
}

#[async_trait]
impl DocumentStore for GithubContentsStore {
    fn name(&self) -> &str {
        "github"
    }

    async fn read(&self, key: &str) -> Result<Option<VersionedDocument>, CheckpointError> {
        let response = self
            .client
            .get(self.contents_url(key))
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: ContentResponse = response.json().await?;
                Ok(Some(VersionedDocument {
                    bytes: decode_content(key, &body.content)?,
                    version: body.sha,
                }))
            },
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(CheckpointError::backend(
                    key,
                    format!("GET returned HTTP {}: {}", status.as_u16(), body),
                ))
            },
        }
    }

    async fn write(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&str>,
        message: &str,
    ) -> Result<(), CheckpointError> {
        let request = PutContentRequest {
            message,
            content: STANDARD.encode(bytes),
            branch: &self.branch,
            sha: expected,
        };

        let response = self
            .client
            .put(self.contents_url(key))
            .json(&request)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(CheckpointError::Conflict {
                    key: key.to_string(),
                    expected: expected.map(str::to_string),
                })
            },
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(CheckpointError::backend(
                    key,
                    format!("PUT returned HTTP {}: {}", status.as_u16(), body),
                ))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = ".state/polymarket_checkpoint.json";
    const CONTENTS_PATH: &str =
        "/repos/statground/Statground_Data_Polymarket/contents/.state/polymarket_checkpoint.json";

    fn store(server: &MockServer) -> GithubContentsStore {
        let mut github = CrawlConfig::default().github;
        github.api_url = server.uri();
        github.token = Some("ghp_test".to_string());
        GithubContentsStore::new(&github).unwrap()
    }

    #[test]
    fn test_requires_token() {
        let github = CrawlConfig::default().github;
        assert!(matches!(
            GithubContentsStore::new(&github),
            Err(CheckpointError::MissingCredential { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_decodes_wrapped_content() {
        let server = MockServer::start().await;
        let encoded = STANDARD.encode(br#"{"events": "2025-01-12T00:00:00Z"}"#);
        let wrapped = format!("{}\n{}", &encoded[..20], &encoded[20..]);
        Mock::given(method("GET"))
            .and(path(CONTENTS_PATH))
            .and(query_param("ref", "main"))
            .and(header("authorization", "Bearer ghp_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sha": "abc123",
                "content": wrapped,
                "encoding": "base64"
            })))
            .mount(&server)
            .await;

        let doc = store(&server).read(KEY).await.unwrap().unwrap();
        assert_eq!(doc.version, "abc123");
        assert_eq!(doc.bytes, br#"{"events": "2025-01-12T00:00:00Z"}"#);
    }

    #[tokio::test]
    async fn test_missing_file_reads_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(store(&server).read(KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_sends_sha_and_maps_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(CONTENTS_PATH))
            .and(body_partial_json(json!({"sha": "fresh", "branch": "main"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(CONTENTS_PATH))
            .and(body_partial_json(json!({"sha": "stale"})))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let store = store(&server);
        store.write(KEY, b"{}", Some("fresh"), "update").await.unwrap();
        assert!(matches!(
            store.write(KEY, b"{}", Some("stale"), "update").await,
            Err(CheckpointError::Conflict { .. })
        ));
    }
}
