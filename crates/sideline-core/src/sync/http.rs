//! HTTP/JSON remote store client.
//!
//! Wire format:
//! - `GET {base}/v1/sessions/{id}` returns `{"revision": n, "snapshot": {...}}`, 404 when absent
//! - `PUT {base}/v1/sessions/{id}` with `If-Match: <expected revision>` and the
//!   snapshot as body returns `{"revision": n}`; 409 or 412 signal a conflict
//! - `DELETE {base}/v1/sessions/{id}`; 404 counts as success

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{SessionId, SessionSnapshot};
use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::{RemoteRecord, RemoteStore, UpsertOutcome};

const CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpRemoteStore {
    /// Build a client for `base_url`. `timeout` bounds each request.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Sync(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn session_url(&self, id: SessionId) -> String {
        format!("{}/v1/sessions/{id}", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    revision: u64,
    snapshot: SessionSnapshot,
}

#[derive(Debug, Deserialize)]
struct UpsertResponse {
    revision: u64,
}

#[derive(Debug, Deserialize)]
struct ConflictResponse {
    current_revision: Option<u64>,
    revision: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn request_error(error: &reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Sync(format!("remote request timed out: {error}"))
    } else {
        Error::Sync(format!("remote request failed: {error}"))
    }
}

async fn api_error(response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Error::Sync(parse_api_error(status, &body))
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch(&self, id: SessionId) -> Result<Option<RemoteRecord>> {
        let response = self
            .client
            .get(self.session_url(id))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| request_error(&e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let payload = response
            .json::<FetchResponse>()
            .await
            .map_err(|e| Error::Sync(format!("invalid remote session payload: {e}")))?;
        Ok(Some(RemoteRecord {
            snapshot: payload.snapshot,
            revision: payload.revision,
        }))
    }

    async fn upsert(
        &self,
        snapshot: &SessionSnapshot,
        expected_revision: u64,
    ) -> Result<UpsertOutcome> {
        let response = self
            .client
            .put(self.session_url(snapshot.id))
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::IF_MATCH, expected_revision.to_string())
            .json(snapshot)
            .send()
            .await
            .map_err(|e| request_error(&e))?;

        let status = response.status();
        if status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED {
            let body = response.text().await.unwrap_or_default();
            let current_revision = parse_conflict_revision(&body).ok_or_else(|| {
                Error::Sync(format!(
                    "conflict response without revision: {}",
                    compact_text(&body)
                ))
            })?;
            return Ok(UpsertOutcome::Conflict { current_revision });
        }
        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let payload = response
            .json::<UpsertResponse>()
            .await
            .map_err(|e| Error::Sync(format!("invalid upsert response: {e}")))?;
        Ok(UpsertOutcome::Applied {
            new_revision: payload.revision,
        })
    }

    async fn delete(&self, id: SessionId) -> Result<()> {
        let response = self
            .client
            .delete(self.session_url(id))
            .send()
            .await
            .map_err(|e| request_error(&e))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }
}

fn parse_conflict_revision(body: &str) -> Option<u64> {
    let payload = serde_json::from_str::<ConflictResponse>(body).ok()?;
    payload.current_revision.or(payload.revision)
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("remote URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "remote URL must include http:// or https://".to_string(),
        ))
    }
}
