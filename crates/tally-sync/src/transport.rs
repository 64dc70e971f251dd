//! # HTTP Transport
//!
//! The engine's only way to reach the server.
//!
//! ## Seam
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  SyncProcessor ──┐                                                     │
//! │  Downloader ─────┼──► dyn SyncTransport ──► HttpTransport (reqwest)    │
//! │  ConflictService ┘          │                                          │
//! │                             └─────────────► stub transports (tests)    │
//! │                                                                         │
//! │  push    POST {base}/sync/push      PushRequest  → PushResponse        │
//! │  pull    POST {base}/sync/pull      PullRequest  → PullResponse        │
//! │  resolve POST {base}/sync/resolve   Submission   → ResolutionResponse  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callers additionally bound every call with `tokio::time::timeout`; the
//! client timeout here is a second line for stalled bodies.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    PullRequest, PullResponse, PushRequest, PushResponse, ResolutionResponse,
    ResolutionSubmission,
};

const PUSH_PATH: &str = "sync/push";
const PULL_PATH: &str = "sync/pull";
const RESOLVE_PATH: &str = "sync/resolve";

// =============================================================================
// Transport Trait
// =============================================================================

/// Request/response access to the sync server.
///
/// Any error returned is a transport failure: the processor turns it into
/// FAILED queue items, the downloader leaves the watermark untouched.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse>;

    async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse>;

    async fn resolve(&self, submission: &ResolutionSubmission) -> SyncResult<ResolutionResponse>;
}

// =============================================================================
// Transport Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL, ending with `/`.
    pub base_url: Url,

    /// Sent as `Authorization: Bearer ...` when present.
    pub api_token: Option<String>,

    pub request_timeout: Duration,
}

impl TransportConfig {
    pub fn from_sync_config(config: &SyncConfig) -> SyncResult<Self> {
        Ok(TransportConfig {
            base_url: config.server_url()?,
            api_token: config.server.api_token.clone(),
            request_timeout: config.request_timeout(),
        })
    }
}

// =============================================================================
// HTTP Transport
// =============================================================================

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("Failed to create HTTP client: {e}")))?;

        Ok(HttpTransport { client, config })
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.config.base_url.join(path)?)
    }

    async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> SyncResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(%url, "POST");

        let mut request = self.client.post(url.clone()).json(body);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.request_error(&url, e))?;
        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| self.request_error(&url, e))?;

        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                message: status_message(status, &body_text),
            });
        }

        serde_json::from_str(&body_text)
            .map_err(|e| SyncError::InvalidResponse(format!("{url}: {e}")))
    }

    fn request_error(&self, url: &Url, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.config.request_timeout.as_secs())
        } else if err.is_connect() {
            SyncError::ConnectionFailed(format!("Cannot reach sync server at {url}"))
        } else {
            SyncError::from(err)
        }
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.post_json(PUSH_PATH, request).await
    }

    async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.post_json(PULL_PATH, request).await
    }

    async fn resolve(&self, submission: &ResolutionSubmission) -> SyncResult<ResolutionResponse> {
        self.post_json(RESOLVE_PATH, submission).await
    }
}

/// Human-readable message for a non-success response, preferring the
/// server's own `error`/`message` field.
fn status_message(status: StatusCode, body: &str) -> String {
    let from_body = serde_json::from_str::<Value>(body).ok().and_then(|json| {
        json.get("error")
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    if let Some(message) = from_body {
        return message;
    }

    match status.as_u16() {
        401 => "API token is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        404 => "Sync endpoint not found".to_string(),
        s if s >= 500 => format!("Sync server error (HTTP {s})"),
        s => format!("Unexpected response from sync server (HTTP {s})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: &str) -> TransportConfig {
        TransportConfig {
            base_url: Url::parse(base).unwrap(),
            api_token: None,
            request_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_endpoints_resolve_below_base() {
        let transport = HttpTransport::new(config("https://pos.example.com/api/")).unwrap();
        assert_eq!(
            transport.endpoint(PUSH_PATH).unwrap().as_str(),
            "https://pos.example.com/api/sync/push"
        );
        assert_eq!(
            transport.endpoint(RESOLVE_PATH).unwrap().as_str(),
            "https://pos.example.com/api/sync/resolve"
        );
    }

    #[test]
    fn test_status_message_prefers_server_text() {
        assert_eq!(
            status_message(StatusCode::BAD_REQUEST, r#"{"error":"branch unknown"}"#),
            "branch unknown"
        );
        assert_eq!(
            status_message(StatusCode::UNAUTHORIZED, ""),
            "API token is invalid or expired"
        );
        assert_eq!(
            status_message(StatusCode::BAD_GATEWAY, "<html>"),
            "Sync server error (HTTP 502)"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable() {
        let transport = HttpTransport::new(config("http://127.0.0.1:9/")).unwrap();
        let request = PullRequest {
            branch_id: "b-1".into(),
            last_sync_at: None,
            entity_types: None,
        };

        let err = transport.pull(&request).await.unwrap_err();
        assert!(err.is_transport_error());
        assert!(err.is_retryable());
    }
}
