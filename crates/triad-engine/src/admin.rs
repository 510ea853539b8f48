//! External admin surface (C10, §6): health, metrics, config reload, manual
//! trigger, H webhook ingest, and the SSE re-broadcast of sync events.
//!
//! Interface only, per §1 ("HTTP admin/health/metrics surface" is listed
//! among the out-of-scope external collaborators for the *core*) — but the
//! routes themselves are exactly the contract in §6, so they're wired here
//! against the controller/workflow/event-bus types the core does own.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use triad_core::config::Config;
use triad_resilience::rate_limiter::{MultiKeyRateLimiter, RateLimitConfig};
use triad_telemetry::metrics::global_metrics;

use crate::api_error::ApiError;
use crate::auth::AuthLayer;
use crate::controller::SyncController;
use crate::event_sources::{manual_trigger_event, parse_webhook_payload};
use crate::origin_validation::{get_default_allowed_origins, validate_websocket_origin};
use crate::protocol::BridgeMessage;
use crate::rate_limit_middleware::RateLimitLayer;
use crate::workflow::WorkflowHandle;
use crate::EventBus;

/// Shared state for every admin route.
pub struct AdminState {
    pub controller: Arc<SyncController>,
    pub workflow: Arc<WorkflowHandle>,
    pub event_bus: EventBus,
    pub started_at: Instant,
    pub last_sync_time: RwLock<Option<DateTime<Utc>>>,
    pub error_count: AtomicU64,
}

impl AdminState {
    pub fn new(controller: Arc<SyncController>, workflow: Arc<WorkflowHandle>, event_bus: EventBus) -> Self {
        Self {
            controller,
            workflow,
            event_bus,
            started_at: Instant::now(),
            last_sync_time: RwLock::new(None),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn record_sync_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_sync_success(&self) {
        *self.last_sync_time.write().await = Some(Utc::now());
    }
}

pub fn router(state: Arc<AdminState>, api_key: Option<String>) -> Router {
    let rate_limiter = Arc::new(MultiKeyRateLimiter::new(
        RateLimitConfig::per_minute(1000),
        RateLimitConfig::per_minute(120),
        RateLimitConfig::per_minute(60),
    ));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/sync/trigger", post(trigger_sync))
        .route("/api/webhook/h", post(webhook_h))
        .route("/api/events", get(events_sse))
        .layer(AuthLayer::new(api_key))
        .layer(RateLimitLayer::new(rate_limiter))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
    sync: SyncHealth,
    connection_pool: ConnectionPoolHealth,
    memory: MemoryHealth,
}

#[derive(Debug, Serialize)]
struct SyncHealth {
    last_sync_time: Option<DateTime<Utc>>,
    error_count: u64,
}

#[derive(Debug, Serialize)]
struct ConnectionPoolHealth {
    active_workers: usize,
}

#[derive(Debug, Serialize)]
struct MemoryHealth {
    rss_bytes: u64,
}

async fn health(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let last_sync_time = *state.last_sync_time.read().await;
    let interval_ms = state.controller.current_config().await.sync.sync_interval_ms;
    let stale = match last_sync_time {
        Some(t) => {
            let elapsed_ms = (Utc::now() - t).num_milliseconds().max(0) as u64;
            elapsed_ms > interval_ms.saturating_mul(3)
        }
        None => false,
    };

    let body = HealthResponse {
        status: if stale { "unhealthy" } else { "healthy" },
        uptime_seconds: state.started_at.elapsed().as_secs(),
        sync: SyncHealth { last_sync_time, error_count: state.error_count.load(Ordering::Relaxed) },
        connection_pool: ConnectionPoolHealth { active_workers: 0 },
        memory: MemoryHealth { rss_bytes: 0 },
    };

    let status = if stale { axum::http::StatusCode::SERVICE_UNAVAILABLE } else { axum::http::StatusCode::OK };
    (status, Json(body))
}

// ---------------------------------------------------------------------------
// GET /metrics
// ---------------------------------------------------------------------------

async fn metrics() -> impl IntoResponse {
    let body = global_metrics().export_prometheus();
    ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], body)
}

// ---------------------------------------------------------------------------
// GET, PUT /api/config
// ---------------------------------------------------------------------------

async fn get_config(State(state): State<Arc<AdminState>>) -> Json<Config> {
    Json(state.controller.current_config().await)
}

async fn put_config(State(state): State<Arc<AdminState>>, Json(new_config): Json<Config>) -> Result<impl IntoResponse, ApiError> {
    new_config.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state.controller.reload_config(new_config).await;
    state.event_bus.publish(BridgeMessage::ConfigReloaded);
    Ok(Json(serde_json::json!({"status": "reloaded"})))
}

// ---------------------------------------------------------------------------
// POST /api/sync/trigger
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct TriggerBody {
    project: Option<String>,
}

async fn trigger_sync(State(state): State<Arc<AdminState>>, body: Option<Json<TriggerBody>>) -> Result<impl IntoResponse, ApiError> {
    use triad_core::types::WorkflowState;

    if state.workflow.state().await == WorkflowState::Running {
        return Err(ApiError::Conflict("a sync orchestration is already running".into()));
    }

    let project = body.map(|Json(b)| b.project).unwrap_or(None);
    let event = manual_trigger_event(project.clone());
    state.controller.handle_event(event.clone()).await;
    state.event_bus.publish(BridgeMessage::SyncStarted { correlation_id: event.correlation_id, project_identifier: project });

    Ok(Json(serde_json::json!({"status": "triggered", "correlation_id": event.correlation_id})))
}

// ---------------------------------------------------------------------------
// POST /api/webhook/h
// ---------------------------------------------------------------------------

async fn webhook_h(State(state): State<Arc<AdminState>>, body: axum::body::Bytes) -> Result<impl IntoResponse, ApiError> {
    let events = parse_webhook_payload(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    for event in events {
        state.controller.handle_event(event).await;
    }
    Ok(Json(serde_json::json!({"status": "accepted"})))
}

// ---------------------------------------------------------------------------
// GET /api/events (SSE)
// ---------------------------------------------------------------------------

async fn events_sse(
    State(state): State<Arc<AdminState>>,
    headers: axum::http::HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if headers.get("origin").is_some() {
        validate_websocket_origin(&headers, &get_default_allowed_origins())
            .map_err(|_| ApiError::Unauthorized("origin not allowed".into()))?;
    }

    let rx = state.event_bus.subscribe();
    let stream = async_stream::stream! {
        while let Ok(msg) = rx.recv_async().await {
            let data = serde_json::to_string(&msg).unwrap_or_else(|_| "{}".to_string());
            yield Ok(Event::default().data(data));
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use triad_core::types::WorkflowType;

    fn test_state() -> Arc<AdminState> {
        let (controller, _rx) = SyncController::new(Config::default());
        let controller = Arc::new(controller);
        let workflow = Arc::new(WorkflowHandle::new(WorkflowType::Orchestration));
        Arc::new(AdminState::new(controller, workflow, EventBus::new()))
    }

    #[tokio::test]
    async fn health_reports_healthy_with_no_prior_sync() {
        let app = router(test_state(), None);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn config_roundtrips_through_get_and_put() {
        let state = test_state();
        let app = router(Arc::clone(&state), None);

        let req = Request::builder().uri("/api/config").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let mut updated = Config::default();
        updated.sync.dry_run = true;
        let body = serde_json::to_vec(&updated).unwrap();
        let req = Request::builder()
            .method("PUT")
            .uri("/api/config")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.controller.is_dry_run().await);
    }

    #[tokio::test]
    async fn trigger_returns_409_while_running() {
        let state = test_state();
        state.workflow.set_state(triad_core::types::WorkflowState::Running).await;
        let app = router(state, None);

        let req = Request::builder().method("POST").uri("/api/sync/trigger").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn webhook_rejects_malformed_body() {
        let app = router(test_state(), None);
        let req = Request::builder().method("POST").uri("/api/webhook/h").body(Body::from("not json")).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_accepts_valid_payload() {
        let app = router(test_state(), None);
        let req = Request::builder()
            .method("POST")
            .uri("/api/webhook/h")
            .body(Body::from(r#"{"projects": ["PROJ"]}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_route_returns_prometheus_text() {
        let app = router(test_state(), None);
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
