//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, gateway status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (MCP listener bound)
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::ExchangeService;
use crate::domain::session::{SessionRegistry, SessionStats};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Gateway version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Session registry statistics.
    pub sessions: SessionStats,
    /// Client cache occupancy.
    pub cache: CacheStatus,
    /// Upstream targets whose budget is exhausted in the current window.
    pub throttled_targets: Vec<String>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Serving, but at least one upstream target is throttled.
    Degraded,
    /// MCP listener not accepting connections.
    Unhealthy,
}

/// Client cache occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    /// Constructed clients.
    pub size: usize,
    /// Constructor invocations since startup.
    pub constructions: u64,
    /// Failed constructor invocations since startup.
    pub failures: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    ready: AtomicBool,
    sessions: Arc<SessionRegistry>,
    exchange: Arc<ExchangeService>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        sessions: Arc<SessionRegistry>,
        exchange: Arc<ExchangeService>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            ready: AtomicBool::new(false),
            sessions,
            exchange,
        }
    }

    /// Record whether the MCP listener is accepting connections.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Whether the MCP listener is accepting connections.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    addr: String,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(
        addr: String,
        state: Arc<HealthServerState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.addr.clone(), e.to_string()))?;

        tracing::info!(addr = %self.addr, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let cache = state.exchange.cache_stats();
    let throttled_targets: Vec<String> = state
        .exchange
        .rate_limits()
        .into_iter()
        .filter(|status| status.remaining == 0 && status.resets_in_ms > 0)
        .map(|status| status.target)
        .collect();

    HealthResponse {
        status: determine_health_status(state.is_ready(), throttled_targets.len()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        sessions: state.sessions.stats(),
        cache: CacheStatus {
            size: cache.size,
            constructions: cache.constructions,
            failures: cache.failures,
        },
        throttled_targets,
    }
}

const fn determine_health_status(ready: bool, throttled: usize) -> HealthStatus {
    match (ready, throttled) {
        (false, _) => HealthStatus::Unhealthy,
        (true, 0) => HealthStatus::Healthy,
        (true, _) => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(String, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::ExchangeConnector;
    use crate::application::services::ClientCache;
    use crate::domain::settings::SettingsStore;
    use crate::infrastructure::exchange::RestConnector;
    use crate::resilience::{RateLimiter, RateLimiterConfig};

    fn state() -> Arc<HealthServerState> {
        let exchange = ExchangeService::new(
            Arc::new(RestConnector::default()) as Arc<dyn ExchangeConnector>,
            Arc::new(ClientCache::new()),
            Arc::new(RateLimiter::new(RateLimiterConfig::default())),
            Arc::new(SettingsStore::default()),
        );
        Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            Arc::new(SessionRegistry::default()),
            Arc::new(exchange),
        ))
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status() {
        assert_eq!(determine_health_status(true, 0), HealthStatus::Healthy);
        assert_eq!(determine_health_status(true, 2), HealthStatus::Degraded);
        assert_eq!(determine_health_status(false, 0), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn readiness_follows_listener() {
        let state = state();
        let app = router(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.set_ready(true);
        let response = app
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_sessions_and_cache() {
        let state = state();
        state.set_ready(true);
        state.sessions.resolve(None, true).unwrap();

        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sessions"]["active"], 1);
        assert_eq!(body["cache"]["size"], 0);
    }
}
