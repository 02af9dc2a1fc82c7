//! Prometheus Metrics Module
//!
//! Exposes gateway metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Sessions**: Live and created MCP sessions
//! - **Requests**: JSON-RPC requests and tool call latency by outcome
//! - **Client cache**: Lookups, constructions, invalidations and occupancy
//! - **Rate limiting**: Denied calls and time spent waiting for permits
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns `BuildError` if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Sessions
    describe_gauge!(
        "mcp_gateway_sessions_active",
        "Number of live MCP sessions"
    );
    describe_counter!(
        "mcp_gateway_sessions_total",
        "Total MCP sessions by lifecycle event"
    );

    // Requests
    describe_counter!(
        "mcp_gateway_requests_total",
        "Total JSON-RPC messages by method and outcome"
    );
    describe_histogram!(
        "mcp_gateway_tool_call_seconds",
        "Tool call duration by tool and outcome"
    );

    // Client cache
    describe_counter!(
        "mcp_gateway_client_cache_lookups_total",
        "Client cache lookups by result"
    );
    describe_counter!(
        "mcp_gateway_client_constructions_total",
        "Exchange client constructions by outcome"
    );
    describe_counter!(
        "mcp_gateway_client_cache_evictions_total",
        "Client cache entries removed by invalidation"
    );
    describe_gauge!(
        "mcp_gateway_client_cache_entries",
        "Number of constructed clients in the cache"
    );

    // Rate limiting
    describe_counter!(
        "mcp_gateway_rate_limited_total",
        "Outbound calls refused by the rate limiter"
    );
    describe_histogram!(
        "mcp_gateway_rate_limit_wait_seconds",
        "Time spent waiting for a rate limit permit"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Session lifecycle events.
#[derive(Debug, Clone, Copy)]
pub enum SessionEvent {
    /// Session created by an initializing request.
    Opened,
    /// Session closed by the client or at shutdown.
    Closed,
}

impl SessionEvent {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Closed => "closed",
        }
    }
}

/// Outcome labels for requests, tool calls and constructions.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    /// Completed successfully.
    Ok,
    /// Completed with an error.
    Error,
    /// Result discarded because the session closed.
    Discarded,
}

impl Outcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Discarded => "discarded",
        }
    }
}

/// Record a session lifecycle event and update the live count.
pub fn record_session(event: SessionEvent, active: usize) {
    counter!(
        "mcp_gateway_sessions_total",
        "event" => event.as_str()
    )
    .increment(1);
    set_sessions_active(active);
}

/// Update the live session count.
#[allow(clippy::cast_precision_loss)]
pub fn set_sessions_active(active: usize) {
    gauge!("mcp_gateway_sessions_active").set(active as f64);
}

/// Record one JSON-RPC message.
pub fn record_request(method: &str, outcome: Outcome) {
    counter!(
        "mcp_gateway_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record tool call duration.
pub fn record_tool_call(tool: &str, outcome: Outcome, duration: Duration) {
    histogram!(
        "mcp_gateway_tool_call_seconds",
        "tool" => tool.to_string(),
        "outcome" => outcome.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Record a client cache lookup.
pub fn record_cache_lookup(hit: bool) {
    counter!(
        "mcp_gateway_client_cache_lookups_total",
        "result" => if hit { "hit" } else { "miss" }
    )
    .increment(1);
}

/// Record an exchange client construction.
pub fn record_construction(exchange: &str, outcome: Outcome) {
    counter!(
        "mcp_gateway_client_constructions_total",
        "exchange" => exchange.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record entries removed from the client cache.
pub fn record_cache_evictions(count: usize) {
    counter!("mcp_gateway_client_cache_evictions_total").increment(count as u64);
}

/// Update the client cache occupancy.
#[allow(clippy::cast_precision_loss)]
pub fn set_cache_entries(count: usize) {
    gauge!("mcp_gateway_client_cache_entries").set(count as f64);
}

/// Record a call refused by the rate limiter.
pub fn record_rate_limited(target: &str) {
    counter!(
        "mcp_gateway_rate_limited_total",
        "target" => target.to_string()
    )
    .increment(1);
}

/// Record time spent waiting for a rate limit permit.
pub fn record_rate_limit_wait(target: &str, waited: Duration) {
    histogram!(
        "mcp_gateway_rate_limit_wait_seconds",
        "target" => target.to_string()
    )
    .record(waited.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_strings() {
        assert_eq!(SessionEvent::Opened.as_str(), "opened");
        assert_eq!(SessionEvent::Closed.as_str(), "closed");
        assert_eq!(Outcome::Ok.as_str(), "ok");
        assert_eq!(Outcome::Error.as_str(), "error");
        assert_eq!(Outcome::Discarded.as_str(), "discarded");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_cache_lookup(true);
        record_rate_limit_wait("binance", Duration::from_millis(5));
        set_cache_entries(3);
    }
}
