//! Exchange MCP Gateway Binary
//!
//! Starts the MCP transport and the health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin exchange-mcp-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Server
//! - `MCP_GATEWAY_HOST`: Bind address (default: 0.0.0.0)
//! - `MCP_GATEWAY_PORT`: MCP transport port (default: 8080)
//! - `MCP_GATEWAY_PATH`: MCP endpoint path (default: /mcp)
//! - `MCP_GATEWAY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//!
//! ## Runtime Settings
//! - `USE_PROXY`, `PROXY_URL`, `PROXY_USERNAME`, `PROXY_PASSWORD`
//! - `DEFAULT_MARKET_TYPE`: spot | margin | future | swap | option (default: spot)
//! - `LOG_LEVEL`: MCP log level (default: info)
//! - `<EXCHANGE>_API_KEY` / `<EXCHANGE>_SECRET`: Optional venue credentials
//!
//! ## Rate Limits
//! - `RATE_LIMIT_DEFAULT_REQUESTS`, `RATE_LIMIT_DEFAULT_WINDOW_MS`, `RATE_LIMIT_MAX_WAIT_MS`
//! - `<EXCHANGE>_RATE_LIMIT_REQUESTS`, `<EXCHANGE>_RATE_LIMIT_WINDOW_MS`
//!
//! ## Telemetry
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: exchange-mcp-gateway)
//! - `RUST_LOG`: Overrides `LOG_LEVEL` at startup

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use exchange_mcp_gateway::application::services::{ClientCache, ConfigService, ExchangeService};
use exchange_mcp_gateway::infrastructure::exchange::RestConnector;
use exchange_mcp_gateway::infrastructure::health::{HealthServer, HealthServerState};
use exchange_mcp_gateway::infrastructure::mcp::{
    Dispatcher, McpServer, McpState, ToolContext, ToolRegistry,
};
use exchange_mcp_gateway::infrastructure::metrics;
use exchange_mcp_gateway::infrastructure::telemetry;
use exchange_mcp_gateway::resilience::RateLimiter;
use exchange_mcp_gateway::{GatewayConfig, SessionRegistry, SettingsStore, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let config = GatewayConfig::from_env().context("invalid configuration")?;

    let telemetry = telemetry::init(config.runtime.log_level).context("failed to start telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting exchange MCP gateway");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder unavailable, metrics disabled");
    }

    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Shared state
    let settings = Arc::new(SettingsStore::new(config.runtime.clone())?);
    let cache = Arc::new(ClientCache::new());
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
    let sessions = Arc::new(SessionRegistry::new(config.server.session_channel_capacity));

    // Services
    let connector = Arc::new(RestConnector::new(config.exchange.clone()));
    let exchange = Arc::new(
        ExchangeService::new(
            connector,
            Arc::clone(&cache),
            rate_limiter,
            Arc::clone(&settings),
        )
        .with_credentials(config.credentials.clone()),
    );
    let config_service = Arc::new(ConfigService::new(
        settings,
        cache,
        telemetry.log_control(),
    ));

    // MCP transport
    let dispatcher = Arc::new(
        Dispatcher::new(
            ToolRegistry::standard(),
            ToolContext {
                exchange: Arc::clone(&exchange),
                config: config_service,
            },
        )
        .with_announcements(Arc::clone(&sessions)),
    );
    let mcp_state = Arc::new(McpState::new(Arc::clone(&sessions), dispatcher));
    let mcp_addr = config.mcp_addr();
    let listener = McpServer::bind(&mcp_addr)
        .await
        .with_context(|| format!("MCP transport could not bind {mcp_addr}"))?;
    let mcp_server = McpServer::new(
        config.server.mcp_path.clone(),
        mcp_state,
        shutdown_token.clone(),
    );

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&sessions),
        exchange,
    ));
    let health_server = HealthServer::new(
        config.health_addr(),
        Arc::clone(&health_state),
        shutdown_token.clone(),
    );

    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let mcp_task = tokio::spawn(async move {
        if let Err(e) = mcp_server.serve(listener).await {
            tracing::error!(error = %e, "MCP transport error");
        }
    });

    health_state.set_ready(true);
    tracing::info!("Gateway ready");

    await_shutdown().await;

    health_state.set_ready(false);
    let closed = sessions.close_all();
    metrics::set_sessions_active(sessions.len());
    tracing::info!(closed, "Closed sessions");
    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(mcp_task, health_task);
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Shutdown timed out with connections still open");
    }

    tracing::info!("Gateway stopped");
    drop(telemetry);
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        mcp_addr = %config.mcp_addr(),
        mcp_path = %config.server.mcp_path,
        health_addr = %config.health_addr(),
        default_market_type = config.runtime.default_market_type.as_str(),
        proxy_enabled = config.runtime.proxy.enabled,
        credentialed_exchanges = config.credentials.len(),
        "Configuration loaded"
    );
    tracing::debug!(
        default_budget = config.rate_limits.default_budget.max_requests,
        default_window_ms = u64::try_from(config.rate_limits.default_budget.window.as_millis())
            .unwrap_or(u64::MAX),
        max_wait_ms = u64::try_from(config.rate_limits.max_wait.as_millis()).unwrap_or(u64::MAX),
        "Rate limits"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
