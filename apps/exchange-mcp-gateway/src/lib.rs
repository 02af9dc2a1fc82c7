#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Exchange MCP Gateway - Market Data Tools over MCP
//!
//! An MCP server that exposes cryptocurrency exchange market data as tools
//! to many concurrent clients. Exchange clients are built once per distinct
//! configuration and shared; outbound calls are rate limited per exchange.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Session and settings state
//!   - `session`: Live sessions and their registry
//!   - `settings`: Runtime settings, validation and client fingerprints
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Exchange connectivity and log level control
//!   - `services`: Client cache, exchange calls, configuration changes
//!
//! - **Resilience**: Per-exchange fixed-window rate limiting
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `mcp`: Streamable HTTP transport, dispatcher and tools
//!   - `exchange`: REST clients for the supported venues
//!   - `config`: Environment configuration
//!   - `health`: Health check and metrics endpoint
//!   - `telemetry`: Tracing and OpenTelemetry export
//!
//! # Request Flow
//!
//! ```text
//! Client ──► POST /mcp ──► SessionRegistry ──► Dispatcher ──► Tool
//!                                                              │
//!                    ┌─────────────────────────────────────────┘
//!                    ▼
//!             ExchangeService ──► RateLimiter ──► ClientCache ──► Venue REST
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Sessions and settings with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Resilience patterns for outbound calls.
pub mod resilience;

/// Gateway error taxonomy.
pub mod error;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::session::{Session, SessionError, SessionId, SessionRegistry, SessionStats};
pub use domain::settings::{
    ClientFingerprint, ConfigurationError, LogLevel, MarketType, ProxySettings, RuntimeSettings,
    SettingsStore, SettingsView,
};

// Services
pub use application::services::{ClientCache, ConfigService, ExchangeService};

// Errors
pub use error::{ErrorCode, GatewayError};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ExchangeSettings, GatewayConfig, ServerSettings};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// MCP server
pub use infrastructure::mcp::{
    Dispatcher, McpServer, McpState, SESSION_HEADER, ToolContext, ToolRegistry,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{Telemetry, TelemetryConfig, init as init_telemetry};
