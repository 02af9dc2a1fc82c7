//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the servers that expose the
//! gateway.

/// Configuration loaded from the environment.
pub mod config;

/// REST exchange adapters.
pub mod exchange;

/// Health check HTTP endpoint.
pub mod health;

/// MCP transport, dispatcher and tools.
pub mod mcp;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber, reloadable log level and OpenTelemetry export.
pub mod telemetry;
