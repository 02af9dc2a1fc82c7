//! Tracing and OpenTelemetry Integration
//!
//! Configures structured logging with a reloadable level filter and an
//! optional OTLP exporter for distributed tracing.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Initial filter directives; overrides `LOG_LEVEL` at startup
//! - `OTEL_ENABLED`: Set to "true" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: exchange-mcp-gateway)
//!
//! # Usage
//!
//! ```ignore
//! use exchange_mcp_gateway::infrastructure::telemetry;
//!
//! // Keep the guard alive for the lifetime of the process
//! let telemetry = telemetry::init(LogLevel::Info)?;
//!
//! // Change verbosity at runtime
//! telemetry.log_control().apply(LogLevel::Debug)?;
//! ```

use std::sync::Arc;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

use crate::application::ports::LogLevelControl;
use crate::domain::settings::LogLevel;

/// Service name for OpenTelemetry traces.
const DEFAULT_SERVICE_NAME: &str = "exchange-mcp-gateway";

/// Default OTLP endpoint.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Directives appended to every level so dependencies stay quiet.
const DEPENDENCY_DIRECTIVES: &str = "hyper=warn,h2=warn,reqwest=warn,tower=warn";

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether OpenTelemetry export is enabled.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let enabled = std::env::var("OTEL_ENABLED")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false);

        let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string());

        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string());

        Self {
            enabled,
            otlp_endpoint,
            service_name,
        }
    }
}

/// Build the filter for a log level.
///
/// # Errors
///
/// Returns the parser message if the directives are rejected.
pub fn filter_for(level: LogLevel) -> Result<EnvFilter, String> {
    EnvFilter::try_new(format!("{},{DEPENDENCY_DIRECTIVES}", level.tracing_directive()))
        .map_err(|e| e.to_string())
}

// =============================================================================
// Live Level Control
// =============================================================================

/// Swaps the active filter of the installed subscriber.
#[derive(Clone)]
pub struct ReloadLogLevel {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl std::fmt::Debug for ReloadLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadLogLevel").finish_non_exhaustive()
    }
}

impl LogLevelControl for ReloadLogLevel {
    fn apply(&self, level: LogLevel) -> Result<(), String> {
        let filter = filter_for(level)?;
        self.handle.reload(filter).map_err(|e| e.to_string())
    }
}

// =============================================================================
// Initialization
// =============================================================================

/// Installed telemetry. Shuts down OpenTelemetry when dropped.
pub struct Telemetry {
    tracer_provider: Option<SdkTracerProvider>,
    log_control: Arc<ReloadLogLevel>,
}

impl Telemetry {
    /// Live log level control for the installed subscriber.
    #[must_use]
    pub fn log_control(&self) -> Arc<dyn LogLevelControl> {
        Arc::clone(&self.log_control) as Arc<dyn LogLevelControl>
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Telemetry setup failure.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Filter directives were rejected.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// OTLP exporter could not be built.
    #[error("failed to create OTLP exporter: {0}")]
    Exporter(String),
    /// A global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Initialize telemetry with configuration from the environment.
///
/// # Errors
///
/// See [`init_with_config`].
pub fn init(level: LogLevel) -> Result<Telemetry, TelemetryError> {
    init_with_config(&TelemetryConfig::from_env(), level)
}

/// Initialize telemetry.
///
/// `RUST_LOG`, when set, takes precedence over `level` for the initial
/// filter. Later level changes replace the filter entirely.
///
/// # Errors
///
/// Returns an error if the filter, exporter or subscriber cannot be set up.
pub fn init_with_config(
    config: &TelemetryConfig,
    level: LogLevel,
) -> Result<Telemetry, TelemetryError> {
    let env_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => {
            EnvFilter::try_new(directives).map_err(|e| TelemetryError::Filter(e.to_string()))?
        }
        _ => filter_for(level).map_err(TelemetryError::Filter)?,
    };
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let log_control = Arc::new(ReloadLogLevel { handle });

    if !config.enabled {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::Install(e.to_string()))?;

        return Ok(Telemetry {
            tracer_provider: None,
            log_control,
        });
    }

    let otlp_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(otlp_exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();

    let tracer = tracer_provider.tracer(config.service_name.clone());
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::Install(e.to_string()))?;

    Ok(Telemetry {
        tracer_provider: Some(tracer_provider),
        log_control,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.otlp_endpoint, DEFAULT_OTLP_ENDPOINT);
        assert_eq!(config.service_name, DEFAULT_SERVICE_NAME);
    }

    #[test]
    fn every_level_builds_a_filter() {
        for level in [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Notice,
            LogLevel::Warning,
            LogLevel::Error,
            LogLevel::Critical,
            LogLevel::Alert,
            LogLevel::Emergency,
        ] {
            let filter = filter_for(level).unwrap();
            assert!(filter.to_string().contains("hyper=warn"));
        }
    }

    #[test]
    fn reload_handle_applies_levels() {
        let (layer, handle) = reload::Layer::new(filter_for(LogLevel::Info).unwrap());
        let subscriber = tracing_subscriber::registry().with(layer);
        let control = ReloadLogLevel { handle };

        tracing::subscriber::with_default(subscriber, || {
            control.apply(LogLevel::Debug).unwrap();
            assert!(tracing::enabled!(tracing::Level::DEBUG));
            control.apply(LogLevel::Error).unwrap();
            assert!(!tracing::enabled!(tracing::Level::WARN));
        });
    }
}
