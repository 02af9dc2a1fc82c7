//! Gateway error taxonomy.
//!
//! Each component owns a `thiserror` enum; [`GatewayError`] aggregates them
//! for the tool and transport layers. Every error maps to an [`ErrorCode`]
//! whose reason string is stable and appears in structured error results.
//!
//! | Reason | Raised by | Handling |
//! |--------|-----------|----------|
//! | `INVALID_SESSION` | Session registry | HTTP 400/404, no session created |
//! | `TRANSPORT_ERROR` | Transport | Logged, session-local |
//! | `CONSTRUCTION_FAILED` | Client cache | Tool error result, retried next call |
//! | `RATE_LIMITED` | Rate limiter | Tool error result with retry hint |
//! | `CONFIGURATION_ERROR` | Settings | Tool error result, state unchanged |
//! | `INVALID_ARGUMENTS` | Tool input | Tool error result |
//! | `UPSTREAM_ERROR` | Exchange client | Tool error result |

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::application::ports::ExchangeError;
use crate::application::services::CacheError;
use crate::domain::session::SessionError;
use crate::domain::settings::ConfigurationError;
use crate::resilience::RateLimitError;

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Missing or unknown session identifier.
    InvalidSession,
    /// Transport failure or session closed mid-request.
    TransportError,
    /// Exchange client could not be built.
    ConstructionFailed,
    /// Outbound budget exhausted.
    RateLimited,
    /// Invalid configuration value.
    ConfigurationError,
    /// Tool arguments failed validation.
    InvalidArguments,
    /// Exchange returned or caused an error.
    UpstreamError,
}

impl ErrorCode {
    /// Get the error reason string.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidSession => "INVALID_SESSION",
            Self::TransportError => "TRANSPORT_ERROR",
            Self::ConstructionFailed => "CONSTRUCTION_FAILED",
            Self::RateLimited => "RATE_LIMITED",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::InvalidArguments => "INVALID_ARGUMENTS",
            Self::UpstreamError => "UPSTREAM_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Aggregated gateway error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Session registry or transport failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Client cache failure.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Rate limiter refusal.
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    /// Invalid configuration value.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Tool arguments failed validation.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Exchange failure.
    #[error(transparent)]
    Upstream(#[from] ExchangeError),
}

impl GatewayError {
    /// Create an invalid-arguments error.
    #[must_use]
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    /// Get the error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Session(err) if err.is_invalid_session() => ErrorCode::InvalidSession,
            Self::Session(_) => ErrorCode::TransportError,
            Self::Cache(CacheError::ConstructionFailed { .. }) => ErrorCode::ConstructionFailed,
            Self::Cache(CacheError::InvalidPattern(_)) | Self::InvalidArguments(_) => {
                ErrorCode::InvalidArguments
            }
            Self::RateLimit(_) => ErrorCode::RateLimited,
            Self::Configuration(_) => ErrorCode::ConfigurationError,
            Self::Upstream(
                ExchangeError::UnsupportedExchange(_)
                | ExchangeError::UnsupportedMarketType { .. }
                | ExchangeError::InvalidRequest(_),
            ) => ErrorCode::InvalidArguments,
            Self::Upstream(_) => ErrorCode::UpstreamError,
        }
    }

    /// Structured body for tool error results.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "error": self.code().reason(),
            "message": self.to_string(),
        });
        if let Self::RateLimit(RateLimitError::RateLimited { retry_after, .. }) = self {
            let retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
            body["retryAfterMs"] = json!(retry_after_ms);
        }
        body
    }
}
