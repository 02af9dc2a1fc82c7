//! Gateway Configuration Settings
//!
//! Configuration types for the gateway, loaded from environment variables.
//! Runtime settings read here only seed the settings store; the
//! configuration tools are the only writers afterwards.

use std::collections::HashMap;
use std::time::Duration;

use crate::application::ports::ApiCredentials;
use crate::domain::settings::{
    ConfigurationError, LogLevel, MarketType, ProxySettings, RuntimeSettings,
};
use crate::infrastructure::exchange::SUPPORTED_EXCHANGES;
use crate::resilience::{InvalidBudget, RateLimitBudget, RateLimiterConfig};

/// Server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Bind address for both listeners.
    pub host: String,
    /// MCP transport port.
    pub mcp_port: u16,
    /// HTTP path of the MCP endpoint.
    pub mcp_path: String,
    /// Health check HTTP port.
    pub health_port: u16,
    /// Capacity of each session's outbound notification channel.
    pub session_channel_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            mcp_port: 8080,
            mcp_path: "/mcp".to_string(),
            health_port: 8082,
            session_channel_capacity: 64,
        }
    }
}

/// Outbound exchange HTTP settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSettings {
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Server settings.
    pub server: ServerSettings,
    /// Initial runtime settings.
    pub runtime: RuntimeSettings,
    /// Rate limiter budgets.
    pub rate_limits: RateLimiterConfig,
    /// Outbound HTTP settings.
    pub exchange: ExchangeSettings,
    /// API credentials by exchange identifier.
    pub credentials: HashMap<String, ApiCredentials>,
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = EnvReader { lookup: &lookup };
        let defaults = ServerSettings::default();

        let server = ServerSettings {
            host: env.string("MCP_GATEWAY_HOST").unwrap_or(defaults.host),
            mcp_port: env.parse("MCP_GATEWAY_PORT", defaults.mcp_port)?,
            mcp_path: normalize_path(
                &env.string("MCP_GATEWAY_PATH")
                    .unwrap_or(defaults.mcp_path),
            ),
            health_port: env.parse("MCP_GATEWAY_HEALTH_PORT", defaults.health_port)?,
            session_channel_capacity: env.parse(
                "MCP_GATEWAY_SESSION_CHANNEL_CAPACITY",
                defaults.session_channel_capacity,
            )?,
        };

        let runtime = Self::runtime_settings(&env)?;
        let rate_limits = Self::rate_limits(&env)?;

        let exchange_defaults = ExchangeSettings::default();
        let exchange = ExchangeSettings {
            request_timeout: env.millis(
                "EXCHANGE_REQUEST_TIMEOUT_MS",
                exchange_defaults.request_timeout,
            )?,
            connect_timeout: env.millis(
                "EXCHANGE_CONNECT_TIMEOUT_MS",
                exchange_defaults.connect_timeout,
            )?,
        };

        let mut credentials = HashMap::new();
        for exchange_id in SUPPORTED_EXCHANGES {
            let prefix = exchange_id.to_uppercase();
            let key_var = format!("{prefix}_API_KEY");
            let secret_var = format!("{prefix}_SECRET");
            match (env.string(&key_var), env.string(&secret_var)) {
                (Some(api_key), Some(secret)) => {
                    credentials.insert(
                        (*exchange_id).to_string(),
                        ApiCredentials { api_key, secret },
                    );
                }
                (None, None) => {}
                (Some(_), None) => return Err(ConfigError::MissingEnvVar(secret_var)),
                (None, Some(_)) => return Err(ConfigError::MissingEnvVar(key_var)),
            }
        }

        Ok(Self {
            server,
            runtime,
            rate_limits,
            exchange,
            credentials,
        })
    }

    fn runtime_settings(env: &EnvReader<'_>) -> Result<RuntimeSettings, ConfigError> {
        let proxy = ProxySettings::from_parts(
            env.flag("USE_PROXY")?,
            env.string("PROXY_URL"),
            env.string("PROXY_USERNAME"),
            env.string("PROXY_PASSWORD"),
        )
        .map_err(|source| ConfigError::Invalid {
            key: "PROXY_*".to_string(),
            source,
        })?;

        let default_market_type = env
            .string("DEFAULT_MARKET_TYPE")
            .map(|v| v.parse::<MarketType>())
            .transpose()
            .map_err(|source| ConfigError::Invalid {
                key: "DEFAULT_MARKET_TYPE".to_string(),
                source,
            })?
            .unwrap_or_default();

        let log_level = env
            .string("LOG_LEVEL")
            .map(|v| v.parse::<LogLevel>())
            .transpose()
            .map_err(|source| ConfigError::Invalid {
                key: "LOG_LEVEL".to_string(),
                source,
            })?
            .unwrap_or_default();

        Ok(RuntimeSettings {
            proxy,
            default_market_type,
            log_level,
        })
    }

    fn rate_limits(env: &EnvReader<'_>) -> Result<RateLimiterConfig, ConfigError> {
        let mut config = RateLimiterConfig::default();

        config.default_budget = env.budget(
            "RATE_LIMIT_DEFAULT_REQUESTS",
            "RATE_LIMIT_DEFAULT_WINDOW_MS",
            config.default_budget,
        )?;
        config.max_wait = env.millis("RATE_LIMIT_MAX_WAIT_MS", config.max_wait)?;

        for exchange_id in SUPPORTED_EXCHANGES {
            let prefix = exchange_id.to_uppercase();
            let budget = env.budget(
                &format!("{prefix}_RATE_LIMIT_REQUESTS"),
                &format!("{prefix}_RATE_LIMIT_WINDOW_MS"),
                config.budget_for(exchange_id),
            )?;
            config = config.with_budget(exchange_id, budget);
        }

        Ok(config)
    }

    /// Address of the MCP listener.
    #[must_use]
    pub fn mcp_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.mcp_port)
    }

    /// Address of the health listener.
    #[must_use]
    pub fn health_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.health_port)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required companion variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    Unparseable {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// Rate limit variables describe an unusable budget.
    #[error("invalid rate limit in {key}: {source}")]
    InvalidRateLimit {
        /// Variable names.
        key: String,
        /// Validation failure.
        source: InvalidBudget,
    },
    /// Variable parsed but failed validation.
    #[error("invalid configuration in {key}: {source}")]
    Invalid {
        /// Variable name.
        key: String,
        /// Validation failure.
        source: ConfigurationError,
    },
}

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    /// Non-blank value of a variable.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        self.string(key).map_or(Ok(default), |value| {
            value.parse().map_err(|_| ConfigError::Unparseable {
                key: key.to_string(),
                value,
            })
        })
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.string(key).map_or(Ok(default), |value| {
            value
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::Unparseable {
                    key: key.to_string(),
                    value,
                })
        })
    }

    fn budget(
        &self,
        requests_key: &str,
        window_key: &str,
        current: RateLimitBudget,
    ) -> Result<RateLimitBudget, ConfigError> {
        let max_requests = self.parse(requests_key, current.max_requests)?;
        let window = self.millis(window_key, current.window)?;
        RateLimitBudget::try_new(max_requests, window).map_err(|source| {
            ConfigError::InvalidRateLimit {
                key: format!("{requests_key}/{window_key}"),
                source,
            }
        })
    }

    fn flag(&self, key: &str) -> Result<bool, ConfigError> {
        match self.string(key).map(|v| v.to_lowercase()).as_deref() {
            None | Some("false" | "0" | "no" | "off") => Ok(false),
            Some("true" | "1" | "yes" | "on") => Ok(true),
            Some(other) => Err(ConfigError::Unparseable {
                key: key.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
