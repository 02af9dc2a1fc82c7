//! Runtime Settings
//!
//! Process-wide mutable configuration consumed by client construction:
//! proxy settings, default market type and log level.
//!
//! # Design
//!
//! The [`SettingsStore`] is the single writer of the runtime settings.
//! Every mutation validates its input first, then swaps the affected
//! fields under one write lock and hands back the previous and the new
//! [`SettingsView`]. Views never carry credentials.

mod fingerprint;

use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::Serialize;
use url::Url;

pub use fingerprint::ClientFingerprint;

// =============================================================================
// Market Type
// =============================================================================

/// Market segment a client is constructed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    /// Spot market.
    #[default]
    Spot,
    /// Margin trading on the spot book.
    Margin,
    /// Dated futures.
    Future,
    /// Perpetual swaps.
    Swap,
    /// Options.
    Option,
}

impl MarketType {
    /// Get all market types.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Spot,
            Self::Margin,
            Self::Future,
            Self::Swap,
            Self::Option,
        ]
    }

    /// Get the market type name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Margin => "margin",
            Self::Future => "future",
            Self::Swap => "swap",
            Self::Option => "option",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "spot" => Ok(Self::Spot),
            "margin" => Ok(Self::Margin),
            "future" | "futures" => Ok(Self::Future),
            "swap" => Ok(Self::Swap),
            "option" | "options" => Ok(Self::Option),
            other => Err(ConfigurationError::UnknownMarketType(other.to_string())),
        }
    }
}

// =============================================================================
// Log Level
// =============================================================================

/// Log level accepted by the configuration operations.
///
/// Mirrors the MCP logging levels, plus `trace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Finest-grained diagnostics.
    Trace,
    /// Debug diagnostics.
    Debug,
    /// Normal operation.
    #[default]
    Info,
    /// Significant but normal events.
    Notice,
    /// Recoverable problems.
    Warning,
    /// Failed operations.
    Error,
    /// Critical conditions.
    Critical,
    /// Immediate action required.
    Alert,
    /// System unusable.
    Emergency,
}

impl LogLevel {
    /// Get the level name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Alert => "alert",
            Self::Emergency => "emergency",
        }
    }

    /// Get the closest `tracing` filter directive for this level.
    #[must_use]
    pub const fn tracing_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info | Self::Notice => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical | Self::Alert | Self::Emergency => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "notice" => Ok(Self::Notice),
            "warn" | "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            "alert" => Ok(Self::Alert),
            "emergency" => Ok(Self::Emergency),
            other => Err(ConfigurationError::UnknownLogLevel(other.to_string())),
        }
    }
}

// =============================================================================
// Proxy Settings
// =============================================================================

/// Proxy basic-auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    username: String,
    password: String,
}

impl ProxyCredentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Get the username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Outbound proxy settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    /// Whether outbound calls go through the proxy.
    pub enabled: bool,
    /// Proxy URL (`http`, `https`, `socks5` or `socks5h`).
    pub url: Option<String>,
    /// Optional basic-auth credentials.
    pub credentials: Option<ProxyCredentials>,
}

impl ProxySettings {
    /// Build proxy settings from raw operator input.
    ///
    /// Blank strings are treated as absent.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the combination is invalid.
    pub fn from_parts(
        enabled: bool,
        url: Option<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let url = non_blank(url);
        let credentials = match (non_blank(username), non_blank(password)) {
            (Some(username), Some(password)) => Some(ProxyCredentials::new(username, password)),
            (None, None) => None,
            _ => return Err(ConfigurationError::IncompleteProxyCredentials),
        };

        let settings = Self {
            enabled,
            url,
            credentials,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if an enabled proxy has no URL or if the
    /// URL is malformed.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match &self.url {
            Some(url) => validate_proxy_url(url),
            None if self.enabled => Err(ConfigurationError::MissingProxyUrl),
            None => Ok(()),
        }
    }

    /// Whether proxy credentials are present, either explicitly or
    /// embedded in the URL.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
            || self
                .url
                .as_deref()
                .is_some_and(url_has_userinfo)
    }

    /// The proxy URL with any embedded userinfo removed.
    #[must_use]
    pub fn redacted_url(&self) -> Option<String> {
        self.url.as_deref().map(redact_url)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_proxy_url(raw: &str) -> Result<(), ConfigurationError> {
    let url = Url::parse(raw).map_err(|e| ConfigurationError::InvalidProxyUrl(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https" | "socks5" | "socks5h") {
        return Err(ConfigurationError::InvalidProxyUrl(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigurationError::InvalidProxyUrl(format!(
            "missing host: {}",
            redact_url(raw)
        )));
    }
    Ok(())
}

fn url_has_userinfo(raw: &str) -> bool {
    Url::parse(raw).is_ok_and(|url| !url.username().is_empty() || url.password().is_some())
}

fn redact_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return "[unparseable]".to_string();
    };
    let _ = url.set_username("");
    let _ = url.set_password(None);

    let bare_root = url.path() == "/" && url.query().is_none() && url.fragment().is_none();
    let rendered = url.as_str();
    if bare_root {
        rendered.trim_end_matches('/').to_string()
    } else {
        rendered.to_string()
    }
}

// =============================================================================
// Settings State
// =============================================================================

/// Complete runtime settings record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Outbound proxy.
    pub proxy: ProxySettings,
    /// Market type used when a tool call does not name one.
    pub default_market_type: MarketType,
    /// Current log level.
    pub log_level: LogLevel,
}

impl RuntimeSettings {
    /// Build the credential-free view of these settings.
    #[must_use]
    pub fn view(&self) -> SettingsView {
        SettingsView {
            proxy_enabled: self.proxy.enabled,
            proxy_url: self.proxy.redacted_url(),
            proxy_auth_configured: self.proxy.has_credentials(),
            default_market_type: self.default_market_type,
            log_level: self.log_level,
        }
    }
}

/// Effective configuration as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    /// Whether the proxy is enabled.
    pub proxy_enabled: bool,
    /// Proxy URL without userinfo.
    pub proxy_url: Option<String>,
    /// Whether proxy credentials are set.
    pub proxy_auth_configured: bool,
    /// Default market type.
    pub default_market_type: MarketType,
    /// Current log level.
    pub log_level: LogLevel,
}

/// Result of a settings mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsChange {
    /// View before the mutation.
    pub previous: SettingsView,
    /// View after the mutation.
    pub current: SettingsView,
}

/// Single-writer store for the process-wide runtime settings.
#[derive(Debug, Default)]
pub struct SettingsStore {
    inner: RwLock<RuntimeSettings>,
}

impl SettingsStore {
    /// Create a store seeded with initial settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the initial proxy settings are invalid.
    pub fn new(initial: RuntimeSettings) -> Result<Self, ConfigurationError> {
        initial.proxy.validate()?;
        Ok(Self {
            inner: RwLock::new(initial),
        })
    }

    /// Copy of the full settings, credentials included.
    ///
    /// Only client construction should read this.
    #[must_use]
    pub fn snapshot(&self) -> RuntimeSettings {
        self.inner.read().clone()
    }

    /// Credential-free view of the current settings.
    #[must_use]
    pub fn view(&self) -> SettingsView {
        self.inner.read().view()
    }

    /// Replace the proxy settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` without mutating state if the new
    /// settings are invalid.
    pub fn set_proxy(&self, proxy: ProxySettings) -> Result<SettingsChange, ConfigurationError> {
        proxy.validate()?;
        Ok(self.mutate(|settings| settings.proxy = proxy))
    }

    /// Replace the default market type.
    pub fn set_market_type(&self, market_type: MarketType) -> SettingsChange {
        self.mutate(|settings| settings.default_market_type = market_type)
    }

    /// Replace the log level.
    pub fn set_log_level(&self, level: LogLevel) -> SettingsChange {
        self.mutate(|settings| settings.log_level = level)
    }

    fn mutate(&self, apply: impl FnOnce(&mut RuntimeSettings)) -> SettingsChange {
        let mut settings = self.inner.write();
        let previous = settings.view();
        apply(&mut settings);
        SettingsChange {
            previous,
            current: settings.view(),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Invalid configuration value. Always raised before any state is mutated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Proxy enabled without a URL.
    #[error("proxy is enabled but no proxy URL was given")]
    MissingProxyUrl,
    /// Proxy URL is malformed or uses an unsupported scheme.
    #[error("invalid proxy URL: {0}")]
    InvalidProxyUrl(String),
    /// Only one of username/password was given.
    #[error("proxy username and password must be provided together")]
    IncompleteProxyCredentials,
    /// Unknown market type.
    #[error("unknown market type: {0}")]
    UnknownMarketType(String),
    /// Unknown log level.
    #[error("unknown log level: {0}")]
    UnknownLogLevel(String),
    /// The logging backend refused the new level.
    #[error("log level could not be applied: {0}")]
    LogLevelRejected(String),
}

// =============================================================================
// Tests
// =============================================================================
