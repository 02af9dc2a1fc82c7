//! Configuration Service
//!
//! The only writer of runtime settings after startup. Every mutation that
//! feeds the client fingerprint can invalidate the client cache inside the
//! same critical section, so no lookup observes the new settings alongside
//! a client built for the old ones.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::exchange_service::ExchangeClientCache;
use crate::application::ports::LogLevelControl;
use crate::domain::settings::{
    ConfigurationError, LogLevel, MarketType, ProxySettings, SettingsChange, SettingsStore,
    SettingsView,
};
use crate::error::GatewayError;

/// Result of a configuration mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    /// Effective settings before the change.
    pub previous: SettingsView,
    /// Effective settings after the change.
    pub current: SettingsView,
    /// Whether the client cache was cleared.
    pub cache_cleared: bool,
    /// Keys removed from the client cache.
    pub cleared_keys: Vec<String>,
}

/// Serializes configuration mutations and their cache invalidation.
pub struct ConfigService {
    settings: Arc<SettingsStore>,
    cache: Arc<ExchangeClientCache>,
    log_control: Arc<dyn LogLevelControl>,
    mutation: Mutex<()>,
}

impl std::fmt::Debug for ConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigService")
            .field("settings", &self.settings.view())
            .finish_non_exhaustive()
    }
}

impl ConfigService {
    /// Create the service.
    #[must_use]
    pub fn new(
        settings: Arc<SettingsStore>,
        cache: Arc<ExchangeClientCache>,
        log_control: Arc<dyn LogLevelControl>,
    ) -> Self {
        Self {
            settings,
            cache,
            log_control,
            mutation: Mutex::new(()),
        }
    }

    /// Current effective settings. Never touches the cache.
    #[must_use]
    pub fn view(&self) -> SettingsView {
        self.settings.view()
    }

    /// Replace the proxy settings.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` without changing anything if the input is
    /// invalid.
    pub fn set_proxy(
        &self,
        enabled: bool,
        url: Option<String>,
        username: Option<String>,
        password: Option<String>,
        invalidate_cache: bool,
    ) -> Result<ConfigUpdate, GatewayError> {
        let proxy = ProxySettings::from_parts(enabled, url, username, password)?;
        let _guard = self.mutation.lock();
        let change = self.settings.set_proxy(proxy)?;
        let update = self.finish(change, invalidate_cache);
        tracing::info!(
            enabled = update.current.proxy_enabled,
            url = ?update.current.proxy_url,
            cache_cleared = update.cache_cleared,
            "Proxy settings updated"
        );
        Ok(update)
    }

    /// Replace the default market type.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an unknown market type.
    pub fn set_market_type(
        &self,
        market_type: &str,
        invalidate_cache: bool,
    ) -> Result<ConfigUpdate, GatewayError> {
        let market_type: MarketType = market_type.parse()?;
        let _guard = self.mutation.lock();
        let change = self.settings.set_market_type(market_type);
        let update = self.finish(change, invalidate_cache);
        tracing::info!(
            market_type = %market_type,
            cache_cleared = update.cache_cleared,
            "Default market type updated"
        );
        Ok(update)
    }

    /// Replace the log level and apply it to the logging backend.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an unknown level or if the backend
    /// refuses it; the stored level is unchanged in both cases.
    pub fn set_log_level(
        &self,
        level: &str,
        invalidate_cache: bool,
    ) -> Result<ConfigUpdate, GatewayError> {
        let level: LogLevel = level.parse()?;
        let _guard = self.mutation.lock();
        self.log_control
            .apply(level)
            .map_err(ConfigurationError::LogLevelRejected)?;
        let change = self.settings.set_log_level(level);
        let update = self.finish(change, invalidate_cache);
        tracing::info!(level = %level, "Log level updated");
        Ok(update)
    }

    fn finish(&self, change: SettingsChange, invalidate_cache: bool) -> ConfigUpdate {
        let cleared_keys = if invalidate_cache {
            // A `None` pattern cannot be rejected.
            self.cache.clear(None).unwrap_or_default()
        } else {
            Vec::new()
        };

        ConfigUpdate {
            previous: change.previous,
            current: change.current,
            cache_cleared: invalidate_cache,
            cleared_keys,
        }
    }
}
