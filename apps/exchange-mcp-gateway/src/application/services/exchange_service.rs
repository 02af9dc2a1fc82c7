//! Exchange Service
//!
//! Resolves a tool call to a cached exchange client and gates the outbound
//! call through the rate limiter.
//!
//! # Call Path
//!
//! ```text
//! tool ─► describe(exchange) ─► fingerprint(settings) ─► cache.get_or_construct
//!      ─► limiter.acquire_within(exchange) ─► client.fetch_*
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use super::client_cache::{CacheStats, ClientCache};
use crate::application::ports::{
    ApiCredentials, ClientOptions, ExchangeClient, ExchangeConnector, ExchangeDescriptor,
    ExchangeError, ProxyOptions,
};
use crate::domain::settings::{ClientFingerprint, MarketType, RuntimeSettings, SettingsStore};
use crate::error::GatewayError;
use crate::infrastructure::metrics::{self, Outcome};
use crate::resilience::{RateLimitError, RateLimitStatus, RateLimiter};

/// Shared cache of exchange clients.
pub type ExchangeClientCache = ClientCache<dyn ExchangeClient>;

/// Orchestrates client lookup and rate-limited exchange calls.
pub struct ExchangeService {
    connector: Arc<dyn ExchangeConnector>,
    cache: Arc<ExchangeClientCache>,
    limiter: Arc<RateLimiter>,
    settings: Arc<SettingsStore>,
    credentials: HashMap<String, ApiCredentials>,
}

impl std::fmt::Debug for ExchangeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeService")
            .field("cache", &self.cache)
            .field("credentialed_exchanges", &self.credentials.keys())
            .finish_non_exhaustive()
    }
}

impl ExchangeService {
    /// Create the service.
    #[must_use]
    pub fn new(
        connector: Arc<dyn ExchangeConnector>,
        cache: Arc<ExchangeClientCache>,
        limiter: Arc<RateLimiter>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            connector,
            cache,
            limiter,
            settings,
            credentials: HashMap::new(),
        }
    }

    /// Attach API credentials, keyed by exchange identifier.
    #[must_use]
    pub fn with_credentials(mut self, credentials: HashMap<String, ApiCredentials>) -> Self {
        self.credentials = credentials
            .into_iter()
            .map(|(exchange, creds)| (exchange.to_lowercase(), creds))
            .collect();
        self
    }

    /// Exchanges available through the connector.
    #[must_use]
    pub fn exchanges(&self) -> Vec<ExchangeDescriptor> {
        let mut exchanges = self.connector.supported_exchanges();
        exchanges.sort_by(|a, b| a.id.cmp(&b.id));
        exchanges
    }

    /// Describe one exchange.
    ///
    /// # Errors
    ///
    /// Returns `Upstream(UnsupportedExchange)` for unknown identifiers.
    pub fn describe(&self, exchange: &str) -> Result<ExchangeDescriptor, GatewayError> {
        self.connector
            .describe(exchange)
            .ok_or_else(|| ExchangeError::UnsupportedExchange(exchange.to_string()).into())
    }

    /// Whether API credentials are configured for an exchange.
    #[must_use]
    pub fn has_credentials(&self, exchange: &str) -> bool {
        self.credentials.contains_key(&exchange.to_lowercase())
    }

    /// Fingerprint a call would use under the current settings.
    #[must_use]
    pub fn fingerprint(&self, exchange: &str, market_type: MarketType) -> ClientFingerprint {
        let settings = self.settings.snapshot();
        self.fingerprint_with(&settings, exchange, market_type)
    }

    fn fingerprint_with(
        &self,
        settings: &RuntimeSettings,
        exchange: &str,
        market_type: MarketType,
    ) -> ClientFingerprint {
        ClientFingerprint::derive(
            exchange,
            market_type,
            &settings.proxy,
            self.has_credentials(exchange),
        )
    }

    /// Get a client, constructing it if the cache has none for the current
    /// configuration.
    ///
    /// `market_type` falls back to the configured default.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange or market type is unsupported or
    /// construction fails.
    pub async fn client(
        &self,
        exchange: &str,
        market_type: Option<MarketType>,
    ) -> Result<Arc<dyn ExchangeClient>, GatewayError> {
        let descriptor = self.describe(exchange)?;
        let settings = self.settings.snapshot();
        let market_type = market_type.unwrap_or(settings.default_market_type);

        if !descriptor.supports(market_type) {
            return Err(ExchangeError::UnsupportedMarketType {
                exchange: descriptor.id,
                market_type,
            }
            .into());
        }

        let fingerprint = self.fingerprint_with(&settings, &descriptor.id, market_type);
        let key = fingerprint.key();
        let options = self.client_options(&settings, &descriptor.id, market_type);
        let connector = Arc::clone(&self.connector);
        let exchange_id = descriptor.id.clone();

        // Only the config service invalidates, even if settings change
        // while this client is being built.
        let client = self
            .cache
            .get_or_construct(&key, || async move {
                tracing::info!(
                    exchange = %exchange_id,
                    market_type = %market_type,
                    "Constructing exchange client"
                );
                let result = connector.construct(options).await;
                let outcome = if result.is_ok() {
                    Outcome::Ok
                } else {
                    Outcome::Error
                };
                metrics::record_construction(&exchange_id, outcome);
                result
            })
            .await?;

        Ok(client)
    }

    fn client_options(
        &self,
        settings: &RuntimeSettings,
        exchange: &str,
        market_type: MarketType,
    ) -> ClientOptions {
        let proxy = settings
            .proxy
            .url
            .as_ref()
            .filter(|_| settings.proxy.enabled)
            .map(|url| ProxyOptions {
                url: url.clone(),
                username: settings
                    .proxy
                    .credentials
                    .as_ref()
                    .map(|c| c.username().to_string()),
                password: settings
                    .proxy
                    .credentials
                    .as_ref()
                    .map(|c| c.password().to_string()),
            });

        ClientOptions {
            exchange: exchange.to_string(),
            market_type,
            proxy,
            credentials: self.credentials.get(exchange).cloned(),
        }
    }

    /// Run one rate-limited call against an exchange client.
    ///
    /// # Errors
    ///
    /// Returns `RateLimit` without calling the client if no permit is
    /// available within the limiter's wait bound, or the client's error.
    pub async fn call<F, Fut>(
        &self,
        exchange: &str,
        market_type: Option<MarketType>,
        operation: F,
    ) -> Result<Value, GatewayError>
    where
        F: FnOnce(Arc<dyn ExchangeClient>) -> Fut,
        Fut: Future<Output = Result<Value, ExchangeError>>,
    {
        let client = self.client(exchange, market_type).await?;
        let target = client.exchange_id().to_string();

        match self
            .limiter
            .acquire_within(&target, self.limiter.max_wait())
            .await
        {
            Ok(waited) => metrics::record_rate_limit_wait(&target, waited),
            Err(err @ RateLimitError::RateLimited { .. }) => {
                metrics::record_rate_limited(&target);
                tracing::warn!(exchange = %target, error = %err, "Outbound call rate limited");
                return Err(err.into());
            }
        }

        let started = Instant::now();
        let result = operation(client).await;
        tracing::debug!(
            exchange = %target,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            ok = result.is_ok(),
            "Exchange call finished"
        );
        result.map_err(GatewayError::from)
    }

    /// Ticker for a symbol.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn ticker(
        &self,
        exchange: &str,
        market_type: Option<MarketType>,
        symbol: &str,
    ) -> Result<Value, GatewayError> {
        self.call(exchange, market_type, |client| async move {
            client.fetch_ticker(symbol).await
        })
        .await
    }

    /// Order book for a symbol.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn order_book(
        &self,
        exchange: &str,
        market_type: Option<MarketType>,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<Value, GatewayError> {
        self.call(exchange, market_type, |client| async move {
            client.fetch_order_book(symbol, limit).await
        })
        .await
    }

    /// Candles for a symbol.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn ohlcv(
        &self,
        exchange: &str,
        market_type: Option<MarketType>,
        symbol: &str,
        timeframe: &str,
        limit: Option<u32>,
    ) -> Result<Value, GatewayError> {
        self.call(exchange, market_type, |client| async move {
            client.fetch_ohlcv(symbol, timeframe, limit).await
        })
        .await
    }

    /// Recent trades for a symbol.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn trades(
        &self,
        exchange: &str,
        market_type: Option<MarketType>,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<Value, GatewayError> {
        self.call(exchange, market_type, |client| async move {
            client.fetch_trades(symbol, limit).await
        })
        .await
    }

    /// Client cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Invalidate cached clients.
    ///
    /// # Errors
    ///
    /// Returns `Cache(InvalidPattern)` for an unusable pattern.
    pub fn clear_cache(&self, pattern: Option<&str>) -> Result<Vec<String>, GatewayError> {
        let removed = self.cache.clear(pattern)?;
        tracing::info!(pattern = ?pattern, removed = removed.len(), "Client cache cleared");
        Ok(removed)
    }

    /// Rate limiter state per target.
    #[must_use]
    pub fn rate_limits(&self) -> Vec<RateLimitStatus> {
        self.limiter.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::domain::settings::ProxySettings;
    use crate::resilience::{RateLimitBudget, RateLimiterConfig};

    struct StubClient {
        exchange: String,
        market_type: MarketType,
        proxied: bool,
    }

    #[async_trait]
    impl ExchangeClient for StubClient {
        fn exchange_id(&self) -> &str {
            &self.exchange
        }

        fn market_type(&self) -> MarketType {
            self.market_type
        }

        async fn fetch_ticker(&self, symbol: &str) -> Result<Value, ExchangeError> {
            Ok(json!({
                "symbol": symbol,
                "market": self.market_type.as_str(),
                "proxied": self.proxied,
            }))
        }

        async fn fetch_order_book(&self, _: &str, _: Option<u32>) -> Result<Value, ExchangeError> {
            Ok(json!({"bids": [], "asks": []}))
        }

        async fn fetch_ohlcv(
            &self,
            _: &str,
            _: &str,
            _: Option<u32>,
        ) -> Result<Value, ExchangeError> {
            Ok(json!([]))
        }

        async fn fetch_trades(&self, _: &str, _: Option<u32>) -> Result<Value, ExchangeError> {
            Err(ExchangeError::Http {
                status: 503,
                message: "maintenance".into(),
            })
        }

        async fn ping(&self) -> Result<Value, ExchangeError> {
            Ok(json!({}))
        }
    }

    #[derive(Default)]
    struct StubConnector {
        constructions: AtomicUsize,
    }

    #[async_trait]
    impl ExchangeConnector for StubConnector {
        fn supported_exchanges(&self) -> Vec<ExchangeDescriptor> {
            vec![ExchangeDescriptor {
                id: "binance".into(),
                name: "Binance".into(),
                market_types: vec![MarketType::Spot, MarketType::Future],
                timeframes: vec!["1h".into()],
            }]
        }

        async fn construct(
            &self,
            options: ClientOptions,
        ) -> Result<Arc<dyn ExchangeClient>, ExchangeError> {
            self.constructions.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubClient {
                exchange: options.exchange,
                market_type: options.market_type,
                proxied: options.proxy.is_some(),
            }))
        }
    }

    fn service(
        budget: RateLimitBudget,
    ) -> (ExchangeService, Arc<StubConnector>, Arc<SettingsStore>) {
        let connector = Arc::new(StubConnector::default());
        let settings = Arc::new(SettingsStore::default());
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
            max_wait: Duration::ZERO,
            ..RateLimiterConfig::default().with_budget("binance", budget)
        }));
        let service = ExchangeService::new(
            Arc::clone(&connector) as Arc<dyn ExchangeConnector>,
            Arc::new(ClientCache::new()),
            limiter,
            Arc::clone(&settings),
        );
        (service, connector, settings)
    }

    #[tokio::test]
    async fn uses_default_market_type() {
        let (service, _, settings) = service(RateLimitBudget::binance());
        settings.set_market_type(MarketType::Future);

        let ticker = service.ticker("binance", None, "BTC/USDT").await.unwrap();

        assert_eq!(ticker["market"], "future");
        assert_eq!(service.cache_stats().keys, vec!["binance:future:direct:public"]);
    }

    #[tokio::test]
    async fn repeated_calls_reuse_client() {
        let (service, connector, _) = service(RateLimitBudget::binance());

        service.ticker("binance", Some(MarketType::Spot), "BTC/USDT").await.unwrap();
        service.ticker("BINANCE", Some(MarketType::Spot), "ETH/USDT").await.unwrap();

        assert_eq!(connector.constructions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn proxy_change_yields_new_fingerprint() {
        let (service, connector, settings) = service(RateLimitBudget::binance());
        service.ticker("binance", None, "BTC/USDT").await.unwrap();

        settings
            .set_proxy(
                ProxySettings::from_parts(true, Some("http://proxy:3128".into()), None, None)
                    .unwrap(),
            )
            .unwrap();
        let ticker = service.ticker("binance", None, "BTC/USDT").await.unwrap();

        assert_eq!(ticker["proxied"], true);
        assert_eq!(connector.constructions.load(Ordering::SeqCst), 2);
    }

    /// Switches the store to a proxy while a client is being built, without
    /// clearing the cache.
    struct ReconfiguringConnector {
        inner: StubConnector,
        settings: Arc<SettingsStore>,
    }

    #[async_trait]
    impl ExchangeConnector for ReconfiguringConnector {
        fn supported_exchanges(&self) -> Vec<ExchangeDescriptor> {
            self.inner.supported_exchanges()
        }

        async fn construct(
            &self,
            options: ClientOptions,
        ) -> Result<Arc<dyn ExchangeClient>, ExchangeError> {
            let proxy =
                ProxySettings::from_parts(true, Some("http://proxy:3128".into()), None, None)
                    .map_err(|e| ExchangeError::Construction(e.to_string()))?;
            self.settings
                .set_proxy(proxy)
                .map_err(|e| ExchangeError::Construction(e.to_string()))?;
            self.inner.construct(options).await
        }
    }

    #[tokio::test]
    async fn settings_change_during_construction_keeps_entry() {
        let settings = Arc::new(SettingsStore::default());
        let service = ExchangeService::new(
            Arc::new(ReconfiguringConnector {
                inner: StubConnector::default(),
                settings: Arc::clone(&settings),
            }),
            Arc::new(ClientCache::new()),
            Arc::new(RateLimiter::new(RateLimiterConfig::default())),
            Arc::clone(&settings),
        );

        let ticker = service.ticker("binance", None, "BTC/USDT").await.unwrap();

        assert_eq!(ticker["proxied"], false);
        assert!(settings.snapshot().proxy.enabled);
        assert_eq!(service.cache_stats().keys, vec!["binance:spot:direct:public"]);
    }

    #[tokio::test]
    async fn unsupported_inputs_are_invalid_arguments() {
        let (service, _, _) = service(RateLimitBudget::binance());

        let err = service.ticker("ftx", None, "BTC/USDT").await.unwrap_err();
        assert_eq!(err.code().reason(), "INVALID_ARGUMENTS");

        let err = service
            .ticker("binance", Some(MarketType::Option), "BTC/USDT")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Upstream(ExchangeError::UnsupportedMarketType { .. })
        ));
        assert!(service.cache_stats().keys.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_fails_without_calling_client() {
        let (service, _, _) = service(RateLimitBudget::new(1, Duration::from_secs(60)));
        service.ticker("binance", None, "BTC/USDT").await.unwrap();

        let called = AtomicUsize::new(0);
        let err = service
            .call("binance", None, |client| {
                called.fetch_add(1, Ordering::SeqCst);
                async move { client.ping().await }
            })
            .await
            .unwrap_err();

        assert_eq!(err.code().reason(), "RATE_LIMITED");
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upstream_errors_propagate() {
        let (service, _, _) = service(RateLimitBudget::binance());

        let err = service
            .trades("binance", None, "BTC/USDT", Some(10))
            .await
            .unwrap_err();

        assert_eq!(err.code().reason(), "UPSTREAM_ERROR");
    }

    #[tokio::test]
    async fn pattern_clear_through_service() {
        let (service, _, _) = service(RateLimitBudget::binance());
        service.ticker("binance", Some(MarketType::Spot), "BTC/USDT").await.unwrap();
        service.ticker("binance", Some(MarketType::Future), "BTC/USDT").await.unwrap();

        let removed = service.clear_cache(Some("*:future:*")).unwrap();

        assert_eq!(removed, vec!["binance:future:direct:public"]);
        assert_eq!(service.cache_stats().size, 1);
    }
}
