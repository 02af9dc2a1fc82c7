//! REST connector.
//!
//! Builds one `reqwest` client per configuration fingerprint, with the
//! configured proxy and timeouts baked in.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Proxy};

use super::client::RestExchangeClient;
use super::venues::Venue;
use crate::application::ports::{
    ClientOptions, ExchangeClient, ExchangeConnector, ExchangeDescriptor, ExchangeError,
    ProxyOptions,
};
use crate::infrastructure::config::ExchangeSettings;

const USER_AGENT: &str = concat!("exchange-mcp-gateway/", env!("CARGO_PKG_VERSION"));

/// Connector for the supported venues' public REST APIs.
#[derive(Debug, Clone, Default)]
pub struct RestConnector {
    settings: ExchangeSettings,
    base_urls: HashMap<Venue, String>,
}

impl RestConnector {
    /// Create a connector.
    #[must_use]
    pub fn new(settings: ExchangeSettings) -> Self {
        Self {
            settings,
            base_urls: HashMap::new(),
        }
    }

    /// Send every request for a venue to `base_url` instead of production.
    #[must_use]
    pub fn with_base_url(mut self, venue: Venue, base_url: impl Into<String>) -> Self {
        self.base_urls.insert(venue, base_url.into());
        self
    }

    fn base_url(&self, options: &ClientOptions, venue: Venue) -> String {
        self.base_urls
            .get(&venue)
            .cloned()
            .unwrap_or_else(|| venue.default_base_url(options.market_type).to_string())
    }

    fn http_client(&self, proxy: Option<&ProxyOptions>) -> Result<Client, ExchangeError> {
        let mut builder = Client::builder()
            .timeout(self.settings.request_timeout)
            .connect_timeout(self.settings.connect_timeout)
            .user_agent(USER_AGENT);

        if let Some(proxy) = proxy {
            let mut reqwest_proxy = Proxy::all(&proxy.url)
                .map_err(|e| ExchangeError::Construction(format!("invalid proxy: {e}")))?;
            if let (Some(username), Some(password)) = (&proxy.username, &proxy.password) {
                reqwest_proxy = reqwest_proxy.basic_auth(username, password);
            }
            builder = builder.proxy(reqwest_proxy);
        }

        builder
            .build()
            .map_err(|e| ExchangeError::Construction(e.to_string()))
    }
}

#[async_trait]
impl ExchangeConnector for RestConnector {
    fn supported_exchanges(&self) -> Vec<ExchangeDescriptor> {
        Venue::all().iter().map(Venue::descriptor).collect()
    }

    async fn construct(
        &self,
        options: ClientOptions,
    ) -> Result<Arc<dyn ExchangeClient>, ExchangeError> {
        let venue = Venue::parse(&options.exchange)
            .ok_or_else(|| ExchangeError::UnsupportedExchange(options.exchange.clone()))?;

        if !venue.supports(options.market_type) {
            return Err(ExchangeError::UnsupportedMarketType {
                exchange: venue.id().to_string(),
                market_type: options.market_type,
            });
        }

        let http = self.http_client(options.proxy.as_ref())?;
        let base_url = self.base_url(&options, venue);

        tracing::info!(
            venue = %venue,
            market_type = %options.market_type,
            proxied = options.proxy.is_some(),
            authenticated = options.credentials.is_some(),
            "Exchange client constructed"
        );

        Ok(Arc::new(RestExchangeClient::new(
            venue,
            options.market_type,
            http,
            base_url,
            options.credentials.map(|c| c.api_key),
        )))
    }
}
