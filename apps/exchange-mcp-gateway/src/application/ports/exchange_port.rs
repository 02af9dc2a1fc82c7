//! Exchange Port (Driven Port)
//!
//! Interface to the exchange-connectivity collaborator. A connector builds
//! clients; a client fetches market data and returns the venue payload
//! untouched as JSON.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::domain::settings::MarketType;

/// Exchange API key pair.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    /// API key.
    pub api_key: String,
    /// API secret.
    pub secret: String,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"[REDACTED]")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Proxy a client should route through.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyOptions {
    /// Proxy URL, possibly with userinfo.
    pub url: String,
    /// Basic-auth username.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
}

impl fmt::Debug for ProxyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyOptions")
            .field("url", &"[REDACTED]")
            .field("authenticated", &self.username.is_some())
            .finish()
    }
}

/// Everything needed to construct one exchange client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Exchange identifier, lowercase.
    pub exchange: String,
    /// Market segment.
    pub market_type: MarketType,
    /// Outbound proxy, if enabled.
    pub proxy: Option<ProxyOptions>,
    /// API credentials, if configured.
    pub credentials: Option<ApiCredentials>,
}

/// Static description of a supported exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeDescriptor {
    /// Identifier used in tool arguments.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Market segments the connector can build clients for.
    pub market_types: Vec<MarketType>,
    /// Candle intervals accepted by `fetch_ohlcv`.
    pub timeframes: Vec<String>,
}

impl ExchangeDescriptor {
    /// Whether the exchange supports a market segment.
    #[must_use]
    pub fn supports(&self, market_type: MarketType) -> bool {
        self.market_types.contains(&market_type)
    }
}

/// Exchange port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    /// Exchange is not known to the connector.
    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),

    /// Exchange has no such market segment.
    #[error("{exchange} does not support {market_type} markets")]
    UnsupportedMarketType {
        /// Exchange identifier.
        exchange: String,
        /// Requested market type.
        market_type: MarketType,
    },

    /// Argument the venue cannot accept.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Client could not be built.
    #[error("client construction failed: {0}")]
    Construction(String),

    /// Venue answered with an error status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Venue answered successfully at the HTTP level but reported an error.
    #[error("venue rejected request ({code}): {message}")]
    Rejected {
        /// Venue error code.
        code: String,
        /// Venue error message.
        message: String,
    },

    /// Request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// Response body was not valid JSON.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Connected exchange client.
///
/// Implementations are shared between sessions through the client cache
/// and must tolerate concurrent calls.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Exchange identifier.
    fn exchange_id(&self) -> &str;

    /// Market segment this client was built for.
    fn market_type(&self) -> MarketType;

    /// 24h ticker for a unified symbol such as `BTC/USDT`.
    async fn fetch_ticker(&self, symbol: &str) -> Result<Value, ExchangeError>;

    /// Order book snapshot.
    async fn fetch_order_book(&self, symbol: &str, limit: Option<u32>)
    -> Result<Value, ExchangeError>;

    /// Candles for a timeframe such as `1h`.
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: Option<u32>,
    ) -> Result<Value, ExchangeError>;

    /// Recent public trades.
    async fn fetch_trades(&self, symbol: &str, limit: Option<u32>) -> Result<Value, ExchangeError>;

    /// Liveness probe against the venue.
    async fn ping(&self) -> Result<Value, ExchangeError>;
}

/// Builds exchange clients.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Exchanges this connector can build clients for.
    fn supported_exchanges(&self) -> Vec<ExchangeDescriptor>;

    /// Description of one exchange.
    fn describe(&self, exchange: &str) -> Option<ExchangeDescriptor> {
        let exchange = exchange.to_lowercase();
        self.supported_exchanges()
            .into_iter()
            .find(|descriptor| descriptor.id == exchange)
    }

    /// Construct a client.
    async fn construct(&self, options: ClientOptions)
    -> Result<Arc<dyn ExchangeClient>, ExchangeError>;
}
