//! In-memory exchange connector for tool and dispatcher tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use super::ToolContext;
use crate::application::ports::{
    ClientOptions, ExchangeClient, ExchangeConnector, ExchangeDescriptor, ExchangeError,
    NoOpLogLevelControl,
};
use crate::application::services::{ClientCache, ConfigService, ExchangeService};
use crate::domain::settings::{MarketType, SettingsStore};
use crate::resilience::{RateLimiter, RateLimiterConfig};

struct StubClient {
    exchange: String,
    market_type: MarketType,
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
        Ok(json!({"symbol": symbol, "last": 100.5}))
    }

    async fn fetch_order_book(
        &self,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<Value, ExchangeError> {
        Ok(json!({"symbol": symbol, "limit": limit, "bids": [], "asks": []}))
    }

    async fn fetch_ohlcv(
        &self,
        _symbol: &str,
        timeframe: &str,
        _limit: Option<u32>,
    ) -> Result<Value, ExchangeError> {
        Ok(json!({"interval": timeframe, "candles": []}))
    }

    async fn fetch_trades(
        &self,
        _symbol: &str,
        _limit: Option<u32>,
    ) -> Result<Value, ExchangeError> {
        Err(ExchangeError::Http {
            status: 502,
            message: "bad gateway".to_string(),
        })
    }

    async fn ping(&self) -> Result<Value, ExchangeError> {
        Ok(json!({}))
    }
}

struct StubConnector {
    constructions: Arc<AtomicUsize>,
}

#[async_trait]
impl ExchangeConnector for StubConnector {
    fn supported_exchanges(&self) -> Vec<ExchangeDescriptor> {
        vec![
            ExchangeDescriptor {
                id: "binance".to_string(),
                name: "Binance".to_string(),
                market_types: vec![MarketType::Spot, MarketType::Future],
                timeframes: vec!["1m".to_string(), "1h".to_string()],
            },
            ExchangeDescriptor {
                id: "okx".to_string(),
                name: "OKX".to_string(),
                market_types: vec![
                    MarketType::Spot,
                    MarketType::Swap,
                    MarketType::Future,
                    MarketType::Option,
                ],
                timeframes: vec!["1h".to_string()],
            },
        ]
    }

    async fn construct(
        &self,
        options: ClientOptions,
    ) -> Result<Arc<dyn ExchangeClient>, ExchangeError> {
        self.constructions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StubClient {
            exchange: options.exchange,
            market_type: options.market_type,
        }))
    }
}

/// Tool context over the stub connector, plus its construction counter.
pub fn context() -> (ToolContext, Arc<AtomicUsize>) {
    let constructions = Arc::new(AtomicUsize::new(0));
    let connector = StubConnector {
        constructions: Arc::clone(&constructions),
    };
    let settings = Arc::new(SettingsStore::default());
    let cache = Arc::new(ClientCache::new());

    let exchange = ExchangeService::new(
        Arc::new(connector),
        Arc::clone(&cache),
        Arc::new(RateLimiter::new(RateLimiterConfig::default())),
        Arc::clone(&settings),
    );
    let config = ConfigService::new(settings, cache, Arc::new(NoOpLogLevelControl));

    (
        ToolContext {
            exchange: Arc::new(exchange),
            config: Arc::new(config),
        },
        constructions,
    )
}
