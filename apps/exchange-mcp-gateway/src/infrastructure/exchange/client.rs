//! REST exchange client.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::venues::{Operation, RequestParams, Venue};
use crate::application::ports::{ExchangeClient, ExchangeError};
use crate::domain::settings::MarketType;

/// Longest error body kept in an `Http` error.
const MAX_ERROR_BODY: usize = 512;

/// Exchange client backed by a venue's public REST API.
#[derive(Debug, Clone)]
pub struct RestExchangeClient {
    venue: Venue,
    market_type: MarketType,
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestExchangeClient {
    /// Create a client.
    #[must_use]
    pub fn new(
        venue: Venue,
        market_type: MarketType,
        http: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            venue,
            market_type,
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(
        &self,
        operation: Operation,
        params: RequestParams<'_>,
    ) -> Result<Value, ExchangeError> {
        let request = self.venue.request(self.market_type, operation, params)?;
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = self.http.get(&url).query(&request.query);
        if let Some(key) = &self.api_key {
            builder = builder.header(self.venue.api_key_header(), key);
        }

        tracing::debug!(venue = %self.venue, path = request.path, "Exchange request");

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(venue = %self.venue, error = %e, "Exchange request failed");
            ExchangeError::Network(e.to_string())
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        if !status.is_success() {
            let mut message = text;
            message.truncate(floor_char_boundary(&message, MAX_ERROR_BODY));
            return Err(ExchangeError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| ExchangeError::Decode(e.to_string()))?;
        self.venue.check_envelope(&body)?;
        Ok(body)
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

#[async_trait]
impl ExchangeClient for RestExchangeClient {
    fn exchange_id(&self) -> &str {
        self.venue.id()
    }

    fn market_type(&self) -> MarketType {
        self.market_type
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Value, ExchangeError> {
        self.get(
            Operation::Ticker,
            RequestParams {
                symbol: Some(symbol),
                ..RequestParams::default()
            },
        )
        .await
    }

    async fn fetch_order_book(
        &self,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<Value, ExchangeError> {
        self.get(
            Operation::OrderBook,
            RequestParams {
                symbol: Some(symbol),
                limit,
                ..RequestParams::default()
            },
        )
        .await
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: Option<u32>,
    ) -> Result<Value, ExchangeError> {
        self.get(
            Operation::Ohlcv,
            RequestParams {
                symbol: Some(symbol),
                timeframe: Some(timeframe),
                limit,
            },
        )
        .await
    }

    async fn fetch_trades(&self, symbol: &str, limit: Option<u32>) -> Result<Value, ExchangeError> {
        self.get(
            Operation::Trades,
            RequestParams {
                symbol: Some(symbol),
                limit,
                ..RequestParams::default()
            },
        )
        .await
    }

    async fn ping(&self) -> Result<Value, ExchangeError> {
        self.get(Operation::Time, RequestParams::default()).await
    }
}
