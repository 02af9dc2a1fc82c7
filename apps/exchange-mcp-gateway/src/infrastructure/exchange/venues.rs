//! Venue routing.
//!
//! Maps unified symbols, timeframes and market types onto each venue's
//! public REST endpoints. Payloads are never interpreted beyond detecting
//! venue-level error envelopes.

use std::fmt;

use serde_json::Value;

use crate::application::ports::{ExchangeDescriptor, ExchangeError};
use crate::domain::settings::MarketType;

/// Supported exchange venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Venue {
    /// Binance.
    Binance,
    /// Bybit.
    Bybit,
    /// OKX.
    Okx,
}

impl Venue {
    /// Get all venues.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Binance, Self::Bybit, Self::Okx]
    }

    /// Parse a venue identifier.
    #[must_use]
    pub fn parse(id: &str) -> Option<Self> {
        match id.trim().to_lowercase().as_str() {
            "binance" => Some(Self::Binance),
            "bybit" => Some(Self::Bybit),
            "okx" => Some(Self::Okx),
            _ => None,
        }
    }

    /// Identifier used in tool arguments.
    #[must_use]
    pub const fn id(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Bybit => "bybit",
            Self::Okx => "okx",
        }
    }

    /// Display name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Binance => "Binance",
            Self::Bybit => "Bybit",
            Self::Okx => "OKX",
        }
    }

    /// Market segments the venue serves.
    #[must_use]
    pub const fn market_types(&self) -> &'static [MarketType] {
        match self {
            Self::Binance => &[
                MarketType::Spot,
                MarketType::Margin,
                MarketType::Future,
                MarketType::Swap,
            ],
            Self::Bybit | Self::Okx => MarketType::all(),
        }
    }

    /// Unified timeframes accepted for candles.
    #[must_use]
    pub const fn timeframes(&self) -> &'static [&'static str] {
        &[
            "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "12h", "1d", "1w", "1M",
        ]
    }

    /// Header carrying the API key, if the venue accepts one on public calls.
    #[must_use]
    pub const fn api_key_header(&self) -> &'static str {
        match self {
            Self::Binance => "X-MBX-APIKEY",
            Self::Bybit => "X-BAPI-API-KEY",
            Self::Okx => "OK-ACCESS-KEY",
        }
    }

    /// Production base URL for a market segment.
    #[must_use]
    pub const fn default_base_url(&self, market_type: MarketType) -> &'static str {
        match (self, market_type) {
            (Self::Binance, MarketType::Future | MarketType::Swap) => "https://fapi.binance.com",
            (Self::Binance, _) => "https://api.binance.com",
            (Self::Bybit, _) => "https://api.bybit.com",
            (Self::Okx, _) => "https://www.okx.com",
        }
    }

    /// Static descriptor.
    #[must_use]
    pub fn descriptor(&self) -> ExchangeDescriptor {
        ExchangeDescriptor {
            id: self.id().to_string(),
            name: self.name().to_string(),
            market_types: self.market_types().to_vec(),
            timeframes: self.timeframes().iter().map(|t| (*t).to_string()).collect(),
        }
    }

    /// Whether the venue serves a market segment.
    #[must_use]
    pub fn supports(&self, market_type: MarketType) -> bool {
        self.market_types().contains(&market_type)
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Market data operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// 24h ticker.
    Ticker,
    /// Order book.
    OrderBook,
    /// Candles.
    Ohlcv,
    /// Recent trades.
    Trades,
    /// Server time.
    Time,
}

/// Path and query of one venue call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueRequest {
    /// Path relative to the base URL.
    pub path: &'static str,
    /// Query parameters.
    pub query: Vec<(&'static str, String)>,
}

/// Inputs to a market data call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestParams<'a> {
    /// Unified symbol.
    pub symbol: Option<&'a str>,
    /// Unified timeframe.
    pub timeframe: Option<&'a str>,
    /// Result limit.
    pub limit: Option<u32>,
}

impl Venue {
    /// Build the request for an operation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a missing or malformed symbol or an
    /// unsupported timeframe.
    pub fn request(
        &self,
        market_type: MarketType,
        operation: Operation,
        params: RequestParams<'_>,
    ) -> Result<VenueRequest, ExchangeError> {
        if operation == Operation::Time {
            return Ok(VenueRequest {
                path: self.time_path(market_type),
                query: Vec::new(),
            });
        }

        let symbol = params
            .symbol
            .ok_or_else(|| ExchangeError::InvalidRequest("symbol is required".to_string()))?;
        let mut query = self.symbol_query(market_type, symbol)?;

        if operation == Operation::Ohlcv {
            let timeframe = params.timeframe.unwrap_or("1h");
            query.push((self.interval_param(), self.interval(timeframe)?));
        }
        if let Some(limit) = params.limit {
            let key = match (self, operation) {
                (Self::Okx, Operation::OrderBook) => "sz",
                _ => "limit",
            };
            query.push((key, limit.to_string()));
        }

        Ok(VenueRequest {
            path: self.path(market_type, operation),
            query,
        })
    }

    const fn time_path(&self, market_type: MarketType) -> &'static str {
        match (self, market_type) {
            (Self::Binance, MarketType::Future | MarketType::Swap) => "/fapi/v1/time",
            (Self::Binance, _) => "/api/v3/time",
            (Self::Bybit, _) => "/v5/market/time",
            (Self::Okx, _) => "/api/v5/public/time",
        }
    }

    const fn path(&self, market_type: MarketType, operation: Operation) -> &'static str {
        let derivatives = matches!(market_type, MarketType::Future | MarketType::Swap);
        match (self, operation) {
            (Self::Binance, Operation::Ticker) if derivatives => "/fapi/v1/ticker/24hr",
            (Self::Binance, Operation::Ticker) => "/api/v3/ticker/24hr",
            (Self::Binance, Operation::OrderBook) if derivatives => "/fapi/v1/depth",
            (Self::Binance, Operation::OrderBook) => "/api/v3/depth",
            (Self::Binance, Operation::Ohlcv) if derivatives => "/fapi/v1/klines",
            (Self::Binance, Operation::Ohlcv) => "/api/v3/klines",
            (Self::Binance, Operation::Trades) if derivatives => "/fapi/v1/trades",
            (Self::Binance, Operation::Trades) => "/api/v3/trades",
            (Self::Bybit, Operation::Ticker) => "/v5/market/tickers",
            (Self::Bybit, Operation::OrderBook) => "/v5/market/orderbook",
            (Self::Bybit, Operation::Ohlcv) => "/v5/market/kline",
            (Self::Bybit, Operation::Trades) => "/v5/market/recent-trade",
            (Self::Okx, Operation::Ticker) => "/api/v5/market/ticker",
            (Self::Okx, Operation::OrderBook) => "/api/v5/market/books",
            (Self::Okx, Operation::Ohlcv) => "/api/v5/market/candles",
            (Self::Okx, Operation::Trades) => "/api/v5/market/trades",
            (_, Operation::Time) => self.time_path(market_type),
        }
    }

    fn symbol_query(
        &self,
        market_type: MarketType,
        symbol: &str,
    ) -> Result<Vec<(&'static str, String)>, ExchangeError> {
        let (base, quote) = split_symbol(symbol)?;
        Ok(match self {
            Self::Binance => vec![("symbol", format!("{base}{quote}"))],
            Self::Bybit => {
                let category = match market_type {
                    MarketType::Spot | MarketType::Margin => "spot",
                    MarketType::Future | MarketType::Swap => "linear",
                    MarketType::Option => "option",
                };
                let venue_symbol = if market_type == MarketType::Option {
                    symbol.trim().to_uppercase()
                } else {
                    format!("{base}{quote}")
                };
                vec![("category", category.to_string()), ("symbol", venue_symbol)]
            }
            Self::Okx => {
                let inst_id = match market_type {
                    MarketType::Spot | MarketType::Margin => format!("{base}-{quote}"),
                    MarketType::Swap => format!("{base}-{quote}-SWAP"),
                    MarketType::Future | MarketType::Option => symbol.trim().to_uppercase(),
                };
                vec![("instId", inst_id)]
            }
        })
    }

    const fn interval_param(&self) -> &'static str {
        match self {
            Self::Binance | Self::Bybit => "interval",
            Self::Okx => "bar",
        }
    }

    fn interval(&self, timeframe: &str) -> Result<String, ExchangeError> {
        if !self.timeframes().contains(&timeframe) {
            return Err(ExchangeError::InvalidRequest(format!(
                "unsupported timeframe {timeframe} for {self}"
            )));
        }
        Ok(match self {
            Self::Binance => timeframe.to_string(),
            Self::Bybit => match timeframe {
                "1d" => "D".to_string(),
                "1w" => "W".to_string(),
                "1M" => "M".to_string(),
                minutes if minutes.ends_with('m') => minutes.trim_end_matches('m').to_string(),
                hours => {
                    let count: u32 = hours.trim_end_matches('h').parse().unwrap_or(1);
                    (count * 60).to_string()
                }
            },
            Self::Okx => match timeframe {
                "1M" => "1M".to_string(),
                other if other.ends_with('m') => other.to_string(),
                other => other.to_uppercase(),
            },
        })
    }

    /// Detect a venue-level error in a successful HTTP response.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` with the venue's code and message.
    pub fn check_envelope(&self, body: &Value) -> Result<(), ExchangeError> {
        let rejected = |code: String, message: Option<&Value>| ExchangeError::Rejected {
            code,
            message: message
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };

        match self {
            Self::Binance => match body.get("code").and_then(Value::as_i64) {
                Some(code) if code < 0 => Err(rejected(code.to_string(), body.get("msg"))),
                _ => Ok(()),
            },
            Self::Bybit => match body.get("retCode").and_then(Value::as_i64) {
                Some(code) if code != 0 => Err(rejected(code.to_string(), body.get("retMsg"))),
                _ => Ok(()),
            },
            Self::Okx => match body.get("code").and_then(Value::as_str) {
                Some(code) if code != "0" => Err(rejected(code.to_string(), body.get("msg"))),
                _ => Ok(()),
            },
        }
    }
}

/// Split a unified symbol such as `BTC/USDT` or `BTC/USDT:USDT`.
fn split_symbol(symbol: &str) -> Result<(String, String), ExchangeError> {
    let unified = symbol.trim().split(':').next().unwrap_or_default();
    let parts = unified
        .split_once('/')
        .or_else(|| unified.split_once('-'))
        .filter(|(base, quote)| !base.is_empty() && !quote.is_empty());

    match parts {
        Some((base, quote)) => Ok((base.to_uppercase(), quote.to_uppercase())),
        None => Err(ExchangeError::InvalidRequest(format!(
            "symbol {symbol:?} must look like BASE/QUOTE"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn params(symbol: &str) -> RequestParams<'_> {
        RequestParams {
            symbol: Some(symbol),
            ..RequestParams::default()
        }
    }

    #[test]
    fn binance_spot_and_futures_paths() {
        let spot = Venue::Binance
            .request(MarketType::Spot, Operation::Ticker, params("BTC/USDT"))
            .unwrap();
        assert_eq!(spot.path, "/api/v3/ticker/24hr");
        assert_eq!(spot.query, vec![("symbol", "BTCUSDT".to_string())]);

        let future = Venue::Binance
            .request(MarketType::Future, Operation::Ticker, params("BTC/USDT:USDT"))
            .unwrap();
        assert_eq!(future.path, "/fapi/v1/ticker/24hr");
        assert_eq!(
            Venue::Binance.default_base_url(MarketType::Future),
            "https://fapi.binance.com"
        );
    }

    #[test]
    fn bybit_categories() {
        let request = Venue::Bybit
            .request(MarketType::Swap, Operation::OrderBook, RequestParams {
                symbol: Some("eth/usdt"),
                limit: Some(50),
                ..RequestParams::default()
            })
            .unwrap();
        assert_eq!(request.path, "/v5/market/orderbook");
        assert_eq!(
            request.query,
            vec![
                ("category", "linear".to_string()),
                ("symbol", "ETHUSDT".to_string()),
                ("limit", "50".to_string()),
            ]
        );
    }

    #[test]
    fn okx_instrument_ids() {
        let swap = Venue::Okx
            .request(MarketType::Swap, Operation::OrderBook, RequestParams {
                symbol: Some("BTC/USDT"),
                limit: Some(5),
                ..RequestParams::default()
            })
            .unwrap();
        assert_eq!(
            swap.query,
            vec![
                ("instId", "BTC-USDT-SWAP".to_string()),
                ("sz", "5".to_string())
            ]
        );
    }

    #[test_case(Venue::Binance, "4h", "4h")]
    #[test_case(Venue::Bybit, "1h", "60")]
    #[test_case(Venue::Bybit, "15m", "15")]
    #[test_case(Venue::Bybit, "1d", "D")]
    #[test_case(Venue::Okx, "4h", "4H")]
    #[test_case(Venue::Okx, "5m", "5m")]
    fn timeframe_mapping(venue: Venue, timeframe: &str, expected: &str) {
        assert_eq!(venue.interval(timeframe).unwrap(), expected);
    }

    #[test]
    fn unsupported_timeframe_rejected() {
        let err = Venue::Okx
            .request(MarketType::Spot, Operation::Ohlcv, RequestParams {
                symbol: Some("BTC/USDT"),
                timeframe: Some("7m"),
                limit: None,
            })
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidRequest(_)));
    }

    #[test_case("BTCUSDT" ; "no separator")]
    #[test_case("/USDT" ; "empty base")]
    fn malformed_symbols(symbol: &str) {
        assert!(split_symbol(symbol).is_err());
    }

    #[test]
    fn error_envelopes() {
        assert!(Venue::Bybit
            .check_envelope(&json!({"retCode": 10001, "retMsg": "params error"}))
            .is_err());
        assert!(Venue::Bybit.check_envelope(&json!({"retCode": 0})).is_ok());
        assert!(Venue::Okx
            .check_envelope(&json!({"code": "51001", "msg": "Instrument ID does not exist"}))
            .is_err());
        assert!(Venue::Okx.check_envelope(&json!({"code": "0", "data": []})).is_ok());
        assert!(Venue::Binance
            .check_envelope(&json!({"code": -1121, "msg": "Invalid symbol."}))
            .is_err());
        assert!(Venue::Binance.check_envelope(&json!([[1, "2"]])).is_ok());
    }

    #[test]
    fn binance_has_no_options() {
        assert!(!Venue::Binance.supports(MarketType::Option));
        assert!(Venue::Okx.supports(MarketType::Option));
        assert_eq!(Venue::all().len(), 3);
    }
}
