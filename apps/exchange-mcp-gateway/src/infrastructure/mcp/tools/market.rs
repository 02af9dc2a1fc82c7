//! Public market-data tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolRegistry, decode, market_type, required};
use crate::domain::settings::MarketType;
use crate::error::GatewayError;

const DEFAULT_TIMEFRAME: &str = "1h";
const MAX_LIMIT: u32 = 1000;

pub(super) fn register(registry: &mut ToolRegistry) {
    registry.register(Arc::new(ListExchanges));
    registry.register(Arc::new(GetExchangeInfo));
    registry.register(Arc::new(GetMarketTypes));
    registry.register(Arc::new(GetTicker));
    registry.register(Arc::new(GetOrderBook));
    registry.register(Arc::new(GetOhlcv));
    registry.register(Arc::new(GetTrades));
}

fn exchange_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "exchange": {"type": "string", "description": "Exchange identifier, e.g. binance"}
        },
        "required": ["exchange"]
    })
}

fn symbol_schema(extra: &Value) -> Value {
    let mut properties = json!({
        "exchange": {"type": "string", "description": "Exchange identifier, e.g. binance"},
        "symbol": {
            "type": "string",
            "description": "Unified symbol, e.g. BTC/USDT or BTC/USDT:USDT"
        },
        "marketType": {
            "type": "string",
            "enum": ["spot", "margin", "future", "swap", "option"],
            "description": "Market segment; defaults to the configured market type"
        }
    });
    if let (Some(base), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        base.extend(extra.clone());
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": ["exchange", "symbol"]
    })
}

fn limit_schema(description: &str) -> Value {
    json!({"type": "integer", "minimum": 1, "maximum": MAX_LIMIT, "description": description})
}

fn limit(raw: Option<u32>) -> Result<Option<u32>, GatewayError> {
    match raw {
        Some(0) => Err(GatewayError::invalid_arguments("limit must be positive")),
        Some(n) if n > MAX_LIMIT => Err(GatewayError::invalid_arguments(format!(
            "limit must be at most {MAX_LIMIT}"
        ))),
        other => Ok(other),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeArgs {
    exchange: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolArgs {
    exchange: String,
    symbol: String,
    market_type: Option<String>,
    limit: Option<u32>,
    timeframe: Option<String>,
}

/// Validated market-data call target.
struct Target<'a> {
    exchange: &'a str,
    symbol: &'a str,
}

impl SymbolArgs {
    fn target(&self) -> Result<Target<'_>, GatewayError> {
        Ok(Target {
            exchange: required("exchange", &self.exchange)?,
            symbol: required("symbol", &self.symbol)?,
        })
    }
}

fn envelope(
    ctx: &ToolContext,
    target: &Target<'_>,
    market: Option<MarketType>,
    data: Value,
) -> Value {
    let market = market.unwrap_or_else(|| ctx.config.view().default_market_type);
    json!({
        "exchange": target.exchange.to_lowercase(),
        "symbol": target.symbol,
        "marketType": market,
        "data": data,
    })
}

// =============================================================================
// Exchange Metadata
// =============================================================================

struct ListExchanges;

#[async_trait]
impl Tool for ListExchanges {
    fn name(&self) -> &'static str {
        "list-exchanges"
    }

    fn description(&self) -> &'static str {
        "List the exchanges this gateway can connect to"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, ctx: &ToolContext, _args: Value) -> Result<Value, GatewayError> {
        let ids: Vec<String> = ctx.exchange.exchanges().into_iter().map(|d| d.id).collect();
        Ok(json!(ids))
    }
}

struct GetExchangeInfo;

#[async_trait]
impl Tool for GetExchangeInfo {
    fn name(&self) -> &'static str {
        "get-exchange-info"
    }

    fn description(&self) -> &'static str {
        "Describe an exchange: market types, timeframes, credential status"
    }

    fn input_schema(&self) -> Value {
        exchange_schema()
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, GatewayError> {
        let args: ExchangeArgs = decode(args)?;
        let descriptor = ctx.exchange.describe(required("exchange", &args.exchange)?)?;
        let default_market_type = ctx.config.view().default_market_type;
        let fingerprint = ctx.exchange.fingerprint(&descriptor.id, default_market_type);

        Ok(json!({
            "id": descriptor.id,
            "name": descriptor.name,
            "marketTypes": descriptor.market_types,
            "timeframes": descriptor.timeframes,
            "credentialsConfigured": ctx.exchange.has_credentials(&descriptor.id),
            "clientKey": fingerprint.key(),
        }))
    }
}

struct GetMarketTypes;

#[async_trait]
impl Tool for GetMarketTypes {
    fn name(&self) -> &'static str {
        "get-market-types"
    }

    fn description(&self) -> &'static str {
        "List the market segments an exchange supports"
    }

    fn input_schema(&self) -> Value {
        exchange_schema()
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, GatewayError> {
        let args: ExchangeArgs = decode(args)?;
        let descriptor = ctx.exchange.describe(required("exchange", &args.exchange)?)?;

        Ok(json!({
            "exchange": descriptor.id,
            "marketTypes": descriptor.market_types,
            "defaultMarketType": ctx.config.view().default_market_type,
        }))
    }
}

// =============================================================================
// Market Data
// =============================================================================

struct GetTicker;

#[async_trait]
impl Tool for GetTicker {
    fn name(&self) -> &'static str {
        "get-ticker"
    }

    fn description(&self) -> &'static str {
        "Get the 24h ticker for a symbol"
    }

    fn input_schema(&self) -> Value {
        symbol_schema(&json!({}))
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, GatewayError> {
        let args: SymbolArgs = decode(args)?;
        let target = args.target()?;
        let market = market_type(args.market_type.as_deref())?;

        let data = ctx
            .exchange
            .ticker(target.exchange, market, target.symbol)
            .await?;
        Ok(envelope(ctx, &target, market, data))
    }
}

struct GetOrderBook;

#[async_trait]
impl Tool for GetOrderBook {
    fn name(&self) -> &'static str {
        "get-orderbook"
    }

    fn description(&self) -> &'static str {
        "Get an order book snapshot for a symbol"
    }

    fn input_schema(&self) -> Value {
        symbol_schema(&json!({
            "limit": limit_schema("Depth levels")
        }))
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, GatewayError> {
        let args: SymbolArgs = decode(args)?;
        let target = args.target()?;
        let market = market_type(args.market_type.as_deref())?;
        let depth = limit(args.limit)?;

        let data = ctx
            .exchange
            .order_book(target.exchange, market, target.symbol, depth)
            .await?;
        Ok(envelope(ctx, &target, market, data))
    }
}

struct GetOhlcv;

#[async_trait]
impl Tool for GetOhlcv {
    fn name(&self) -> &'static str {
        "get-ohlcv"
    }

    fn description(&self) -> &'static str {
        "Get OHLCV candles for a symbol"
    }

    fn input_schema(&self) -> Value {
        symbol_schema(&json!({
            "timeframe": {
                "type": "string",
                "default": DEFAULT_TIMEFRAME,
                "description": "Candle interval, e.g. 1m, 5m, 1h, 1d"
            },
            "limit": limit_schema("Number of candles")
        }))
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, GatewayError> {
        let args: SymbolArgs = decode(args)?;
        let target = args.target()?;
        let market = market_type(args.market_type.as_deref())?;
        let count = limit(args.limit)?;
        let timeframe = args.timeframe.as_deref().unwrap_or(DEFAULT_TIMEFRAME);

        let data = ctx
            .exchange
            .ohlcv(target.exchange, market, target.symbol, timeframe, count)
            .await?;
        let mut result = envelope(ctx, &target, market, data);
        result["timeframe"] = json!(timeframe);
        Ok(result)
    }
}

struct GetTrades;

#[async_trait]
impl Tool for GetTrades {
    fn name(&self) -> &'static str {
        "get-trades"
    }

    fn description(&self) -> &'static str {
        "Get recent public trades for a symbol"
    }

    fn input_schema(&self) -> Value {
        symbol_schema(&json!({
            "limit": limit_schema("Number of trades")
        }))
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, GatewayError> {
        let args: SymbolArgs = decode(args)?;
        let target = args.target()?;
        let market = market_type(args.market_type.as_deref())?;
        let count = limit(args.limit)?;

        let data = ctx
            .exchange
            .trades(target.exchange, market, target.symbol, count)
            .await?;
        Ok(envelope(ctx, &target, market, data))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::infrastructure::mcp::tools::testing::context;

    #[tokio::test]
    async fn list_exchanges_returns_ids() {
        let (ctx, _) = context();
        let result = ListExchanges.call(&ctx, Value::Null).await.unwrap();
        assert_eq!(result, json!(["binance", "okx"]));
    }

    #[tokio::test]
    async fn exchange_info_reports_client_key() {
        let (ctx, _) = context();
        let result = GetExchangeInfo
            .call(&ctx, json!({"exchange": "Binance"}))
            .await
            .unwrap();

        assert_eq!(result["id"], "binance");
        assert_eq!(result["clientKey"], "binance:spot:direct:public");
        assert_eq!(result["credentialsConfigured"], false);
    }

    #[tokio::test]
    async fn market_types_include_default() {
        let (ctx, _) = context();
        let result = GetMarketTypes
            .call(&ctx, json!({"exchange": "okx"}))
            .await
            .unwrap();

        assert_eq!(result["marketTypes"], json!(["spot", "swap", "future", "option"]));
        assert_eq!(result["defaultMarketType"], "spot");
    }

    #[tokio::test]
    async fn ticker_wraps_venue_payload() {
        let (ctx, constructions) = context();
        let result = GetTicker
            .call(
                &ctx,
                json!({"exchange": "binance", "symbol": "BTC/USDT", "marketType": "future"}),
            )
            .await
            .unwrap();

        assert_eq!(result["marketType"], "future");
        assert_eq!(result["data"]["symbol"], "BTC/USDT");
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ohlcv_defaults_timeframe() {
        let (ctx, _) = context();
        let result = GetOhlcv
            .call(&ctx, json!({"exchange": "okx", "symbol": "ETH/USDT"}))
            .await
            .unwrap();

        assert_eq!(result["timeframe"], "1h");
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_the_cache() {
        let cases = [
            json!({"symbol": "BTC/USDT"}),
            json!({"exchange": "binance", "symbol": ""}),
            json!({"exchange": "binance", "symbol": "BTC/USDT", "marketType": "perp"}),
            json!({"exchange": "binance", "symbol": "BTC/USDT", "limit": 0}),
            json!({"exchange": "binance", "symbol": "BTC/USDT", "limit": -5}),
            json!({"exchange": "kraken", "symbol": "BTC/USDT"}),
            json!({"exchange": "binance", "symbol": "BTC/USDT", "marketType": "option"}),
        ];

        let (ctx, constructions) = context();
        for args in cases {
            let err = GetOrderBook.call(&ctx, args.clone()).await.unwrap_err();
            assert_eq!(err.code().reason(), "INVALID_ARGUMENTS", "{args}");
        }
        assert_eq!(constructions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upstream_failure_propagates() {
        let (ctx, _) = context();
        let err = GetTrades
            .call(&ctx, json!({"exchange": "binance", "symbol": "BTC/USDT"}))
            .await
            .unwrap_err();

        assert_eq!(err.code().reason(), "UPSTREAM_ERROR");
    }
}
