//! Cache, rate-limit and configuration tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolRegistry, decode, default_true};
use crate::error::GatewayError;

pub(super) fn register(registry: &mut ToolRegistry) {
    registry.register(Arc::new(CacheStatsTool));
    registry.register(Arc::new(ClearCache));
    registry.register(Arc::new(RateLimitStatusTool));
    registry.register(Arc::new(GetProxyConfig));
    registry.register(Arc::new(SetProxyConfig));
    registry.register(Arc::new(SetMarketType));
    registry.register(Arc::new(SetLogLevel));
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn invalidate_schema() -> Value {
    json!({
        "type": "boolean",
        "default": true,
        "description": "Clear cached exchange clients after the change"
    })
}

// =============================================================================
// Client Cache
// =============================================================================

struct CacheStatsTool;

#[async_trait]
impl Tool for CacheStatsTool {
    fn name(&self) -> &'static str {
        "cache-stats"
    }

    fn description(&self) -> &'static str {
        "Report cached exchange clients and cache counters"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, ctx: &ToolContext, _args: Value) -> Result<Value, GatewayError> {
        Ok(to_value(&ctx.exchange.cache_stats()))
    }
}

#[derive(Debug, Deserialize)]
struct ClearCacheArgs {
    pattern: Option<String>,
}

struct ClearCache;

#[async_trait]
impl Tool for ClearCache {
    fn name(&self) -> &'static str {
        "clear-cache"
    }

    fn description(&self) -> &'static str {
        "Evict cached exchange clients, all or those whose key matches a pattern"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": concat!(
                        "Glob (with * or ?) over the whole key, otherwise a substring; ",
                        "omit to clear everything"
                    )
                }
            }
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, GatewayError> {
        let args: ClearCacheArgs = decode(args)?;
        let cleared = ctx.exchange.clear_cache(args.pattern.as_deref())?;

        Ok(json!({
            "cleared": cleared.len(),
            "keys": cleared,
            "remaining": ctx.exchange.cache_stats().size,
        }))
    }
}

// =============================================================================
// Rate Limits
// =============================================================================

struct RateLimitStatusTool;

#[async_trait]
impl Tool for RateLimitStatusTool {
    fn name(&self) -> &'static str {
        "rate-limit-status"
    }

    fn description(&self) -> &'static str {
        "Report remaining outbound request budget per exchange"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, ctx: &ToolContext, _args: Value) -> Result<Value, GatewayError> {
        Ok(json!({ "targets": ctx.exchange.rate_limits() }))
    }
}

// =============================================================================
// Configuration
// =============================================================================

struct GetProxyConfig;

#[async_trait]
impl Tool for GetProxyConfig {
    fn name(&self) -> &'static str {
        "get-proxy-config"
    }

    fn description(&self) -> &'static str {
        "Show the effective proxy and runtime settings"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, ctx: &ToolContext, _args: Value) -> Result<Value, GatewayError> {
        Ok(to_value(&ctx.config.view()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetProxyArgs {
    enabled: bool,
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    #[serde(default = "default_true")]
    invalidate_cache: bool,
}

struct SetProxyConfig;

#[async_trait]
impl Tool for SetProxyConfig {
    fn name(&self) -> &'static str {
        "set-proxy-config"
    }

    fn description(&self) -> &'static str {
        "Replace the outbound proxy settings"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "enabled": {"type": "boolean"},
                "url": {"type": "string", "description": "http, https, socks5 or socks5h URL"},
                "username": {"type": "string"},
                "password": {"type": "string"},
                "invalidateCache": invalidate_schema()
            },
            "required": ["enabled"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, GatewayError> {
        let args: SetProxyArgs = decode(args)?;
        let update = ctx.config.set_proxy(
            args.enabled,
            args.url,
            args.username,
            args.password,
            args.invalidate_cache,
        )?;
        Ok(to_value(&update))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetMarketTypeArgs {
    market_type: String,
    #[serde(default = "default_true")]
    invalidate_cache: bool,
}

struct SetMarketType;

#[async_trait]
impl Tool for SetMarketType {
    fn name(&self) -> &'static str {
        "set-market-type"
    }

    fn description(&self) -> &'static str {
        "Set the market type used when a call does not name one"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "marketType": {
                    "type": "string",
                    "enum": ["spot", "margin", "future", "swap", "option"]
                },
                "invalidateCache": invalidate_schema()
            },
            "required": ["marketType"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, GatewayError> {
        let args: SetMarketTypeArgs = decode(args)?;
        let update = ctx
            .config
            .set_market_type(&args.market_type, args.invalidate_cache)?;
        Ok(to_value(&update))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetLogLevelArgs {
    level: String,
    #[serde(default = "default_true")]
    invalidate_cache: bool,
}

struct SetLogLevel;

#[async_trait]
impl Tool for SetLogLevel {
    fn name(&self) -> &'static str {
        "set-log-level"
    }

    fn description(&self) -> &'static str {
        "Change the gateway's log verbosity"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "level": {
                    "type": "string",
                    "enum": [
                        "trace", "debug", "info", "notice", "warning",
                        "error", "critical", "alert", "emergency"
                    ]
                },
                "invalidateCache": invalidate_schema()
            },
            "required": ["level"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, GatewayError> {
        let args: SetLogLevelArgs = decode(args)?;
        let update = ctx.config.set_log_level(&args.level, args.invalidate_cache)?;
        Ok(to_value(&update))
    }
}
