//! MCP Tools
//!
//! Each tool is a thin shim: decode and validate arguments, call one
//! application service, return JSON. Errors surface as `isError` results.
//!
//! | Tool | Service call |
//! |------|--------------|
//! | `list-exchanges` | `ExchangeService::exchanges` |
//! | `get-exchange-info` | `ExchangeService::describe` |
//! | `get-market-types` | `ExchangeService::describe` |
//! | `get-ticker` | `ExchangeService::ticker` |
//! | `get-orderbook` | `ExchangeService::order_book` |
//! | `get-ohlcv` | `ExchangeService::ohlcv` |
//! | `get-trades` | `ExchangeService::trades` |
//! | `cache-stats` | `ExchangeService::cache_stats` |
//! | `clear-cache` | `ExchangeService::clear_cache` |
//! | `rate-limit-status` | `ExchangeService::rate_limits` |
//! | `get-proxy-config` | `ConfigService::view` |
//! | `set-proxy-config` | `ConfigService::set_proxy` |
//! | `set-market-type` | `ConfigService::set_market_type` |
//! | `set-log-level` | `ConfigService::set_log_level` |

mod admin;
mod market;
#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::protocol::ToolDescriptor;
use crate::application::services::{ConfigService, ExchangeService};
use crate::domain::settings::MarketType;
use crate::error::GatewayError;

/// Services available to tool handlers.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Exchange calls, client cache and rate limits.
    pub exchange: Arc<ExchangeService>,
    /// Runtime configuration.
    pub config: Arc<ConfigService>,
}

/// A named, schema-described remote operation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as advertised to clients.
    fn name(&self) -> &'static str;

    /// One-line description.
    fn description(&self) -> &'static str;

    /// JSON Schema of the arguments object.
    fn input_schema(&self) -> Value;

    /// Run the tool.
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, GatewayError>;

    /// Descriptor for `tools/list`.
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name(),
            description: self.description(),
            input_schema: self.input_schema(),
        }
    }
}

/// Tools by name, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<&'static str, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|tool| tool.name()))
            .finish()
    }
}

impl ToolRegistry {
    /// Registry with every gateway tool.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::default();
        market::register(&mut registry);
        admin::register(&mut registry);
        registry
    }

    /// Add a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if let Some(&slot) = self.index.get(tool.name()) {
            self.tools[slot] = tool;
        } else {
            self.index.insert(tool.name(), self.tools.len());
            self.tools.push(tool);
        }
    }

    /// Look up a tool.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&slot| Arc::clone(&self.tools[slot]))
    }

    /// Descriptors of every tool.
    #[must_use]
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|tool| tool.descriptor()).collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// =============================================================================
// Argument Helpers
// =============================================================================

/// Decode a tool's arguments object. Missing arguments decode as `{}`.
fn decode<T: DeserializeOwned>(args: Value) -> Result<T, GatewayError> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| GatewayError::invalid_arguments(e.to_string()))
}

fn market_type(raw: Option<&str>) -> Result<Option<MarketType>, GatewayError> {
    raw.map(|value| {
        value
            .parse()
            .map_err(|_| GatewayError::invalid_arguments(format!("unknown market type: {value}")))
    })
    .transpose()
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, GatewayError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(GatewayError::invalid_arguments(format!("{field} must not be empty")));
    }
    Ok(value)
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_has_every_tool() {
        let registry = ToolRegistry::standard();
        let names: Vec<_> = registry.descriptors().into_iter().map(|d| d.name).collect();

        assert_eq!(
            names,
            vec![
                "list-exchanges",
                "get-exchange-info",
                "get-market-types",
                "get-ticker",
                "get-orderbook",
                "get-ohlcv",
                "get-trades",
                "cache-stats",
                "clear-cache",
                "rate-limit-status",
                "get-proxy-config",
                "set-proxy-config",
                "set-market-type",
                "set-log-level",
            ]
        );
        assert!(registry.get("get-ticker").is_some());
        assert!(registry.get("place-order").is_none());
    }

    #[test]
    fn schemas_are_objects() {
        for descriptor in ToolRegistry::standard().descriptors() {
            assert_eq!(descriptor.input_schema["type"], "object", "{}", descriptor.name);
        }
    }

    #[test]
    fn market_type_argument() {
        assert_eq!(market_type(None).unwrap(), None);
        assert_eq!(market_type(Some("SWAP")).unwrap(), Some(MarketType::Swap));
        assert_eq!(
            market_type(Some("perp")).unwrap_err().code().reason(),
            "INVALID_ARGUMENTS"
        );
    }

    #[test]
    fn blank_required_field_rejected() {
        assert!(required("symbol", "  ").is_err());
        assert_eq!(required("symbol", " BTC/USDT ").unwrap(), "BTC/USDT");
    }
}
