//! Configuration Module
//!
//! Environment configuration for the gateway service.

mod settings;

pub use settings::{ConfigError, ExchangeSettings, GatewayConfig, ServerSettings};
