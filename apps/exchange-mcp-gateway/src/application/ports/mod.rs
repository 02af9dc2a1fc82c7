//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ExchangeConnector` / `ExchangeClient`: exchange connectivity
//! - `LogLevelControl`: live log verbosity

mod exchange_port;
mod log_level_port;

pub use exchange_port::{
    ApiCredentials, ClientOptions, ExchangeClient, ExchangeConnector, ExchangeDescriptor,
    ExchangeError, ProxyOptions,
};
pub use log_level_port::{LogLevelControl, NoOpLogLevelControl};
