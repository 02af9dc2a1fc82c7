//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ClientCache`: Single-flight cache of constructed exchange clients
//! - `ExchangeService`: Cached, rate-limited calls into exchange clients
//! - `ConfigService`: Settings mutations with atomic cache invalidation

mod client_cache;
mod config_service;
mod exchange_service;

pub use client_cache::{CacheEntryInfo, CacheError, CacheStats, ClientCache};
pub use config_service::{ConfigService, ConfigUpdate};
pub use exchange_service::{ExchangeClientCache, ExchangeService};
