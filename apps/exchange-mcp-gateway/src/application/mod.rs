//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (exchange connectivity, logging).
pub mod ports;

/// Application services for client caching, exchange calls and configuration.
pub mod services;
