//! Domain Layer - Session and settings state.
//!
//! - `session`: Live RPC sessions and their registry
//! - `settings`: Runtime settings and client fingerprints

/// Session tracking for the MCP transport.
pub mod session;

/// Runtime settings and client cache keys.
pub mod settings;
