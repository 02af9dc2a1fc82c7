//! Exchange Connectivity
//!
//! REST adapter implementing the exchange port for the supported venues.
//! Responses are returned as raw venue JSON.

mod client;
mod connector;
mod venues;

pub use client::RestExchangeClient;
pub use connector::RestConnector;
pub use venues::{Operation, RequestParams, Venue, VenueRequest};

/// Identifiers of the venues the REST adapter serves.
pub const SUPPORTED_EXCHANGES: &[&str] = &["binance", "bybit", "okx"];
