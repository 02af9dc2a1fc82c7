//! Resilience patterns for outbound exchange calls.
//!
//! This module provides the per-target rate limiter that gates every
//! call into an exchange client.

mod rate_limiter;

pub use rate_limiter::{
    InvalidBudget, RateLimitBudget, RateLimitError, RateLimitStatus, RateLimiter, RateLimiterConfig,
};
