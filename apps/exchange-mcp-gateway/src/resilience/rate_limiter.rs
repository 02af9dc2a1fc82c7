//! Per-target fixed-window rate limiter.
//!
//! Throttles outbound calls so that no upstream exchange receives more than
//! its request budget within one window.
//!
//! # Model
//!
//! ```text
//! window opens on first call ─► permits = max_requests
//! each call                   ─► permits -= 1
//! permits == 0                ─► wait (or fail fast) until window end
//! window end                  ─► new window, permits refilled
//! ```
//!
//! Buckets are created lazily on the first call to a target and live for
//! the process lifetime. Target names are case-insensitive.
//!
//! # Example
//!
//! ```rust,ignore
//! let limiter = RateLimiter::new(RateLimiterConfig::default());
//!
//! limiter.acquire_within("binance", Duration::from_secs(5)).await?;
//! client.fetch_ticker("BTC/USDT").await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

// =============================================================================
// Configuration
// =============================================================================

/// Request budget for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitBudget {
    /// Permits per window.
    pub max_requests: u32,
    /// Window length.
    pub window: Duration,
}

impl RateLimitBudget {
    /// Create a budget.
    #[must_use]
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// Create a budget that can actually grant permits.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBudget` if `max_requests` or `window` is zero. A zero
    /// window refills on every call and a zero budget never grants.
    pub fn try_new(max_requests: u32, window: Duration) -> Result<Self, InvalidBudget> {
        if max_requests == 0 || window.is_zero() {
            return Err(InvalidBudget {
                max_requests,
                window,
            });
        }
        Ok(Self::new(max_requests, window))
    }

    /// Binance request weight budget.
    #[must_use]
    pub const fn binance() -> Self {
        Self::new(1200, Duration::from_secs(60))
    }

    /// Bybit public endpoint budget.
    #[must_use]
    pub const fn bybit() -> Self {
        Self::new(600, Duration::from_secs(5))
    }

    /// OKX public market data budget.
    #[must_use]
    pub const fn okx() -> Self {
        Self::new(20, Duration::from_secs(2))
    }
}

impl Default for RateLimitBudget {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(1))
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Budget for targets without an override.
    pub default_budget: RateLimitBudget,
    /// Per-target budgets, keyed by lowercase target name.
    pub overrides: HashMap<String, RateLimitBudget>,
    /// Longest a gated call waits for a permit before failing fast.
    pub max_wait: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        let overrides = [
            ("binance", RateLimitBudget::binance()),
            ("bybit", RateLimitBudget::bybit()),
            ("okx", RateLimitBudget::okx()),
        ]
        .into_iter()
        .map(|(name, budget)| (name.to_string(), budget))
        .collect();

        Self {
            default_budget: RateLimitBudget::default(),
            overrides,
            max_wait: Duration::from_secs(5),
        }
    }
}

impl RateLimiterConfig {
    /// Set or replace the budget for one target.
    #[must_use]
    pub fn with_budget(mut self, target: &str, budget: RateLimitBudget) -> Self {
        self.overrides.insert(target.to_lowercase(), budget);
        self
    }

    /// Budget that applies to a target.
    #[must_use]
    pub fn budget_for(&self, target: &str) -> RateLimitBudget {
        self.overrides
            .get(&target.to_lowercase())
            .copied()
            .unwrap_or(self.default_budget)
    }
}

// =============================================================================
// Bucket
// =============================================================================

#[derive(Debug)]
struct Bucket {
    budget: RateLimitBudget,
    remaining: u32,
    window_start: Instant,
}

impl Bucket {
    fn new(budget: RateLimitBudget, now: Instant) -> Self {
        Self {
            budget,
            remaining: budget.max_requests,
            window_start: now,
        }
    }

    fn reset_at(&self) -> Instant {
        self.window_start + self.budget.window
    }

    fn roll(&mut self, now: Instant) {
        if now >= self.reset_at() {
            self.window_start = now;
            self.remaining = self.budget.max_requests;
        }
    }
}

/// Point-in-time state of one target's bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    /// Target name.
    pub target: String,
    /// Budget in force.
    pub max_requests: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Permits left in the current window.
    pub remaining: u32,
    /// Milliseconds until the window resets; zero if it already has.
    pub resets_in_ms: u64,
}

// =============================================================================
// Rate Limiter
// =============================================================================

/// Per-target fixed-window throttle.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
    granted: AtomicU64,
    denied: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
            granted: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Default wait bound for gated calls.
    #[must_use]
    pub const fn max_wait(&self) -> Duration {
        self.config.max_wait
    }

    /// Take a permit without waiting.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` with the time until the window resets if the
    /// target's budget is exhausted.
    pub fn try_acquire(&self, target: &str) -> Result<(), RateLimitError> {
        let key = target.to_lowercase();
        let now = Instant::now();

        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(key.clone())
            .or_insert_with(|| Bucket::new(self.config.budget_for(&key), now));
        bucket.roll(now);

        if bucket.remaining > 0 {
            bucket.remaining -= 1;
            self.granted.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
            Err(RateLimitError::RateLimited {
                target: key,
                retry_after: bucket.reset_at().saturating_duration_since(now),
            })
        }
    }

    /// Take a permit, waiting for the next window if necessary.
    ///
    /// Returns how long the call waited.
    pub async fn acquire(&self, target: &str) -> Duration {
        let started = Instant::now();
        loop {
            match self.try_acquire(target) {
                Ok(()) => return started.elapsed(),
                Err(RateLimitError::RateLimited { retry_after, .. }) => {
                    tokio::time::sleep(retry_after.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Take a permit, waiting at most `max_wait` for it.
    ///
    /// Returns how long the call waited.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` immediately if the window will not reset
    /// within the remaining wait bound. Nothing is waited for in that case.
    pub async fn acquire_within(
        &self,
        target: &str,
        max_wait: Duration,
    ) -> Result<Duration, RateLimitError> {
        let started = Instant::now();
        let deadline = started + max_wait;
        loop {
            match self.try_acquire(target) {
                Ok(()) => return Ok(started.elapsed()),
                Err(err @ RateLimitError::RateLimited { retry_after, .. }) => {
                    let wake = Instant::now() + retry_after;
                    if wake > deadline {
                        let retry_after_ms =
                            u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
                        tracing::debug!(
                            upstream = %target,
                            retry_after_ms,
                            "Rate limit exhausted beyond wait bound"
                        );
                        return Err(err);
                    }
                    tokio::time::sleep(retry_after.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Permits granted since startup.
    #[must_use]
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    /// Attempts refused since startup, including retried waits.
    #[must_use]
    pub fn denied(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }

    /// Current state of every configured or touched target, sorted by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RateLimitStatus> {
        let now = Instant::now();
        let buckets = self.buckets.lock();

        let mut targets: Vec<&String> = buckets
            .keys()
            .chain(self.config.overrides.keys())
            .collect();
        targets.sort();
        targets.dedup();

        targets
            .into_iter()
            .map(|target| {
                let budget = self.config.budget_for(target);
                let (remaining, resets_in) = match buckets.get(target) {
                    Some(bucket) if now < bucket.reset_at() => (
                        bucket.remaining,
                        bucket.reset_at().saturating_duration_since(now),
                    ),
                    _ => (budget.max_requests, Duration::ZERO),
                };
                RateLimitStatus {
                    target: target.clone(),
                    max_requests: budget.max_requests,
                    window_ms: duration_ms(budget.window),
                    remaining,
                    resets_in_ms: duration_ms(resets_in),
                }
            })
            .collect()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// Errors
// =============================================================================

/// Rate limiting failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// The target's budget is exhausted for the current window.
    #[error("rate limited on {target}, retry after {retry_after:?}")]
    RateLimited {
        /// Target name.
        target: String,
        /// Time until the window resets.
        retry_after: Duration,
    },
}

/// Budget that would disable or deadlock the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("budget needs requests > 0 and a window > 0, got {max_requests} per {window:?}")]
pub struct InvalidBudget {
    /// Requested permits per window.
    pub max_requests: u32,
    /// Requested window length.
    pub window: Duration,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_ms: u64) -> RateLimiter {
        let budget = RateLimitBudget::new(max_requests, Duration::from_millis(window_ms));
        RateLimiter::new(RateLimiterConfig::default().with_budget("venue", budget))
    }

    #[test]
    fn zero_budgets_are_rejected() {
        assert!(RateLimitBudget::try_new(0, Duration::from_secs(1)).is_err());
        assert!(RateLimitBudget::try_new(2, Duration::ZERO).is_err());
        assert_eq!(
            RateLimitBudget::try_new(2, Duration::from_secs(1)).unwrap(),
            RateLimitBudget::new(2, Duration::from_secs(1))
        );
    }

    #[test]
    fn default_budgets() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.budget_for("Binance"), RateLimitBudget::binance());
        assert_eq!(config.budget_for("bybit").max_requests, 600);
        assert_eq!(config.budget_for("okx").window, Duration::from_secs(2));
        assert_eq!(config.budget_for("kraken"), RateLimitBudget::default());
    }

    #[tokio::test(start_paused = true)]
    async fn budget_plus_one_is_denied() {
        let limiter = limiter(3, 1000);

        for _ in 0..3 {
            assert!(limiter.try_acquire("venue").is_ok());
        }

        let err = limiter.try_acquire("venue").unwrap_err();
        let RateLimitError::RateLimited {
            target,
            retry_after,
        } = err;
        assert_eq!(target, "venue");
        assert_eq!(retry_after, Duration::from_secs(1));
        assert_eq!(limiter.granted(), 3);
        assert_eq!(limiter.denied(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn window_rollover_refills_permits() {
        let limiter = limiter(2, 500);
        limiter.try_acquire("venue").unwrap();
        limiter.try_acquire("venue").unwrap();
        assert!(limiter.try_acquire("venue").is_err());

        tokio::time::advance(Duration::from_millis(500)).await;

        assert!(limiter.try_acquire("venue").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_next_window() {
        let limiter = limiter(1, 2000);
        limiter.acquire("venue").await;

        let waited = limiter.acquire("venue").await;

        assert_eq!(waited, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_within_fails_fast_beyond_bound() {
        let limiter = limiter(1, 10_000);
        limiter.try_acquire("venue").unwrap();
        let before = Instant::now();

        let err = limiter
            .acquire_within("venue", Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, RateLimitError::RateLimited { .. }));
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_within_waits_inside_bound() {
        let limiter = limiter(1, 300);
        limiter.try_acquire("venue").unwrap();

        let waited = limiter
            .acquire_within("venue", Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(waited, Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn targets_are_independent() {
        let limiter = limiter(1, 1000);
        limiter.try_acquire("venue").unwrap();

        assert!(limiter.try_acquire("venue").is_err());
        assert!(limiter.try_acquire("other").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn target_names_are_case_insensitive() {
        let limiter = limiter(1, 1000);
        limiter.try_acquire("VENUE").unwrap();
        assert!(limiter.try_acquire("venue").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reports_remaining() {
        let limiter = limiter(5, 1000);
        limiter.try_acquire("venue").unwrap();
        limiter.try_acquire("venue").unwrap();

        let snapshot = limiter.snapshot();
        let venue = snapshot.iter().find(|s| s.target == "venue").unwrap();
        assert_eq!(venue.remaining, 3);
        assert_eq!(venue.resets_in_ms, 1000);

        let binance = snapshot.iter().find(|s| s.target == "binance").unwrap();
        assert_eq!(binance.remaining, 1200);

        tokio::time::advance(Duration::from_secs(1)).await;
        let venue = limiter
            .snapshot()
            .into_iter()
            .find(|s| s.target == "venue")
            .unwrap();
        assert_eq!(venue.remaining, 5);
    }
}
