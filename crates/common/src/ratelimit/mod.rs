//! Request rate limiting
//!
//! `RateLimiter` answers `(key, window, max) -> allowed`. Two backends:
//! - `RedisRateLimiter`: fixed window counters (`INCR` + `EXPIRE`), shared
//!   between gateway instances
//! - `LocalRateLimiter`: in-process keyed `governor` limiters for
//!   single-instance deployments and tests

use crate::config::{RateLimitBackend, RateLimitConfig};
use crate::errors::Result;
use async_trait::async_trait;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::StateInformationMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::Quota;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{info, instrument};

/// Outcome of one rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the key may retry; zero when allowed
    pub retry_after_secs: u64,
}

impl RateDecision {
    fn allow(limit: u32, remaining: u32) -> Self {
        Self { allowed: true, limit, remaining, retry_after_secs: 0 }
    }

    fn deny(limit: u32, retry_after_secs: u64) -> Self {
        Self { allowed: false, limit, remaining: 0, retry_after_secs: retry_after_secs.max(1) }
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one hit against `key` and decide whether it is within `max` per `window`
    async fn check(&self, key: &str, window: Duration, max: u32) -> Result<RateDecision>;

    fn backend_name(&self) -> &'static str;
}

/// Fixed window limiter over Redis counters
pub struct RedisRateLimiter {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisRateLimiter {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(prefix, "Connected rate limiter to Redis");
        Ok(Self { conn, prefix: prefix.to_string() })
    }

    fn window_key(&self, key: &str, window_secs: u64, now_secs: u64) -> String {
        format!("{}:rl:{}:{}:{}", self.prefix, window_secs, key, now_secs / window_secs)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    #[instrument(skip(self), level = "trace")]
    async fn check(&self, key: &str, window: Duration, max: u32) -> Result<RateDecision> {
        let window_secs = window.as_secs().max(1);
        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let window_key = self.window_key(key, window_secs, now_secs);

        let mut conn = self.conn.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(&window_key, 1)
            .expire(&window_key, window_secs as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;

        let count = count.max(0) as u64;
        if count > u64::from(max) {
            let retry_after = window_secs - (now_secs % window_secs);
            return Ok(RateDecision::deny(max, retry_after));
        }
        Ok(RateDecision::allow(max, (u64::from(max) - count) as u32))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

type KeyedLimiter =
    governor::RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock, StateInformationMiddleware>;

/// In-process limiter; one keyed governor instance per `(window, max)` pair
#[derive(Default)]
pub struct LocalRateLimiter {
    limiters: Mutex<HashMap<(u64, u32), Arc<KeyedLimiter>>>,
}

impl LocalRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn limiter_for(&self, window: Duration, max: NonZeroU32) -> Option<Arc<KeyedLimiter>> {
        let mut limiters = self.limiters.lock().await;
        let entry = (window.as_millis() as u64, max.get());
        if let Some(limiter) = limiters.get(&entry) {
            return Some(Arc::clone(limiter));
        }

        // replenish the whole allowance over one window
        let period = window.checked_div(max.get())?;
        let quota = Quota::with_period(period)?.allow_burst(max);
        let limiter = Arc::new(governor::RateLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>());
        limiters.insert(entry, Arc::clone(&limiter));
        Some(limiter)
    }
}

#[async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn check(&self, key: &str, window: Duration, max: u32) -> Result<RateDecision> {
        let Some(max_nz) = NonZeroU32::new(max) else {
            return Ok(RateDecision::deny(0, window.as_secs()));
        };
        let Some(limiter) = self.limiter_for(window, max_nz).await else {
            // zero-length window: nothing to limit
            return Ok(RateDecision::allow(max, max));
        };

        let key = key.to_string();
        match limiter.check_key(&key) {
            Ok(snapshot) => Ok(RateDecision::allow(max, snapshot.remaining_burst_capacity())),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Ok(RateDecision::deny(max, wait.as_secs_f64().ceil() as u64))
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

/// Build the configured limiter. Falls back to the local limiter when Redis
/// is selected but no URL is configured.
pub async fn create_rate_limiter(config: &RateLimitConfig, redis_url: Option<&str>) -> Result<Arc<dyn RateLimiter>> {
    match (config.backend, redis_url) {
        (RateLimitBackend::Redis, Some(url)) => Ok(Arc::new(RedisRateLimiter::connect(url, "lexdesk").await?)),
        (RateLimitBackend::Redis, None) => {
            tracing::warn!("rate_limit.backend is redis but redis.url is unset; using the local limiter");
            Ok(Arc::new(LocalRateLimiter::new()))
        }
        (RateLimitBackend::Local, _) => Ok(Arc::new(LocalRateLimiter::new())),
    }
}
