//! Per-client-IP rate limiting.
//!
//! Fixed-window counting with two thresholds: above `max_requests` the
//! request is still permitted but flagged (soft limit); above `burst_limit`
//! the client IP flips into a blocked window of `block` duration and every
//! request inside it is rejected. Buckets untouched for five windows and not
//! currently blocked are garbage-collected by a background sweeper.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Verdict for a single request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Over `max_requests` but within `burst_limit`: permit and log.
    SoftLimited,
    /// Inside a block window: reject with 429.
    Blocked,
}

struct Bucket {
    last_request: DateTime<Utc>,
    count: u64,
    blocked_until: Option<DateTime<Utc>>,
}

/// Token policy for one limiter instance.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitPolicy {
    pub max_requests: u64,
    pub window_seconds: u64,
    /// Hard ceiling; must exceed `max_requests` to leave a soft band.
    pub burst_limit: u64,
    pub block_minutes: u64,
}

impl RateLimitPolicy {
    /// Seconds a blocked client should wait, as advertised in `Retry-After`.
    pub fn retry_after_seconds(&self) -> u64 {
        self.block_minutes * 60
    }
}

/// Fixed-window limiter keyed by client IP. One lock-sharded map; every
/// per-request operation is O(1).
pub struct IpRateLimiter {
    buckets: DashMap<IpAddr, Bucket>,
    policy: RateLimitPolicy,
}

impl IpRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            buckets: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Record one request from `ip` and decide its fate.
    pub fn check(&self, ip: IpAddr) -> Decision {
        self.check_at(ip, Utc::now())
    }

    /// Clock-injected variant of [`check`](Self::check).
    pub fn check_at(&self, ip: IpAddr, now: DateTime<Utc>) -> Decision {
        let window = Duration::seconds(self.policy.window_seconds as i64);
        let block = Duration::minutes(self.policy.block_minutes as i64);

        let mut entry = self.buckets.entry(ip).or_insert_with(|| Bucket {
            last_request: now,
            count: 0,
            blocked_until: None,
        });
        let bucket = entry.value_mut();

        if let Some(blocked_until) = bucket.blocked_until {
            if now < blocked_until {
                return Decision::Blocked;
            }
        }

        if now - bucket.last_request > window {
            bucket.count = 1;
        } else {
            bucket.count += 1;
        }

        if bucket.count > self.policy.burst_limit {
            bucket.blocked_until = Some(now + block);
            return Decision::Blocked;
        }

        bucket.last_request = now;
        if bucket.count > self.policy.max_requests {
            Decision::SoftLimited
        } else {
            Decision::Allowed
        }
    }

    /// Drop buckets idle for more than five windows and not currently blocked.
    pub fn purge_stale(&self) {
        self.purge_stale_at(Utc::now());
    }

    pub fn purge_stale_at(&self, now: DateTime<Utc>) {
        let horizon = Duration::seconds((self.policy.window_seconds * 5) as i64);
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            let blocked = bucket.blocked_until.is_some_and(|until| now < until);
            blocked || now - bucket.last_request <= horizon
        });
        let dropped = before - self.buckets.len();
        if dropped > 0 {
            debug!(dropped, "purged stale rate-limit buckets");
        }
    }

    /// Number of tracked client IPs.
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

/// Run the periodic purge until the token is cancelled.
pub fn spawn_sweeper(
    limiter: Arc<IpRateLimiter>,
    interval: StdDuration,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => limiter.purge_stale(),
            }
        }
    })
}
