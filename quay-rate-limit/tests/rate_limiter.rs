use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};
use quay_rate_limit::{spawn_sweeper, Decision, IpRateLimiter, RateLimitPolicy};
use tokio_util::sync::CancellationToken;

fn policy() -> RateLimitPolicy {
    RateLimitPolicy {
        max_requests: 60,
        window_seconds: 60,
        burst_limit: 90,
        block_minutes: 5,
    }
}

fn ip(last: u8) -> IpAddr {
    IpAddr::from([10, 0, 0, last])
}

#[test]
fn test_full_burst_sequence() {
    // Scenario: 121 rapid requests from one IP.
    let limiter = IpRateLimiter::new(policy());
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    for n in 1..=60u32 {
        let now = t0 + Duration::milliseconds(n as i64 * 10);
        assert_eq!(limiter.check_at(ip(1), now), Decision::Allowed, "request {n}");
    }
    for n in 61..=90u32 {
        let now = t0 + Duration::milliseconds(n as i64 * 10);
        assert_eq!(
            limiter.check_at(ip(1), now),
            Decision::SoftLimited,
            "request {n}"
        );
    }
    let now = t0 + Duration::milliseconds(910);
    assert_eq!(limiter.check_at(ip(1), now), Decision::Blocked, "request 91");

    // Still inside the block window minutes later.
    let now = t0 + Duration::minutes(4);
    assert_eq!(limiter.check_at(ip(1), now), Decision::Blocked);
}

#[test]
fn test_retry_after_matches_block_minutes() {
    assert_eq!(policy().retry_after_seconds(), 300);
}

#[test]
fn test_window_reset_restarts_count() {
    let limiter = IpRateLimiter::new(policy());
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    for n in 0..50 {
        limiter.check_at(ip(2), t0 + Duration::milliseconds(n));
    }
    // More than one window later the count starts over.
    let later = t0 + Duration::seconds(61);
    assert_eq!(limiter.check_at(ip(2), later), Decision::Allowed);
    for n in 1..60 {
        assert_eq!(
            limiter.check_at(ip(2), later + Duration::milliseconds(n)),
            Decision::Allowed
        );
    }
}

#[test]
fn test_block_expires_into_fresh_window() {
    let limiter = IpRateLimiter::new(policy());
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    for n in 0..=90u32 {
        limiter.check_at(ip(3), t0 + Duration::milliseconds(n as i64));
    }
    assert_eq!(limiter.check_at(ip(3), t0 + Duration::seconds(1)), Decision::Blocked);
    let after_block = t0 + Duration::minutes(5) + Duration::seconds(1);
    assert_eq!(limiter.check_at(ip(3), after_block), Decision::Allowed);
}

#[test]
fn test_independent_ips() {
    let limiter = IpRateLimiter::new(RateLimitPolicy {
        max_requests: 1,
        window_seconds: 60,
        burst_limit: 2,
        block_minutes: 5,
    });
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    assert_eq!(limiter.check_at(ip(4), t0), Decision::Allowed);
    assert_eq!(limiter.check_at(ip(4), t0), Decision::SoftLimited);
    assert_eq!(limiter.check_at(ip(5), t0), Decision::Allowed);
}

#[test]
fn test_purge_keeps_blocked_and_recent_buckets() {
    let limiter = IpRateLimiter::new(policy());
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    // Stale bucket: one old request.
    limiter.check_at(ip(6), t0 - Duration::seconds(600));
    // Blocked bucket: driven over the burst ceiling just now.
    for _ in 0..=90 {
        limiter.check_at(ip(7), t0);
    }
    // Fresh bucket.
    limiter.check_at(ip(8), t0);
    assert_eq!(limiter.tracked(), 3);

    limiter.purge_stale_at(t0 + Duration::seconds(1));
    assert_eq!(limiter.tracked(), 2);

    // Once the block lapses and five windows pass, the blocked bucket goes too.
    limiter.purge_stale_at(t0 + Duration::minutes(10));
    assert_eq!(limiter.tracked(), 0);
}

#[tokio::test]
async fn test_sweeper_stops_on_cancellation() {
    let limiter = Arc::new(IpRateLimiter::new(policy()));
    let token = CancellationToken::new();
    let handle = spawn_sweeper(limiter, StdDuration::from_millis(10), token.clone());
    token.cancel();
    tokio::time::timeout(StdDuration::from_secs(1), handle)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}
