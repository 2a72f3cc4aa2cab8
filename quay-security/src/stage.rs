//! The composed security stage: response headers, IP rate limiting, CSRF.
//!
//! Runs before route lookup. Header decoration always happens first so even
//! a rate-limit or CSRF rejection carries the hardening headers.

use std::sync::Arc;

use axum::response::IntoResponse;
use tracing::warn;

use quay_core::config::SecurityMiddlewareSettings;
use quay_core::error::HttpError;
use quay_core::pipeline::{BoxFuture, Exchange, Stage, Verdict};
use quay_rate_limit::{Decision, IpRateLimiter};
use quay_session::SessionStore;

use crate::csrf::CsrfGuard;
use crate::headers::SecurityHeaders;

pub struct SecurityStage {
    headers: SecurityHeaders,
    limiter: Option<Arc<IpRateLimiter>>,
    csrf: CsrfGuard,
    sessions: Arc<SessionStore>,
}

impl SecurityStage {
    /// `limiter` is shared with the background sweeper; pass `None` when
    /// rate limiting is disabled in the configuration.
    pub fn new(
        settings: &SecurityMiddlewareSettings,
        limiter: Option<Arc<IpRateLimiter>>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            headers: SecurityHeaders::from_settings(&settings.headers),
            limiter: if settings.rate_limit.enabled { limiter } else { None },
            csrf: CsrfGuard::new(settings.csrf.clone()),
            sessions,
        }
    }
}

impl Stage for SecurityStage {
    fn name(&self) -> &'static str {
        "security"
    }

    fn apply<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Verdict> {
        Box::pin(async move {
            self.headers.decorate(exchange);

            if let Some(limiter) = &self.limiter {
                match limiter.check(exchange.client_ip()) {
                    Decision::Allowed => {}
                    Decision::SoftLimited => {
                        warn!(ip = %exchange.client_ip(), "client over request budget, permitting");
                    }
                    Decision::Blocked => {
                        let err = HttpError::TooManyRequests {
                            message: "Too many requests".to_string(),
                            retry_after_secs: limiter.policy().retry_after_seconds(),
                        };
                        return Verdict::Done(err.into_response());
                    }
                }
            }

            if let Err(err) = self.csrf.check(exchange, &self.sessions) {
                return Verdict::Done(err.into_response());
            }
            Verdict::Continue
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
    use axum::http::{Extensions, Method, StatusCode};
    use bytes::Bytes;
    use quay_rate_limit::RateLimitPolicy;
    use std::time::Duration;

    fn sessions() -> Arc<SessionStore> {
        Arc::new(SessionStore::new(Duration::from_secs(600)))
    }

    fn limiter(max: u64, burst: u64) -> Arc<IpRateLimiter> {
        Arc::new(IpRateLimiter::new(RateLimitPolicy {
            max_requests: max,
            window_seconds: 60,
            burst_limit: burst,
            block_minutes: 5,
        }))
    }

    fn stage_with(limiter: Option<Arc<IpRateLimiter>>) -> SecurityStage {
        SecurityStage::new(&SecurityMiddlewareSettings::default(), limiter, sessions())
    }

    fn exchange(method: Method, headers: &[(&str, &str)]) -> Exchange {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        Exchange::new(
            method,
            "/api/v1/customers".parse().unwrap(),
            map,
            Bytes::new(),
            "10.0.0.7:1".parse().unwrap(),
            false,
            Extensions::new(),
        )
    }

    #[tokio::test]
    async fn decorates_headers_and_continues() {
        let stage = stage_with(None);
        let mut ex = exchange(Method::GET, &[]);
        assert!(matches!(stage.apply(&mut ex).await, Verdict::Continue));
        let names: Vec<_> = ex
            .take_decorations()
            .into_iter()
            .map(|(name, _)| name.as_str().to_string())
            .collect();
        assert!(names.contains(&"x-content-type-options".to_string()));
        assert!(names.contains(&"content-security-policy".to_string()));
    }

    #[tokio::test]
    async fn blocked_ip_gets_429_with_retry_after() {
        let stage = stage_with(Some(limiter(1, 2)));
        let mut first = exchange(Method::GET, &[]);
        assert!(matches!(stage.apply(&mut first).await, Verdict::Continue));
        // Second request is over max but under burst: soft-limited, permitted.
        let mut second = exchange(Method::GET, &[]);
        assert!(matches!(stage.apply(&mut second).await, Verdict::Continue));
        // Third exceeds the burst ceiling.
        let mut third = exchange(Method::GET, &[]);
        let Verdict::Done(resp) = stage.apply(&mut third).await else {
            panic!("expected rejection");
        };
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[RETRY_AFTER], "300");
    }

    #[tokio::test]
    async fn csrf_failure_terminates_with_403() {
        let sessions = sessions();
        let session = sessions.create();
        session.set("csrf_token", "expected");
        let stage = SecurityStage::new(&SecurityMiddlewareSettings::default(), None, sessions);
        let cookie = format!("QUAYSESSION={}", session.id());
        let mut ex = exchange(Method::POST, &[("cookie", cookie.as_str())]);
        let Verdict::Done(resp) = stage.apply(&mut ex).await else {
            panic!("expected rejection");
        };
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn disabled_rate_limit_never_rejects() {
        let mut settings = SecurityMiddlewareSettings::default();
        settings.rate_limit.enabled = false;
        let stage = SecurityStage::new(&settings, Some(limiter(1, 1)), sessions());
        for _ in 0..10 {
            let mut ex = exchange(Method::GET, &[]);
            assert!(matches!(stage.apply(&mut ex).await, Verdict::Continue));
        }
    }
}
