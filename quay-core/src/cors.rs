//! CORS pipeline stage.
//!
//! Behavior summary: no `Origin` header means no-op; a disallowed origin
//! passes through with no `Access-Control-*` decoration (this stage never
//! rejects); an allowed preflight is answered 204 and terminates the
//! pipeline; an allowed non-preflight request decorates the eventual
//! response and continues.

use axum::http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS,
    ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_METHOD, ORIGIN,
};
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;

use crate::config::CorsSettings;
use crate::pipeline::{BoxFuture, Exchange, Stage, Verdict};

pub struct CorsStage {
    allow_any: bool,
    allowed_origins: Vec<String>,
    allow_methods: Option<HeaderValue>,
    allow_headers: Option<HeaderValue>,
    expose_headers: Option<HeaderValue>,
    max_age_seconds: u64,
    allow_credentials: bool,
}

fn join_value(items: &[String]) -> Option<HeaderValue> {
    if items.is_empty() {
        return None;
    }
    HeaderValue::from_str(&items.join(", ")).ok()
}

impl CorsStage {
    pub fn new(settings: &CorsSettings) -> Self {
        Self {
            allow_any: settings.allowed_origins.iter().any(|o| o == "*"),
            allowed_origins: settings
                .allowed_origins
                .iter()
                .map(|o| o.to_lowercase())
                .collect(),
            allow_methods: join_value(&settings.allowed_methods),
            allow_headers: join_value(&settings.allowed_headers),
            expose_headers: join_value(&settings.exposed_headers),
            max_age_seconds: settings.max_age_seconds,
            allow_credentials: settings.allow_credentials,
        }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.allow_any || self.allowed_origins.iter().any(|o| o == &origin.to_lowercase())
    }

    /// `*` is only usable without credentials; otherwise echo the origin.
    fn allow_origin_value(&self, origin: &str) -> Option<HeaderValue> {
        if self.allow_any && !self.allow_credentials {
            Some(HeaderValue::from_static("*"))
        } else {
            HeaderValue::from_str(origin).ok()
        }
    }
}

impl Stage for CorsStage {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn apply<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Verdict> {
        Box::pin(async move {
            let Some(origin) = exchange
                .headers
                .get(ORIGIN)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
            else {
                return Verdict::Continue;
            };
            if !self.origin_allowed(&origin) {
                return Verdict::Continue;
            }
            let Some(allow_origin) = self.allow_origin_value(&origin) else {
                return Verdict::Continue;
            };

            let preflight = exchange.method == Method::OPTIONS
                && exchange.headers.contains_key(ACCESS_CONTROL_REQUEST_METHOD);

            if preflight {
                let mut response = StatusCode::NO_CONTENT.into_response();
                let headers = response.headers_mut();
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
                if let Some(methods) = &self.allow_methods {
                    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, methods.clone());
                }
                if let Some(allowed) = &self.allow_headers {
                    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allowed.clone());
                }
                if self.max_age_seconds > 0 {
                    if let Ok(value) = HeaderValue::from_str(&self.max_age_seconds.to_string()) {
                        headers.insert(ACCESS_CONTROL_MAX_AGE, value);
                    }
                }
                if self.allow_credentials {
                    headers.insert(
                        ACCESS_CONTROL_ALLOW_CREDENTIALS,
                        HeaderValue::from_static("true"),
                    );
                }
                return Verdict::Done(response);
            }

            exchange.decorate(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
            if self.allow_credentials {
                exchange.decorate(
                    ACCESS_CONTROL_ALLOW_CREDENTIALS,
                    HeaderValue::from_static("true"),
                );
            }
            if let Some(expose) = &self.expose_headers {
                exchange.decorate(ACCESS_CONTROL_EXPOSE_HEADERS, expose.clone());
            }
            Verdict::Continue
        })
    }
}
