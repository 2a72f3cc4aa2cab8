//! Authentication pipeline stage.
//!
//! Runs after route lookup so the matched route's `requires_auth` flag can
//! veto the whole check. Extraction prefers `Authorization: Bearer`, then
//! walks the configured extra sources in order.

use axum::http::header::AUTHORIZATION;
use axum::http::Method;
use axum::response::IntoResponse;
use tracing::debug;

use quay_core::config::{AuthMiddlewareSettings, JwtSettings};
use quay_core::error::HttpError;
use quay_core::pipeline::{BoxFuture, Exchange, Stage, Verdict};

use crate::error::SecurityError;
use crate::jwt::TokenValidator;
use crate::principal::Principal;

/// One place to look for a token, parsed from its config string
/// (`header:<name>[:<prefix>]` or `queryparam:<name>`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenSource {
    Header {
        name: String,
        prefix: Option<String>,
    },
    QueryParam {
        name: String,
    },
}

impl TokenSource {
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.splitn(3, ':');
        match parts.next()? {
            "header" => {
                let name = parts.next()?.to_string();
                let prefix = parts.next().map(str::to_string);
                Some(TokenSource::Header { name, prefix })
            }
            "queryparam" => Some(TokenSource::QueryParam {
                name: parts.next()?.to_string(),
            }),
            _ => None,
        }
    }

    fn extract(&self, exchange: &Exchange) -> Option<String> {
        match self {
            TokenSource::Header { name, prefix } => {
                let value = exchange.header(name)?;
                match prefix {
                    Some(prefix) => value.strip_prefix(prefix.as_str()).map(|t| t.trim().to_string()),
                    None => Some(value.trim().to_string()),
                }
            }
            TokenSource::QueryParam { name } => exchange.query_param(name),
        }
    }
}

pub struct AuthStage {
    validator: TokenValidator,
    excluded_paths: Vec<String>,
    sources: Vec<TokenSource>,
    allow_public_options: bool,
}

impl AuthStage {
    pub fn new(jwt: &JwtSettings, middleware: &AuthMiddlewareSettings) -> Self {
        let sources = middleware
            .token_sources
            .iter()
            .filter_map(|spec| {
                let parsed = TokenSource::parse(spec);
                if parsed.is_none() {
                    debug!(spec = %spec, "ignoring malformed token source");
                }
                parsed
            })
            .collect();
        Self {
            validator: TokenValidator::from_settings(jwt),
            excluded_paths: middleware.excluded_paths.clone(),
            sources,
            allow_public_options: middleware.allow_public_options,
        }
    }

    fn excluded(&self, path: &str) -> bool {
        self.excluded_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    fn extract_token(&self, exchange: &Exchange) -> Option<String> {
        if let Some(value) = exchange.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
        self.sources
            .iter()
            .find_map(|source| source.extract(exchange))
    }
}

impl Stage for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn apply<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Verdict> {
        Box::pin(async move {
            if self.allow_public_options && exchange.method == Method::OPTIONS {
                return Verdict::Continue;
            }
            if self.excluded(exchange.path()) {
                return Verdict::Continue;
            }
            if exchange
                .route
                .as_ref()
                .is_some_and(|route| !route.requires_auth)
            {
                return Verdict::Continue;
            }

            let Some(token) = self.extract_token(exchange) else {
                let err: HttpError = SecurityError::MissingToken.into();
                return Verdict::Done(err.into_response());
            };
            match self.validator.validate(&token) {
                Ok(claims) => {
                    exchange.extensions.insert(Principal::from_claims(&claims));
                    Verdict::Continue
                }
                Err(err) => {
                    let err: HttpError = err.into();
                    Verdict::Done(err.into_response())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
    use axum::http::{Extensions, StatusCode};
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use std::sync::Arc;

    use quay_core::router::{RouteOptions, RouteTable};

    const SECRET: &str = "auth-stage-test-secret-0123456789";

    fn stage(excluded: Vec<String>, sources: Vec<String>) -> AuthStage {
        AuthStage::new(
            &JwtSettings {
                secret: SECRET.to_string(),
                issuer: None,
                audience: None,
                expiration_minutes: 60,
            },
            &AuthMiddlewareSettings {
                excluded_paths: excluded,
                token_sources: sources,
                allow_public_options: true,
            },
        )
    }

    fn token(sub: &str) -> String {
        let exp = chrono::Utc::now().timestamp() + 3600;
        encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({ "sub": sub, "username": "alice", "role": "user", "exp": exp }),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn exchange(method: Method, path: &str, headers: &[(&str, &str)]) -> Exchange {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        let mut ex = Exchange::new(
            method.clone(),
            path.parse().unwrap(),
            map,
            Bytes::new(),
            "10.0.0.1:1".parse().unwrap(),
            false,
            Extensions::new(),
        );
        // Attach a matched route the way the engine does.
        let mut table = RouteTable::new();
        let relative = path.trim_start_matches("/api/v1/").to_string();
        table
            .register(
                method.as_str(),
                &relative,
                RouteOptions::default(),
                Arc::new(|_ex| Box::pin(async { Ok(StatusCode::OK.into_response()) })),
            )
            .unwrap();
        ex.route = Some(table.find(&method, path).unwrap().route);
        ex
    }

    async fn body_json(verdict: Verdict) -> (StatusCode, serde_json::Value) {
        let Verdict::Done(resp) = verdict else {
            panic!("expected a terminal verdict");
        };
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn missing_token_is_401_with_required_message() {
        let stage = stage(vec![], vec![]);
        let mut ex = exchange(Method::GET, "/api/v1/customers", &[]);
        let (status, body) = body_json(stage.apply(&mut ex).await).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Authentication token is required");
    }

    #[tokio::test]
    async fn valid_bearer_attaches_principal() {
        let stage = stage(vec![], vec![]);
        let auth = format!("Bearer {}", token("user-9"));
        let mut ex = exchange(Method::GET, "/api/v1/customers", &[("authorization", &auth)]);
        assert!(matches!(stage.apply(&mut ex).await, Verdict::Continue));
        let principal = ex.extensions.get::<Principal>().expect("principal attached");
        assert_eq!(principal.user_id, "user-9");
        assert_eq!(principal.username, "alice");
    }

    #[tokio::test]
    async fn invalid_token_is_401() {
        let stage = stage(vec![], vec![]);
        let mut ex = exchange(
            Method::GET,
            "/api/v1/customers",
            &[("authorization", "Bearer not.a.jwt")],
        );
        let (status, body) = body_json(stage.apply(&mut ex).await).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid authentication token");
    }

    #[tokio::test]
    async fn excluded_path_passes_regardless_of_token() {
        let stage = stage(vec!["/api/v1/health".to_string()], vec![]);
        for headers in [
            vec![],
            vec![("authorization", "Bearer garbage")],
            vec![("authorization", "not-even-bearer")],
        ] {
            let mut ex = exchange(Method::GET, "/api/v1/health", &headers);
            assert!(
                matches!(stage.apply(&mut ex).await, Verdict::Continue),
                "headers: {headers:?}"
            );
            assert!(ex.extensions.get::<Principal>().is_none());
        }
    }

    #[tokio::test]
    async fn public_route_passes_without_token() {
        let stage = stage(vec![], vec![]);
        let mut ex = exchange(Method::GET, "/api/v1/open", &[]);
        // Re-register the matched route as public.
        let mut table = RouteTable::new();
        table
            .register(
                "GET",
                "open",
                RouteOptions::public(),
                Arc::new(|_ex| Box::pin(async { Ok(StatusCode::OK.into_response()) })),
            )
            .unwrap();
        ex.route = Some(table.find(&Method::GET, "/api/v1/open").unwrap().route);
        assert!(matches!(stage.apply(&mut ex).await, Verdict::Continue));
    }

    #[tokio::test]
    async fn options_pass_when_public_options_allowed() {
        let stage = stage(vec![], vec![]);
        let mut ex = exchange(Method::OPTIONS, "/api/v1/customers", &[]);
        assert!(matches!(stage.apply(&mut ex).await, Verdict::Continue));
    }

    #[tokio::test]
    async fn configured_sources_are_tried_in_order() {
        let stage = stage(
            vec![],
            vec![
                "header:X-Api-Token".to_string(),
                "queryparam:access_token".to_string(),
            ],
        );
        let jwt = token("via-header");
        let mut ex = exchange(Method::GET, "/api/v1/customers", &[("x-api-token", &jwt)]);
        assert!(matches!(stage.apply(&mut ex).await, Verdict::Continue));

        let jwt = token("via-query");
        let mut ex = exchange(Method::GET, "/api/v1/customers", &[]);
        ex.uri = format!("/api/v1/customers?access_token={jwt}").parse().unwrap();
        assert!(matches!(stage.apply(&mut ex).await, Verdict::Continue));
    }

    #[test]
    fn token_source_parsing() {
        assert_eq!(
            TokenSource::parse("header:X-Token"),
            Some(TokenSource::Header {
                name: "X-Token".to_string(),
                prefix: None
            })
        );
        assert_eq!(
            TokenSource::parse("header:X-Token:Token "),
            Some(TokenSource::Header {
                name: "X-Token".to_string(),
                prefix: Some("Token ".to_string())
            })
        );
        assert_eq!(
            TokenSource::parse("queryparam:access_token"),
            Some(TokenSource::QueryParam {
                name: "access_token".to_string()
            })
        );
        assert_eq!(TokenSource::parse("cookie:tok"), None);
    }
}
