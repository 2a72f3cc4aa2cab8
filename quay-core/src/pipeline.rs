//! Request pipeline contract.
//!
//! A request is folded over an ordered list of stages. Every stage either
//! terminates the request by producing the final response or yields to the
//! next stage; nothing is thrown across the engine boundary. The engine owns
//! the stage list and the fold (see [`crate::engine::HttpEngine::dispatch`]).

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE};
use axum::http::{Extensions, Method, Uri};
use axum::response::Response;
use bytes::Bytes;

use crate::router::Route;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a pipeline stage.
pub enum Verdict {
    /// Yield to the next stage.
    Continue,
    /// The stage wrote the final response; nothing after it runs.
    Done(Response),
}

/// One request travelling through the pipeline.
///
/// The body is collected up front so stages (e.g. CSRF form-field lookup)
/// and handlers can inspect it without re-reading the connection. Stages
/// record response headers through [`decorate`]; the engine applies them to
/// whatever response ends the request.
///
/// [`decorate`]: Exchange::decorate
pub struct Exchange {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub peer_addr: SocketAddr,
    /// Whether the carrying listener is TLS.
    pub tls: bool,
    /// Raw values of matched path parameters, in template order.
    pub params: HashMap<String, String>,
    /// The matched route; populated after route lookup.
    pub route: Option<Arc<Route>>,
    /// Shared resources and per-request attachments (principal, …).
    pub extensions: Extensions,
    pub(crate) decorations: Vec<(HeaderName, HeaderValue)>,
}

impl Exchange {
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        peer_addr: SocketAddr,
        tls: bool,
        extensions: Extensions,
    ) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            peer_addr,
            tls,
            params: HashMap::new(),
            route: None,
            extensions,
            decorations: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn client_ip(&self) -> IpAddr {
        self.peer_addr.ip()
    }

    /// First value of `name`, as UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of a cookie in the `Cookie` header, if present.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let raw = self.headers.get(COOKIE)?.to_str().ok()?;
        raw.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
    }

    /// First query-string value of `name`.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// First form field of `name`, when the body is
    /// `application/x-www-form-urlencoded`.
    pub fn form_field(&self, name: &str) -> Option<String> {
        let content_type = self.headers.get(CONTENT_TYPE)?.to_str().ok()?;
        if !content_type.starts_with("application/x-www-form-urlencoded") {
            return None;
        }
        form_urlencoded::parse(&self.body)
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Record a response header to be set on the final response.
    pub fn decorate(&mut self, name: HeaderName, value: HeaderValue) {
        self.decorations.push((name, value));
    }

    /// Drain the recorded response headers. The engine calls this when it
    /// finalizes the response; frontends driving stages directly must apply
    /// the drained pairs themselves.
    pub fn take_decorations(&mut self) -> Vec<(HeaderName, HeaderValue)> {
        std::mem::take(&mut self.decorations)
    }
}

/// A pipeline stage. Object-safe so the engine can hold a heterogeneous
/// ordered list.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Verdict>;
}

/// The engine's stage lists. Route lookup and parameter validation happen
/// between the two: `pre_route` stages (CORS, security) never see a matched
/// route, `post_route` stages (auth) always do.
#[derive(Default)]
pub struct PipelineSet {
    pub pre_route: Vec<Box<dyn Stage>>,
    pub post_route: Vec<Box<dyn Stage>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange_with_headers(headers: &[(&str, &str)]) -> Exchange {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        Exchange::new(
            Method::GET,
            "/api/v1/health?who=me&who=you".parse().unwrap(),
            map,
            Bytes::new(),
            "10.0.0.1:40000".parse().unwrap(),
            false,
            Extensions::new(),
        )
    }

    #[test]
    fn cookie_lookup_handles_multiple_pairs() {
        let ex = exchange_with_headers(&[("cookie", "a=1; QUAYSESSION=deadbeef; b=2")]);
        assert_eq!(ex.cookie("QUAYSESSION").as_deref(), Some("deadbeef"));
        assert_eq!(ex.cookie("missing"), None);
    }

    #[test]
    fn query_param_returns_first_value() {
        let ex = exchange_with_headers(&[]);
        assert_eq!(ex.query_param("who").as_deref(), Some("me"));
        assert_eq!(ex.query_param("nope"), None);
    }

    #[test]
    fn form_field_requires_urlencoded_content_type() {
        let mut ex = exchange_with_headers(&[(
            "content-type",
            "application/x-www-form-urlencoded; charset=utf-8",
        )]);
        ex.body = Bytes::from_static(b"csrf_token=tok123&x=y");
        assert_eq!(ex.form_field("csrf_token").as_deref(), Some("tok123"));

        ex.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        assert_eq!(ex.form_field("csrf_token"), None);
    }
}
