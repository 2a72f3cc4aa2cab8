//! Route table: template compilation, first-match lookup, typed parameters.
//!
//! Templates are plain segments mixed with `:<name>` / `:<name>(<kind>)`
//! placeholders and are always served under the `/api/v1/` prefix. A
//! placeholder compiles to a named capture matching one path segment; the
//! whole pattern is anchored. Lookup scans routes in registration order and
//! the first pattern+method match wins, so duplicate registrations are legal
//! and earlier entries shadow later ones.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;
use axum::response::Response;
use regex::Regex;

use crate::error::HttpError;
use crate::pipeline::{BoxFuture, Exchange};

/// All registered paths live under this prefix.
pub const ROUTE_PREFIX: &str = "/api/v1/";

#[derive(Debug)]
pub enum RouteError {
    /// The HTTP method string is not a valid token.
    BadMethod(String),
    /// The template has an empty/invalid placeholder or unknown kind.
    BadTemplate(String),
    /// Registration was attempted after the server froze the table.
    TableFrozen,
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteError::BadMethod(m) => write!(f, "Invalid HTTP method: {m}"),
            RouteError::BadTemplate(msg) => write!(f, "Invalid route template: {msg}"),
            RouteError::TableFrozen => {
                write!(f, "Route registration is not permitted after server start")
            }
        }
    }
}

impl std::error::Error for RouteError {}

/// Declared kind of a path parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Float,
    Boolean,
    Uuid,
}

impl ParamKind {
    fn from_template(kind: &str) -> Option<Self> {
        match kind {
            "int" => Some(ParamKind::Integer),
            "float" => Some(ParamKind::Float),
            "bool" => Some(ParamKind::Boolean),
            "uuid" => Some(ParamKind::Uuid),
            "string" => Some(ParamKind::String),
            _ => None,
        }
    }

    /// Whether `raw` is admissible for this kind. Values stay raw strings;
    /// conversion here is a gate, not a transformation.
    pub fn admits(&self, raw: &str) -> bool {
        match self {
            ParamKind::String => true,
            ParamKind::Integer => raw.parse::<i64>().is_ok(),
            ParamKind::Float => raw.parse::<f64>().is_ok(),
            ParamKind::Boolean => {
                raw.eq_ignore_ascii_case("true")
                    || raw.eq_ignore_ascii_case("false")
                    || raw == "1"
                    || raw == "0"
            }
            // Deeper validation is the handler's responsibility.
            ParamKind::Uuid => !raw.is_empty(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
}

/// Per-route flags beyond method/template/handler.
#[derive(Clone, Debug)]
pub struct RouteOptions {
    pub requires_auth: bool,
    pub cache_enabled: bool,
    /// Per-route request budget hint; `0` means no route-specific limit.
    pub rate_limit: u32,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            requires_auth: true,
            cache_enabled: false,
            rate_limit: 0,
        }
    }
}

impl RouteOptions {
    pub fn public() -> Self {
        Self {
            requires_auth: false,
            ..Self::default()
        }
    }
}

pub type HandlerFuture = BoxFuture<'static, Result<Response, HttpError>>;

/// A route handler. Owns its exchange so the returned future is `'static`.
pub type RouteHandler = Arc<dyn Fn(Exchange) -> HandlerFuture + Send + Sync>;

pub struct Route {
    pub method: Method,
    pub template: String,
    pattern: Regex,
    pub params: Vec<ParamSpec>,
    pub handler: RouteHandler,
    pub requires_auth: bool,
    pub cache_enabled: bool,
    pub rate_limit: u32,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("template", &self.template)
            .field("requires_auth", &self.requires_auth)
            .finish()
    }
}

/// Result of a successful lookup: the route plus raw captured parameters.
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: HashMap<String, String>,
}

impl RouteMatch {
    /// Typed-conversion gate for every captured value, in declaration order.
    pub fn validate(&self) -> bool {
        self.route.params.iter().all(|spec| {
            self.params
                .get(&spec.name)
                .is_some_and(|raw| spec.kind.admits(raw))
        })
    }
}

/// Append-only route registry. Registration completes before the listener
/// starts; lookups run against an immutable `Arc<RouteTable>`.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    /// Compile and append a route. The template is relative to `/api/v1/`
    /// (a leading slash is tolerated).
    pub fn register(
        &mut self,
        method: &str,
        template: &str,
        options: RouteOptions,
        handler: RouteHandler,
    ) -> Result<(), RouteError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| RouteError::BadMethod(method.to_string()))?;
        let (pattern, params) = compile(template)?;
        self.routes.push(Arc::new(Route {
            method,
            template: template.trim_start_matches('/').to_string(),
            pattern,
            params,
            handler,
            requires_auth: options.requires_auth,
            cache_enabled: options.cache_enabled,
            rate_limit: options.rate_limit,
        }));
        Ok(())
    }

    /// First-match lookup. A path match with a different method is no match
    /// at all: the caller answers 404, never 405.
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.routes.iter().find_map(|route| {
            if route.method != *method {
                return None;
            }
            let captures = route.pattern.captures(path)?;
            let params = route
                .params
                .iter()
                .filter_map(|spec| {
                    captures
                        .name(&spec.name)
                        .map(|m| (spec.name.clone(), m.as_str().to_string()))
                })
                .collect();
            Some(RouteMatch {
                route: route.clone(),
                params,
            })
        })
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }
}

fn valid_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Compile a template into an anchored pattern plus the ordered param specs.
fn compile(template: &str) -> Result<(Regex, Vec<ParamSpec>), RouteError> {
    let relative = template.trim_start_matches('/');
    if relative.is_empty() {
        return Err(RouteError::BadTemplate("empty template".to_string()));
    }

    let mut pattern = String::from("^");
    pattern.push_str(&regex::escape(ROUTE_PREFIX.trim_end_matches('/')));
    let mut params = Vec::new();

    for segment in relative.split('/') {
        pattern.push('/');
        match segment.strip_prefix(':') {
            Some(placeholder) => {
                let (name, kind) = match placeholder.split_once('(') {
                    Some((name, rest)) => {
                        let kind_str = rest.strip_suffix(')').ok_or_else(|| {
                            RouteError::BadTemplate(format!("unclosed kind in ':{placeholder}'"))
                        })?;
                        let kind = ParamKind::from_template(kind_str).ok_or_else(|| {
                            RouteError::BadTemplate(format!("unknown kind '{kind_str}'"))
                        })?;
                        (name, kind)
                    }
                    None => (placeholder, ParamKind::String),
                };
                if !valid_param_name(name) {
                    return Err(RouteError::BadTemplate(format!(
                        "invalid parameter name '{name}'"
                    )));
                }
                pattern.push_str(&format!("(?P<{name}>[^/]+)"));
                params.push(ParamSpec {
                    name: name.to_string(),
                    kind,
                });
            }
            None => pattern.push_str(&regex::escape(segment)),
        }
    }
    pattern.push('$');

    let regex = Regex::new(&pattern)
        .map_err(|e| RouteError::BadTemplate(format!("pattern compilation failed: {e}")))?;
    Ok((regex, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    fn noop_handler(tag: &'static str) -> RouteHandler {
        Arc::new(move |_ex| Box::pin(async move { Ok((StatusCode::OK, tag).into_response()) }))
    }

    fn table_with(routes: &[(&str, &str)]) -> RouteTable {
        let mut table = RouteTable::new();
        for (method, template) in routes {
            table
                .register(method, template, RouteOptions::default(), noop_handler("x"))
                .unwrap();
        }
        table
    }

    #[test]
    fn literal_route_matches_under_prefix() {
        let table = table_with(&[("get", "health")]);
        assert!(table.find(&Method::GET, "/api/v1/health").is_some());
        assert!(table.find(&Method::GET, "/health").is_none());
        assert!(table.find(&Method::GET, "/api/v1/health/extra").is_none());
    }

    #[test]
    fn method_mismatch_is_not_found() {
        let table = table_with(&[("GET", "customers")]);
        assert!(table.find(&Method::POST, "/api/v1/customers").is_none());
    }

    #[test]
    fn parameters_are_captured_in_declaration_order() {
        let table = table_with(&[("GET", "customers/:id(int)/orders/:order")]);
        let matched = table
            .find(&Method::GET, "/api/v1/customers/42/orders/abc")
            .unwrap();
        assert_eq!(matched.params["id"], "42");
        assert_eq!(matched.params["order"], "abc");
        assert_eq!(matched.route.params[0].name, "id");
        assert_eq!(matched.route.params[0].kind, ParamKind::Integer);
        assert_eq!(matched.route.params[1].kind, ParamKind::String);
    }

    #[test]
    fn first_registered_route_wins() {
        let mut table = RouteTable::new();
        table
            .register("GET", "things/:a", RouteOptions::default(), noop_handler("first"))
            .unwrap();
        table
            .register("GET", "things/:b", RouteOptions::default(), noop_handler("second"))
            .unwrap();
        let matched = table.find(&Method::GET, "/api/v1/things/7").unwrap();
        assert_eq!(matched.route.params[0].name, "a");
    }

    #[test]
    fn typed_validation_gates_values() {
        let table = table_with(&[("GET", "customers/:id(int)")]);
        let ok = table.find(&Method::GET, "/api/v1/customers/42").unwrap();
        assert!(ok.validate());
        let bad = table.find(&Method::GET, "/api/v1/customers/abc").unwrap();
        assert!(!bad.validate());
    }

    #[test]
    fn bool_kind_accepts_known_forms_only() {
        for (raw, expected) in [
            ("true", true),
            ("TRUE", true),
            ("1", true),
            ("0", true),
            ("false", true),
            ("yes", false),
            ("2", false),
        ] {
            assert_eq!(ParamKind::Boolean.admits(raw), expected, "raw={raw}");
        }
    }

    #[test]
    fn float_and_int_use_locale_neutral_parsing() {
        assert!(ParamKind::Float.admits("3.25"));
        assert!(!ParamKind::Float.admits("3,25"));
        assert!(ParamKind::Integer.admits("-7"));
        assert!(!ParamKind::Integer.admits("7.0"));
    }

    #[test]
    fn uuid_kind_accepts_any_non_empty() {
        assert!(ParamKind::Uuid.admits("not-a-uuid"));
        assert!(!ParamKind::Uuid.admits(""));
    }

    #[test]
    fn unknown_kind_is_a_template_error() {
        let mut table = RouteTable::new();
        let err = table
            .register(
                "GET",
                "x/:id(decimal)",
                RouteOptions::default(),
                noop_handler("x"),
            )
            .unwrap_err();
        assert!(matches!(err, RouteError::BadTemplate(_)));
    }

    #[test]
    fn regex_metacharacters_in_literals_are_escaped() {
        let table = table_with(&[("GET", "v1.0/items")]);
        assert!(table.find(&Method::GET, "/api/v1/v1.0/items").is_some());
        assert!(table.find(&Method::GET, "/api/v1/v1x0/items").is_none());
    }
}
