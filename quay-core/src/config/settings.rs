//! Typed view of `config.json`.
//!
//! The raw document stays available through [`ConfigStore::snapshot`], but
//! every core component consumes these records so that wrong kinds fail at
//! load time instead of deep inside a request.
//!
//! [`ConfigStore::snapshot`]: super::ConfigStore::snapshot

use serde::{Deserialize, Serialize};

/// Root of the typed configuration. Unknown keys in the document are ignored.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppSettings {
    pub application: ApplicationSettings,
    pub server: ServerSettings,
    pub security: SecuritySettings,
    pub database_pools: Vec<DatabasePoolSettings>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApplicationSettings {
    pub log_level: String,
    pub log_file: Option<String>,
    pub console_logging: bool,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
            console_logging: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    /// `> 0` pins the runtime worker pool to that many threads; `0` keeps
    /// the default spawn-per-connection model.
    pub thread_pool_size: usize,
    pub keep_alive_enabled: bool,
    pub connection_timeout_seconds: u64,
    pub shutdown_grace_period_seconds: u64,
    pub max_request_body_bytes: usize,
    pub pid_file: String,
    pub ssl: SslSettings,
    pub cors: CorsSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 256,
            thread_pool_size: 0,
            keep_alive_enabled: true,
            connection_timeout_seconds: 30,
            shutdown_grace_period_seconds: 10,
            max_request_body_bytes: 2 * 1024 * 1024,
            pid_file: "quay.pid".to_string(),
            ssl: SslSettings::default(),
            cors: CorsSettings::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SslSettings {
    pub enabled: bool,
    pub certificate_file: String,
    pub private_key_file: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CorsSettings {
    /// Exact origins, or a single `"*"` entry for any origin.
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub max_age_seconds: u64,
    pub allow_credentials: bool,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "PUT".to_string(),
                "DELETE".to_string(),
                "PATCH".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            exposed_headers: Vec::new(),
            max_age_seconds: 600,
            allow_credentials: false,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecuritySettings {
    pub jwt: JwtSettings,
    pub auth_middleware: AuthMiddlewareSettings,
    pub security_middleware: SecurityMiddlewareSettings,
    pub session: SessionSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub expiration_minutes: u64,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: None,
            audience: None,
            expiration_minutes: 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthMiddlewareSettings {
    /// Path prefixes that bypass authentication entirely.
    pub excluded_paths: Vec<String>,
    /// Additional token lookup sources, each `header:<name>[:<prefix>]`
    /// or `queryparam:<name>`. `Authorization: Bearer` is always tried first.
    pub token_sources: Vec<String>,
    pub allow_public_options: bool,
}

impl Default for AuthMiddlewareSettings {
    fn default() -> Self {
        Self {
            excluded_paths: vec!["/api/v1/health".to_string()],
            token_sources: Vec::new(),
            allow_public_options: true,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityMiddlewareSettings {
    pub headers: SecurityHeaderSettings,
    pub rate_limit: RateLimitSettings,
    pub csrf: CsrfSettings,
}

/// Response security headers. A `None` omits the header entirely.
/// `strict_transport_security` is only applied on TLS listeners.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityHeaderSettings {
    pub content_security_policy: Option<String>,
    pub x_frame_options: Option<String>,
    pub x_xss_protection: Option<String>,
    pub x_content_type_options: Option<String>,
    pub referrer_policy: Option<String>,
    pub permissions_policy: Option<String>,
    pub x_download_options: Option<String>,
    pub x_dns_prefetch_control: Option<String>,
    pub strict_transport_security: Option<String>,
}

impl Default for SecurityHeaderSettings {
    fn default() -> Self {
        Self {
            content_security_policy: Some("default-src 'self'".to_string()),
            x_frame_options: Some("DENY".to_string()),
            x_xss_protection: Some("0".to_string()),
            x_content_type_options: Some("nosniff".to_string()),
            referrer_policy: Some("strict-origin-when-cross-origin".to_string()),
            permissions_policy: Some("camera=(), microphone=(), geolocation=()".to_string()),
            x_download_options: Some("noopen".to_string()),
            x_dns_prefetch_control: Some("off".to_string()),
            strict_transport_security: Some("max-age=31536000; includeSubDomains".to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub max_requests: u64,
    pub window_seconds: u64,
    /// Hard ceiling; exceeding it blocks the client IP for `block_minutes`.
    pub burst_limit: u64,
    pub block_minutes: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 60,
            window_seconds: 60,
            burst_limit: 90,
            block_minutes: 5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CsrfSettings {
    pub enabled: bool,
    pub protected_methods: Vec<String>,
    /// Session key under which the expected token is stored.
    pub session_key: String,
    pub header_name: String,
    pub form_field: String,
    /// Cookie that names the session the token is bound to.
    pub cookie_name: String,
}

impl Default for CsrfSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            protected_methods: vec![
                "POST".to_string(),
                "PUT".to_string(),
                "DELETE".to_string(),
                "PATCH".to_string(),
            ],
            session_key: "csrf_token".to_string(),
            header_name: "X-CSRF-Token".to_string(),
            form_field: "csrf_token".to_string(),
            cookie_name: "QUAYSESSION".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSettings {
    pub timeout_minutes: u64,
    pub cleanup_interval_seconds: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout_minutes: 30,
            cleanup_interval_seconds: 300,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabasePoolSettings {
    pub name: String,
    /// Driver kind: `PostgreSQL`, `MySQL`, `MSSQL`, …
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub min_size: usize,
    pub max_size: usize,
    pub idle_timeout_seconds: u64,
    pub acquire_timeout_seconds: u64,
    pub health_check_interval_seconds: u64,
    pub health_check_query: String,
}

impl Default for DatabasePoolSettings {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            driver: "PostgreSQL".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            min_size: 1,
            max_size: 10,
            idle_timeout_seconds: 300,
            acquire_timeout_seconds: 5,
            health_check_interval_seconds: 30,
            health_check_query: "SELECT 1".to_string(),
        }
    }
}
