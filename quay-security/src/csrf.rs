//! CSRF validation for mutating requests.
//!
//! The guard only engages when the request method is in the protected set
//! and the request carries a live session (named by the session cookie).
//! The expected token lives in the session; the presented token comes from
//! the configured header or form field. Comparison is constant-time. On
//! success the stored token is rotated and the new value echoed back in the
//! response header, so clients always hold the token for their next
//! mutating request.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::http::header::{HeaderName, HeaderValue};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;
use uuid::Uuid;

use quay_core::config::CsrfSettings;
use quay_core::error::HttpError;
use quay_core::pipeline::Exchange;
use quay_session::SessionStore;

pub struct CsrfGuard {
    settings: CsrfSettings,
    header_name: Option<HeaderName>,
}

/// Mint an unguessable token, in the same shape as session ids.
pub fn mint_token() -> String {
    let digest = Sha256::digest(Uuid::new_v4().to_string().as_bytes());
    let mut token = String::with_capacity(64);
    for byte in digest {
        let _ = write!(token, "{byte:02x}");
    }
    token
}

impl CsrfGuard {
    pub fn new(settings: CsrfSettings) -> Self {
        let header_name = HeaderName::from_bytes(settings.header_name.to_lowercase().as_bytes()).ok();
        Self {
            settings,
            header_name,
        }
    }

    fn protects(&self, method: &axum::http::Method) -> bool {
        self.settings.enabled
            && self
                .settings
                .protected_methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method.as_str()))
    }

    /// Validate the exchange. `Ok(())` means pass (including "nothing to
    /// protect"); `Err` carries the 403.
    pub fn check(&self, exchange: &mut Exchange, sessions: &Arc<SessionStore>) -> Result<(), HttpError> {
        if !self.protects(&exchange.method) {
            return Ok(());
        }
        let Some(session_id) = exchange.cookie(&self.settings.cookie_name) else {
            return Ok(());
        };
        let Some(session) = sessions.get_by_id(&session_id) else {
            return Ok(());
        };

        let expected = session.get(&self.settings.session_key);
        let presented = self
            .header_name
            .as_ref()
            .and_then(|name| exchange.header(name.as_str()).map(str::to_string))
            .or_else(|| exchange.form_field(&self.settings.form_field));

        let valid = match (&expected, &presented) {
            (Some(expected), Some(presented)) => {
                expected.as_bytes().ct_eq(presented.as_bytes()).into()
            }
            _ => false,
        };
        if !valid {
            debug!(session = %session_id, "CSRF token missing or mismatched");
            return Err(HttpError::Forbidden(
                "CSRF token validation failed".to_string(),
            ));
        }

        // Rotate on every validated mutating request and echo the new token.
        let fresh = mint_token();
        session.set(&self.settings.session_key, fresh.clone());
        if let (Some(name), Ok(value)) = (self.header_name.clone(), HeaderValue::from_str(&fresh)) {
            exchange.decorate(name, value);
        }
        Ok(())
    }
}
