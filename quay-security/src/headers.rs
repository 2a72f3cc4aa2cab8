//! Response security headers.

use axum::http::header::{HeaderName, HeaderValue, STRICT_TRANSPORT_SECURITY};

use quay_core::config::SecurityHeaderSettings;
use quay_core::pipeline::Exchange;

/// Pre-parsed header pairs applied to every response.
/// `Strict-Transport-Security` is held aside and applied only over TLS.
pub struct SecurityHeaders {
    always: Vec<(HeaderName, HeaderValue)>,
    hsts: Option<HeaderValue>,
}

impl SecurityHeaders {
    pub fn from_settings(settings: &SecurityHeaderSettings) -> Self {
        let mut always = Vec::new();
        let mut push = |name: HeaderName, value: &Option<String>| {
            if let Some(value) = value {
                if let Ok(value) = HeaderValue::from_str(value) {
                    always.push((name, value));
                }
            }
        };

        push(
            HeaderName::from_static("content-security-policy"),
            &settings.content_security_policy,
        );
        push(
            HeaderName::from_static("x-frame-options"),
            &settings.x_frame_options,
        );
        push(
            HeaderName::from_static("x-xss-protection"),
            &settings.x_xss_protection,
        );
        push(
            HeaderName::from_static("x-content-type-options"),
            &settings.x_content_type_options,
        );
        push(
            HeaderName::from_static("referrer-policy"),
            &settings.referrer_policy,
        );
        push(
            HeaderName::from_static("permissions-policy"),
            &settings.permissions_policy,
        );
        push(
            HeaderName::from_static("x-download-options"),
            &settings.x_download_options,
        );
        push(
            HeaderName::from_static("x-dns-prefetch-control"),
            &settings.x_dns_prefetch_control,
        );

        let hsts = settings
            .strict_transport_security
            .as_ref()
            .and_then(|v| HeaderValue::from_str(v).ok());

        Self { always, hsts }
    }

    pub fn decorate(&self, exchange: &mut Exchange) {
        for (name, value) in &self.always {
            exchange.decorate(name.clone(), value.clone());
        }
        if exchange.tls {
            if let Some(hsts) = &self.hsts {
                exchange.decorate(STRICT_TRANSPORT_SECURITY, hsts.clone());
            }
        }
    }
}
