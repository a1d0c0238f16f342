//! Response header hardening.
//!
//! Applied in the `finish` hook, so it covers every response the pipeline
//! produces: handler output, stage rejections and classified failures alike.

use async_trait::async_trait;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA, SERVER};
use axum::{
    http::{HeaderName, HeaderValue},
    response::Response,
};

use super::pipeline::{Exchange, Outcome, Stage};
use crate::config::SecurityConfig;
use crate::context::RequestContext;

const DEFAULT_HSTS_MAX_AGE: u64 = 31_536_000; // 1 year

pub struct SecurityHeadersStage {
    hsts: HeaderValue,
    csp: Option<HeaderValue>,
}

impl SecurityHeadersStage {
    pub fn from_config(cfg: Option<&SecurityConfig>) -> Self {
        let max_age = cfg.and_then(|c| c.hsts_max_age).unwrap_or(DEFAULT_HSTS_MAX_AGE);
        let include_sub =
            if cfg.and_then(|c| c.hsts_include_subdomains).unwrap_or(true) { "; includeSubDomains" } else { "" };
        let hsts = HeaderValue::from_str(&format!("max-age={}{}", max_age, include_sub))
            .unwrap_or(HeaderValue::from_static("max-age=31536000"));

        let csp = cfg.and_then(|c| c.csp.as_deref()).filter(|csp| !csp.trim().is_empty()).and_then(|csp| {
            HeaderValue::from_str(csp)
                .map_err(|e| {
                    tracing::warn!("Ignoring invalid Content-Security-Policy: {}", e);
                    e
                })
                .ok()
        });

        Self { hsts, csp }
    }
}

#[async_trait]
impl Stage for SecurityHeadersStage {
    fn name(&self) -> &'static str {
        "security_headers"
    }

    async fn process(&self, exchange: Exchange) -> Outcome {
        exchange.proceed()
    }

    fn finish(&self, _ctx: &RequestContext, res: &mut Response) {
        let headers = res.headers_mut();

        headers.insert(HeaderName::from_static("x-content-type-options"), HeaderValue::from_static("nosniff"));
        headers.insert(HeaderName::from_static("x-frame-options"), HeaderValue::from_static("DENY"));
        headers.insert(HeaderName::from_static("x-xss-protection"), HeaderValue::from_static("0"));
        headers.insert(HeaderName::from_static("referrer-policy"), HeaderValue::from_static("no-referrer"));
        headers.insert(
            HeaderName::from_static("permissions-policy"),
            HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
        );
        headers.insert(
            HeaderName::from_static("cross-origin-opener-policy"),
            HeaderValue::from_static("same-origin"),
        );
        headers.insert(
            HeaderName::from_static("cross-origin-resource-policy"),
            HeaderValue::from_static("same-origin"),
        );
        headers.insert(HeaderName::from_static("strict-transport-security"), self.hsts.clone());
        if let Some(csp) = &self.csp {
            headers.insert(HeaderName::from_static("content-security-policy"), csp.clone());
        }

        // Fingerprinting headers
        headers.remove(HeaderName::from_static("x-powered-by"));
        headers.remove(SERVER);

        let is_json = headers
            .get(CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map(|s| s.starts_with("application/json"))
            .unwrap_or(false);
        if is_json {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        }
    }
}
