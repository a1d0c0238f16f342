use async_trait::async_trait;
use axum::{
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
            ACCESS_CONTROL_REQUEST_METHOD, ORIGIN, VARY,
        },
        HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
};

use super::pipeline::{Exchange, Outcome, Stage};
use crate::context::RequestContext;
use crate::error::AppError;

const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization, X-CSRF-Token, X-Request-ID, X-No-Compression";
const EXPOSED_HEADERS: &str = "X-Request-ID, Retry-After";
const PREFLIGHT_MAX_AGE: &str = "86400";

/// Origin allow-list enforcement.
///
/// Requests without an `Origin` (same-origin, server-to-server, curl) pass.
pub struct CorsStage {
    allowed: Vec<String>,
    any: bool,
}

impl CorsStage {
    pub fn new(allowed: Vec<String>) -> Self {
        let allowed: Vec<String> =
            allowed.into_iter().map(|o| o.trim().trim_end_matches('/').to_string()).filter(|o| !o.is_empty()).collect();
        let any = allowed.iter().any(|o| o == "*");
        Self { allowed, any }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.any || self.is_listed(origin)
    }

    /// Named explicitly; only these origins may send credentials.
    fn is_listed(&self, origin: &str) -> bool {
        self.allowed.iter().any(|o| o == origin)
    }
}

#[async_trait]
impl Stage for CorsStage {
    fn name(&self) -> &'static str {
        "cors"
    }

    async fn process(&self, mut exchange: Exchange) -> Outcome {
        let Some(origin) = exchange.header(ORIGIN.as_str()).map(str::to_string) else {
            return exchange.proceed();
        };
        if !self.is_allowed(&origin) {
            return exchange.fail(AppError::CorsRejected { origin });
        }

        let preflight = exchange.parts.method == Method::OPTIONS
            && exchange.parts.headers.contains_key(ACCESS_CONTROL_REQUEST_METHOD);
        exchange.ctx = exchange.ctx.with_origin(origin);

        if preflight {
            let mut res = StatusCode::NO_CONTENT.into_response();
            let h = res.headers_mut();
            h.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
            h.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
            h.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(PREFLIGHT_MAX_AGE));
            return exchange.respond(res);
        }
        exchange.proceed()
    }

    fn finish(&self, ctx: &RequestContext, res: &mut Response) {
        let Some(origin) = ctx.origin() else {
            return;
        };
        let Ok(value) = HeaderValue::from_str(origin) else {
            return;
        };
        let h = res.headers_mut();
        h.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        if self.is_listed(origin) {
            h.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        h.insert(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static(EXPOSED_HEADERS));
        h.append(VARY, HeaderValue::from_static("Origin"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        let cors = CorsStage::new(vec!["https://app.example.com/".into(), "http://localhost:3000".into()]);
        assert!(cors.is_allowed("https://app.example.com"));
        assert!(cors.is_allowed("http://localhost:3000"));
        assert!(!cors.is_allowed("https://evil.example.com"));
        assert!(!cors.is_allowed("http://localhost:3001"));
    }

    #[test]
    fn test_wildcard() {
        let cors = CorsStage::new(vec!["*".into()]);
        assert!(cors.is_allowed("https://anything.test"));
    }

    #[test]
    fn test_credentials_only_for_listed_origins() {
        let finish = |cors: &CorsStage, origin: &str| {
            let ctx = RequestContext::begin(std::net::IpAddr::from([127, 0, 0, 1])).with_origin(origin.to_string());
            let mut res = StatusCode::OK.into_response();
            cors.finish(&ctx, &mut res);
            res
        };

        let open = CorsStage::new(vec!["*".into()]);
        let res = finish(&open, "https://anything.test");
        assert_eq!(res.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "https://anything.test");
        assert!(res.headers().get(ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());

        let mixed = CorsStage::new(vec!["*".into(), "https://app.example.com".into()]);
        let res = finish(&mixed, "https://app.example.com");
        assert_eq!(res.headers().get(ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
        let res = finish(&mixed, "https://other.test");
        assert!(res.headers().get(ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());
    }

    #[test]
    fn test_empty_list_rejects_declared_origins() {
        let cors = CorsStage::new(vec![]);
        assert!(!cors.is_allowed("https://app.example.com"));
    }
}
