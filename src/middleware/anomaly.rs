//! Denylist-based detection of injection attempts.
//!
//! The patterns are deliberately coarse; false positives on odd but benign
//! input are accepted.

use async_trait::async_trait;
use axum::http::header::USER_AGENT;
use lazy_static::lazy_static;
use regex::RegexSet;
use serde_json::Value;
use url::form_urlencoded;

use super::pipeline::{Exchange, Outcome, Payload, Stage};
use crate::error::AppError;

lazy_static! {
    static ref SUSPICIOUS: RegexSet = RegexSet::new([
        // SQL boolean tautologies: ' or 1=1, and 'a'='a
        r#"(?i)\b(or|and)\b\s+['"]?\w+['"]?\s*=\s*['"]?\w+"#,
        // SQL union select
        r"(?i)\bunion\b(\s+all)?\s+select\b",
        r"(?i)<script[^>]*>",
        // Path traversal
        r"\.\./|\.\.\\",
        // Shell command chaining
        r"[;&|]\s*(rm|cat|curl|wget|nc|bash|sh|powershell)\b",
        r"`[^`]*`",
        r"\$\(",
    ])
    .unwrap();
}

pub fn is_suspicious(input: &str) -> bool {
    SUSPICIOUS.is_match(input)
}

/// Check if a path contains traversal attempts, including encoded forms.
fn contains_path_traversal(path: &str) -> bool {
    let lower = path.to_lowercase();

    if path.contains("/..") || path.contains("\\..") || path.starts_with("..") {
        return true;
    }
    if path.contains("....") {
        return true;
    }

    // URL-encoded variants (single and double encoding)
    let encoded_patterns = [
        "%2e%2e",
        "%252e%252e",
        "%2e/",
        "%252e%2f",
        "/%2e",
        "%2f%2e",
        "%2e%5c",
        "%5c%2e",
        "%00",
    ];
    if encoded_patterns.iter().any(|p| lower.contains(p)) {
        return true;
    }

    path.contains('\0')
}

/// Check for suspicious user agents (simple heuristic)
fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua_lower = ua.to_lowercase();
    ua_lower.contains("scanner")
        || (ua_lower.contains("crawler") && !ua_lower.contains("googlebot") && !ua_lower.contains("bingbot"))
        || ua_lower.contains("nikto")
        || ua_lower.contains("sqlmap")
        || ua_lower.contains("havij")
        || ua_lower.contains("acunetix")
}

/// Removes control characters and limits length for log output.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .take(200)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
}

fn any_leaf_suspicious(value: &Value) -> bool {
    match value {
        Value::String(s) => is_suspicious(s),
        Value::Array(items) => items.iter().any(any_leaf_suspicious),
        Value::Object(map) => map.values().any(any_leaf_suspicious),
        _ => false,
    }
}

/// Returns the name of the first input that matched, if any.
fn find_anomaly(exchange: &Exchange) -> Option<&'static str> {
    let path = exchange.parts.uri.path();
    if contains_path_traversal(path) || is_suspicious(path) {
        return Some("path");
    }
    if let Some(query) = exchange.parts.uri.query() {
        if form_urlencoded::parse(query.as_bytes()).any(|(k, v)| is_suspicious(&k) || is_suspicious(&v)) {
            return Some("query");
        }
    }
    if exchange.ctx.path_params().iter().any(|(_, v)| is_suspicious(v) || contains_path_traversal(v)) {
        return Some("params");
    }
    let body = match &exchange.payload {
        Payload::Json(value) => any_leaf_suspicious(value),
        Payload::Form(pairs) => pairs.iter().any(|(_, v)| is_suspicious(v)),
        Payload::Raw(_) | Payload::Pending(_) => false,
    };
    body.then_some("body")
}

pub struct AnomalyStage;

#[async_trait]
impl Stage for AnomalyStage {
    fn name(&self) -> &'static str {
        "anomaly"
    }

    async fn process(&self, exchange: Exchange) -> Outcome {
        if let Some(ua) = exchange.header(USER_AGENT.as_str()) {
            if is_suspicious_user_agent(ua) {
                tracing::warn!(
                    request_id = %exchange.ctx.request_id(),
                    client = %exchange.ctx.client_ip(),
                    "Suspicious user agent detected: {}",
                    sanitize_for_logging(ua)
                );
            }
        }

        if let Some(input) = find_anomaly(&exchange) {
            tracing::warn!(
                request_id = %exchange.ctx.request_id(),
                client = %exchange.ctx.client_ip(),
                input,
                uri = %sanitize_for_logging(&exchange.parts.uri.to_string()),
                "Suspicious input detected"
            );
            return exchange.fail(AppError::SuspiciousInput);
        }
        exchange.proceed()
    }
}
