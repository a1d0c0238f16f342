use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, RawPathParams},
    http::uri::{PathAndQuery, Uri},
};
use url::form_urlencoded;

use super::pipeline::{Exchange, Outcome, Payload, Stage};
use crate::error::AppError;
use crate::sanitize::Sanitizer;

/// Sanitizes the body, the query string and the matched path parameters.
///
/// The query is rewritten in place, so extractors downstream only ever see
/// sanitized values. Path parameters are exposed through the request context.
#[derive(Default)]
pub struct SanitizeStage {
    sanitizer: Sanitizer,
}

impl SanitizeStage {
    pub fn new(sanitizer: Sanitizer) -> Self {
        Self { sanitizer }
    }

    fn rewrite_query(&self, uri: &Uri) -> Result<Option<Uri>, AppError> {
        let Some(query) = uri.query() else {
            return Ok(None);
        };
        let pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes()).into_owned().collect();
        let cleaned = self.sanitizer.sanitize_pairs(pairs.clone());
        if cleaned == pairs {
            return Ok(None);
        }

        let encoded = form_urlencoded::Serializer::new(String::new()).extend_pairs(cleaned.iter()).finish();
        let pq = if encoded.is_empty() { uri.path().to_string() } else { format!("{}?{}", uri.path(), encoded) };
        let mut parts = uri.clone().into_parts();
        parts.path_and_query =
            Some(PathAndQuery::try_from(pq).map_err(|e| AppError::validation("query", e.to_string()))?);
        Uri::from_parts(parts).map(Some).map_err(|e| AppError::validation("query", e.to_string()))
    }
}

#[async_trait]
impl Stage for SanitizeStage {
    fn name(&self) -> &'static str {
        "sanitize"
    }

    async fn process(&self, mut exchange: Exchange) -> Outcome {
        let payload = std::mem::replace(&mut exchange.payload, Payload::Raw(Default::default()));
        exchange.payload = match payload {
            Payload::Json(value) => Payload::Json(self.sanitizer.sanitize_value(value)),
            Payload::Form(pairs) => Payload::Form(self.sanitizer.sanitize_pairs(pairs)),
            other => other,
        };

        match self.rewrite_query(&exchange.parts.uri) {
            Ok(Some(uri)) => exchange.parts.uri = uri,
            Ok(None) => {}
            Err(err) => return exchange.fail(err),
        }

        // Absent when the request matched no route
        let params: Vec<(String, String)> = match RawPathParams::from_request_parts(&mut exchange.parts, &()).await {
            Ok(raw) => raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            Err(_) => Vec::new(),
        };
        if !params.is_empty() {
            let params = self.sanitizer.sanitize_pairs(params);
            exchange.ctx = exchange.ctx.with_path_params(params);
        }

        exchange.proceed()
    }
}
