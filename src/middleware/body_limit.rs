use async_trait::async_trait;
use axum::{
    body::Body,
    http::header::{CONTENT_LENGTH, CONTENT_TYPE},
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use url::form_urlencoded;

use super::pipeline::{Exchange, Outcome, Payload, Stage};
use crate::crypto::{mask_sensitive_data, DEFAULT_SENSITIVE_FIELDS};
use crate::error::AppError;

/// Body size ceiling and parsing.
///
/// A declared `Content-Length` above the ceiling is refused before reading.
/// Otherwise the body is buffered with a hard cap, which also catches chunked
/// bodies that lie about (or omit) their length. JSON and urlencoded bodies
/// are parsed here so later stages can walk their string leaves; everything
/// else, multipart included, is handed on as raw bytes.
pub struct BodyLimitStage {
    max_bytes: usize,
}

impl BodyLimitStage {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    async fn buffer(&self, body: Body) -> Result<axum::body::Bytes, AppError> {
        match Limited::new(body, self.max_bytes).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                Err(AppError::PayloadTooLarge { limit: self.max_bytes })
            }
            Err(e) => Err(AppError::validation("body", format!("could not be read: {}", e))),
        }
    }
}

#[async_trait]
impl Stage for BodyLimitStage {
    fn name(&self) -> &'static str {
        "body_limit"
    }

    async fn process(&self, mut exchange: Exchange) -> Outcome {
        let declared = exchange
            .header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.max_bytes) {
            return exchange.fail(AppError::PayloadTooLarge { limit: self.max_bytes });
        }

        let body = match std::mem::replace(&mut exchange.payload, Payload::Raw(Default::default())) {
            Payload::Pending(body) => body,
            other => {
                exchange.payload = other;
                return exchange.proceed();
            }
        };
        let bytes = match self.buffer(body).await {
            Ok(bytes) => bytes,
            Err(err) => return exchange.fail(err),
        };
        if bytes.is_empty() {
            return exchange.proceed();
        }

        let mime = exchange
            .header(CONTENT_TYPE.as_str())
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .unwrap_or_default();

        let payload = if mime == "application/json" || mime.ends_with("+json") {
            match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(value) => {
                    tracing::debug!(
                        request_id = %exchange.ctx.request_id(),
                        body = %mask_sensitive_data(&value, DEFAULT_SENSITIVE_FIELDS),
                        "request body"
                    );
                    Payload::Json(value)
                }
                Err(e) => return exchange.fail(AppError::validation("body", format!("malformed JSON: {}", e))),
            }
        } else if mime == "application/x-www-form-urlencoded" {
            Payload::Form(form_urlencoded::parse(&bytes).into_owned().collect())
        } else {
            Payload::Raw(bytes)
        };
        exchange.payload = payload;
        exchange.proceed()
    }
}
