use async_trait::async_trait;
use axum::http::{header::CONTENT_TYPE, Method};

use super::pipeline::{Exchange, Outcome, Stage};
use crate::error::AppError;

/// Requires an allow-listed `Content-Type` on methods that carry a body.
pub struct ContentTypeStage {
    allowed: Vec<String>,
}

impl ContentTypeStage {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed: allowed.into_iter().map(|t| t.trim().to_ascii_lowercase()).collect() }
    }

    fn exempt(exchange: &Exchange) -> bool {
        let method = &exchange.parts.method;
        if method == Method::GET || method == Method::HEAD || method == Method::OPTIONS {
            return true;
        }
        method == Method::DELETE && exchange.payload.is_empty()
    }

    pub fn check(&self, content_type: Option<&str>) -> Result<(), AppError> {
        let Some(ct) = content_type else {
            return Err(AppError::MissingContentType);
        };
        let essence = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if essence.is_empty() {
            return Err(AppError::MissingContentType);
        }
        if self.allowed.iter().any(|a| *a == essence) {
            Ok(())
        } else {
            Err(AppError::UnsupportedContentType(essence))
        }
    }
}

#[async_trait]
impl Stage for ContentTypeStage {
    fn name(&self) -> &'static str {
        "content_type"
    }

    async fn process(&self, exchange: Exchange) -> Outcome {
        if Self::exempt(&exchange) {
            return exchange.proceed();
        }
        match self.check(exchange.header(CONTENT_TYPE.as_str())) {
            Ok(()) => exchange.proceed(),
            Err(err) => exchange.fail(err),
        }
    }
}
