//! Central error classification.
//!
//! Every failure raised by a pipeline stage or a downstream handler ends up
//! here exactly once. The classifier maps it onto the fixed taxonomy, picks the
//! HTTP status and a caller-safe message, and renders the uniform error
//! envelope carrying the request id.

use std::sync::Arc;

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::{AppError, ErrorKind};

const GENERIC_MESSAGE: &str = "Internal server error";

/// Marker left on a response whose body still needs classification with the
/// request's context.
#[derive(Clone)]
pub struct PendingFailure(pub Arc<AppError>);

/// The result of classifying one failure.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub status: StatusCode,
    pub message: String,
    pub request_id: String,
    pub errors: Vec<String>,
    /// Only populated outside production.
    pub stack: Option<String>,
    pub retry_after_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorClassifier {
    production: bool,
}

impl ErrorClassifier {
    pub fn new(production: bool) -> Self {
        Self { production }
    }

    pub fn classify(&self, err: &AppError, request_id: &str) -> ErrorRecord {
        let mut record = ErrorRecord {
            kind: err.kind(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: GENERIC_MESSAGE.to_string(),
            request_id: request_id.to_string(),
            errors: Vec::new(),
            stack: None,
            retry_after_seconds: None,
        };

        // Order matters: first match wins.
        let (status, message) = match err {
            AppError::CorsRejected { .. } => (StatusCode::FORBIDDEN, "Not allowed by CORS".to_string()),
            AppError::RateLimitExceeded { message, retry_after_seconds } => {
                record.retry_after_seconds = Some(*retry_after_seconds);
                (StatusCode::TOO_MANY_REQUESTS, message.clone())
            }
            AppError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "Request entity too large".to_string())
            }
            AppError::ValidationFailed(fields) => {
                record.errors = fields.iter().map(|f| f.to_string()).collect();
                (StatusCode::BAD_REQUEST, "Validation failed".to_string())
            }
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token".to_string()),
            AppError::TokenExpired => (StatusCode::UNAUTHORIZED, "Token expired".to_string()),
            AppError::SuspiciousInput => {
                (StatusCode::BAD_REQUEST, "Suspicious activity detected".to_string())
            }
            AppError::MissingContentType => {
                (StatusCode::BAD_REQUEST, "Content-Type header is required".to_string())
            }
            AppError::UnsupportedContentType(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported content type".to_string())
            }
            AppError::DecryptionFailed => (StatusCode::BAD_REQUEST, "Unable to decrypt payload".to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::InvalidFileType(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Invalid file type".to_string()),
            AppError::FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "File too large".to_string()),
            AppError::Internal(e) => {
                if !self.production {
                    record.stack = Some(format!("{:?}", e));
                }
                (StatusCode::INTERNAL_SERVER_ERROR, self.unclassified_message(StatusCode::INTERNAL_SERVER_ERROR, e))
            }
            AppError::Unclassified { status, source } => {
                if !self.production {
                    record.stack = Some(format!("{:?}", source));
                }
                (*status, self.unclassified_message(*status, source))
            }
        };

        record.status = status;
        record.message = message;
        record
    }

    /// Classifies and renders the error envelope.
    pub fn render(&self, err: &AppError, request_id: &str) -> Response {
        let record = self.classify(err, request_id);
        if record.status.is_server_error() {
            tracing::error!(request_id = %record.request_id, kind = record.kind.as_str(), "{}", err);
        } else {
            tracing::debug!(request_id = %record.request_id, kind = record.kind.as_str(), "{}", err);
        }
        record.into_response()
    }

    fn unclassified_message(&self, status: StatusCode, source: &anyhow::Error) -> String {
        if self.production {
            if status.is_client_error() {
                status.canonical_reason().unwrap_or(GENERIC_MESSAGE).to_string()
            } else {
                GENERIC_MESSAGE.to_string()
            }
        } else {
            source.to_string()
        }
    }
}

impl IntoResponse for ErrorRecord {
    fn into_response(self) -> Response {
        let mut body = json!({
            "success": false,
            "message": self.message,
            "requestId": self.request_id,
        });
        if !self.errors.is_empty() {
            body["errors"] = json!(self.errors);
        }
        if let Some(stack) = self.stack {
            body["stack"] = json!(stack);
        }

        let mut res = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_seconds {
            if let Ok(v) = HeaderValue::from_str(&secs.to_string()) {
                res.headers_mut().insert(RETRY_AFTER, v);
            }
        }
        res
    }
}
