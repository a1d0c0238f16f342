use std::fmt;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::classifier::{ErrorClassifier, PendingFailure};
use crate::crypto::CryptoError;
use crate::store::StoreError;
use crate::token::TokenError;

/// The fixed failure taxonomy every error response is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CorsRejected,
    RateLimitExceeded,
    PayloadTooLarge,
    SuspiciousInput,
    MissingContentType,
    UnsupportedContentType,
    TokenExpired,
    InvalidToken,
    ValidationFailed,
    DecryptionFailed,
    NotFound,
    Unauthorized,
    Forbidden,
    InvalidFileType,
    FileTooLarge,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CorsRejected => "CORS_REJECTED",
            ErrorKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorKind::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorKind::SuspiciousInput => "SUSPICIOUS_INPUT",
            ErrorKind::MissingContentType => "MISSING_CONTENT_TYPE",
            ErrorKind::UnsupportedContentType => "UNSUPPORTED_CONTENT_TYPE",
            ErrorKind::TokenExpired => "TOKEN_EXPIRED",
            ErrorKind::InvalidToken => "INVALID_TOKEN",
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::DecryptionFailed => "DECRYPTION_FAILED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::InvalidFileType => "INVALID_FILE_TYPE",
            ErrorKind::FileTooLarge => "FILE_TOO_LARGE",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// A single field-level validation problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// The primary error type for the application.
///
/// Pipeline stages and handlers fail fast with one of these; rendering into an
/// HTTP response is the job of the [`ErrorClassifier`].
#[derive(Debug)]
pub enum AppError {
    /// The declared `Origin` is not on the allow-list.
    CorsRejected { origin: String },
    /// A rate limiter refused the request.
    RateLimitExceeded {
        /// Caller-facing message configured on the limiter policy.
        message: String,
        retry_after_seconds: u64,
    },
    /// The request body exceeds the configured ceiling.
    PayloadTooLarge { limit: usize },
    /// A denylist pattern matched one of the request inputs.
    SuspiciousInput,
    MissingContentType,
    UnsupportedContentType(String),
    TokenExpired,
    InvalidToken,
    /// One or more fields failed validation.
    ValidationFailed(Vec<FieldError>),
    DecryptionFailed,
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    InvalidFileType(String),
    FileTooLarge { limit: usize },
    /// Unexpected failure; rendered as 500.
    Internal(anyhow::Error),
    /// Failure with a declared status but no taxonomy entry.
    Unclassified { status: StatusCode, source: anyhow::Error },
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::ValidationFailed(vec![FieldError::new(field, message)])
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::CorsRejected { .. } => ErrorKind::CorsRejected,
            AppError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            AppError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            AppError::SuspiciousInput => ErrorKind::SuspiciousInput,
            AppError::MissingContentType => ErrorKind::MissingContentType,
            AppError::UnsupportedContentType(_) => ErrorKind::UnsupportedContentType,
            AppError::TokenExpired => ErrorKind::TokenExpired,
            AppError::InvalidToken => ErrorKind::InvalidToken,
            AppError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            AppError::DecryptionFailed => ErrorKind::DecryptionFailed,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::InvalidFileType(_) => ErrorKind::InvalidFileType,
            AppError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            AppError::Internal(_) | AppError::Unclassified { .. } => ErrorKind::InternalError,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::CorsRejected { origin } => write!(f, "Origin not allowed by CORS: {}", origin),
            AppError::RateLimitExceeded { message, retry_after_seconds } => {
                write!(f, "{} (retry after {} seconds)", message, retry_after_seconds)
            }
            AppError::PayloadTooLarge { limit } => {
                write!(f, "Request body exceeds maximum size of {} bytes", limit)
            }
            AppError::SuspiciousInput => write!(f, "Suspicious input detected"),
            AppError::MissingContentType => write!(f, "Content-Type header is required"),
            AppError::UnsupportedContentType(ct) => write!(f, "Unsupported content type: {}", ct),
            AppError::TokenExpired => write!(f, "Token expired"),
            AppError::InvalidToken => write!(f, "Invalid token"),
            AppError::ValidationFailed(errors) => {
                let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                write!(f, "Validation failed: {}", joined.join(", "))
            }
            AppError::DecryptionFailed => write!(f, "Decryption failed"),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::InvalidFileType(mime) => write!(f, "Invalid file type: {}", mime),
            AppError::FileTooLarge { limit } => write!(f, "File exceeds maximum size of {} bytes", limit),
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::Unclassified { status, source } => write!(f, "{}: {}", status, source),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Internal(e) => Some(e.as_ref()),
            AppError::Unclassified { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Handler errors are not rendered here: the response carries the failure so
/// the pipeline can classify it once, with the request's id attached. Outside
/// the pipeline (unit tests, bare routers) the production-safe rendering is
/// used as-is.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let failure = Arc::new(self);
        let mut res = ErrorClassifier::new(true).classify(&failure, "unassigned").into_response();
        res.extensions_mut().insert(PendingFailure(failure));
        res
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AppError::TokenExpired,
            TokenError::Invalid(_) => AppError::InvalidToken,
            TokenError::Issue(e) => AppError::Internal(anyhow::Error::new(e)),
        }
    }
}

impl From<CryptoError> for AppError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed => AppError::DecryptionFailed,
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { field } => AppError::validation(field, "already exists"),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the application.
pub type AppResult<T> = Result<T, AppError>;

/// An extension trait for `Option` that converts `None` into a `NotFound` error.
pub trait OptionExt<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(format!("{} not found", entity)))
    }
}
