use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;
use crate::token::Claims;

/// Per-request state threaded through the pipeline by value.
///
/// Created at chain entry and owned by the in-flight request. Stages never
/// mutate a context in place; they derive an extended copy through the
/// `with_*` builders.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    identity: Option<Claims>,
    started_at: Instant,
    client_ip: IpAddr,
    origin: Option<String>,
    compression_bypass: bool,
    path_params: Vec<(String, String)>,
}

impl RequestContext {
    pub fn begin(client_ip: IpAddr) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            identity: None,
            started_at: Instant::now(),
            client_ip,
            origin: None,
            compression_bypass: false,
            path_params: Vec::new(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn identity(&self) -> Option<&Claims> {
        self.identity.as_ref()
    }

    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    /// Origin accepted by the CORS stage, if the request declared one.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn compression_bypass(&self) -> bool {
        self.compression_bypass
    }

    /// Sanitized path parameters of the matched route.
    pub fn path_params(&self) -> &[(String, String)] {
        &self.path_params
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn with_identity(self, identity: Claims) -> Self {
        Self { identity: Some(identity), ..self }
    }

    pub fn with_origin(self, origin: String) -> Self {
        Self { origin: Some(origin), ..self }
    }

    pub fn with_compression_bypass(self, bypass: bool) -> Self {
        Self { compression_bypass: bypass, ..self }
    }

    pub fn with_path_params(self, path_params: Vec<(String, String)>) -> Self {
        Self { path_params, ..self }
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("request context missing; pipeline not installed")))
    }
}

/// Extractor for the authenticated caller's claims.
#[derive(Debug, Clone)]
pub struct Identity(pub Claims);

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .and_then(|ctx| ctx.identity().cloned())
            .map(Identity)
            .ok_or_else(|| AppError::Unauthorized("Not authorized, no token".to_string()))
    }
}
