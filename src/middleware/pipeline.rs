//! The ordered security pipeline.
//!
//! A request enters as an [`Exchange`] and is handed to each [`Stage`] in
//! turn. A stage either passes the (possibly extended) exchange on or
//! terminates with a failure or a ready response. Failures from stages and
//! from handlers are rendered exactly once by the classifier, after which the
//! `finish` hooks of every stage that was entered run in reverse order.

use std::{
    future::Future,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::{connect_info::ConnectInfo, Request, State},
    http::{header::CONTENT_LENGTH, header::CONTENT_TYPE, request::Parts, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use url::form_urlencoded;

use super::{
    anomaly::AnomalyStage, body_limit::BodyLimitStage, compression::CompressionStage,
    content_type::ContentTypeStage, cors::CorsStage, ip::client_ip, rate_limit::RateLimitStage,
    request_id::RequestIdStage, sanitize_input::SanitizeStage, security_headers::SecurityHeadersStage,
};
use crate::classifier::{ErrorClassifier, PendingFailure};
use crate::context::RequestContext;
use crate::error::AppError;
use crate::metrics::Metrics;
use crate::state::AppState;

/// Upper bound when reading the body of a bare (non-envelope) error response.
const BARE_ERROR_BODY_LIMIT: usize = 16 * 1024;

/// The request body as it moves through the stages.
#[derive(Debug)]
pub enum Payload {
    /// Not read yet.
    Pending(Body),
    /// Buffered, not parsed.
    Raw(Bytes),
    Json(Value),
    Form(Vec<(String, String)>),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Pending(_) => false,
            Payload::Raw(bytes) => bytes.is_empty(),
            Payload::Json(_) => false,
            Payload::Form(pairs) => pairs.is_empty(),
        }
    }
}

/// One in-flight request: its context, head and body.
#[derive(Debug)]
pub struct Exchange {
    pub ctx: RequestContext,
    pub parts: Parts,
    pub payload: Payload,
}

impl Exchange {
    pub fn new(ctx: RequestContext, req: Request) -> Self {
        let (parts, body) = req.into_parts();
        Self { ctx, parts, payload: Payload::Pending(body) }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn proceed(self) -> Outcome {
        Outcome::Continue(self)
    }

    pub fn fail(self, err: AppError) -> Outcome {
        Outcome::Terminate { ctx: self.ctx, reply: Reply::Failure(err) }
    }

    pub fn respond(self, res: Response) -> Outcome {
        Outcome::Terminate { ctx: self.ctx, reply: Reply::Response(res) }
    }

    /// Reassembles the request for the handler. Parsed bodies are
    /// re-serialized and the context is placed in the extensions.
    pub fn into_request(self) -> Result<Request, AppError> {
        let Exchange { ctx, mut parts, payload } = self;
        let body = match payload {
            Payload::Pending(body) => body,
            Payload::Raw(bytes) => Body::from(bytes),
            Payload::Json(value) => {
                let bytes = serde_json::to_vec(&value).map_err(|e| AppError::Internal(e.into()))?;
                parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                Body::from(bytes)
            }
            Payload::Form(pairs) => {
                let encoded = form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs.iter()).finish();
                parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(encoded.len()));
                Body::from(encoded)
            }
        };
        parts.extensions.insert(ctx);
        Ok(Request::from_parts(parts, body))
    }
}

pub enum Reply {
    Failure(AppError),
    Response(Response),
}

pub enum Outcome {
    Continue(Exchange),
    Terminate { ctx: RequestContext, reply: Reply },
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, exchange: Exchange) -> Outcome;

    /// Runs on the way out for every entered stage, failures included.
    fn finish(&self, _ctx: &RequestContext, _res: &mut Response) {}
}

pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    classifier: ErrorClassifier,
    metrics: Metrics,
    trust_proxy: bool,
    max_body_bytes: usize,
    /// Upper bound for the stages as a whole (body reads included).
    stage_timeout: Option<Duration>,
}

impl Pipeline {
    pub fn new(
        stages: Vec<Arc<dyn Stage>>,
        classifier: ErrorClassifier,
        metrics: Metrics,
        trust_proxy: bool,
        max_body_bytes: usize,
    ) -> Self {
        Self { stages, classifier, metrics, trust_proxy, max_body_bytes, stage_timeout: None }
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.stage_timeout = Some(limit);
        self
    }

    /// The fixed stage order every request passes.
    pub fn standard(state: &AppState) -> Self {
        let cfg = &state.config;
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(RequestIdStage),
            Arc::new(SecurityHeadersStage::from_config(cfg.security.as_ref())),
            Arc::new(CorsStage::new(cfg.cors.allowed_origins.clone())),
            Arc::new(RateLimitStage::new(state.limiters.general.clone(), cfg.server.api_prefix.clone())),
            Arc::new(BodyLimitStage::new(cfg.limits.max_body_bytes)),
            Arc::new(SanitizeStage::default()),
            Arc::new(AnomalyStage),
            Arc::new(ContentTypeStage::new(cfg.limits.allowed_content_types.clone())),
            Arc::new(CompressionStage),
        ];
        Self::new(
            stages,
            state.classifier,
            state.metrics.clone(),
            cfg.server.trust_proxy,
            cfg.limits.max_body_bytes,
        )
        .with_timeout(cfg.request_timeout())
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Drives `req` through the stages and, if none terminates, the handler.
    pub async fn handle<F, Fut>(&self, req: Request, handler: F) -> Response
    where
        F: FnOnce(Request) -> Fut + Send,
        Fut: Future<Output = Response> + Send,
    {
        self.metrics.inc_requests();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let remote = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0.ip());
        let ip: IpAddr = client_ip(req.headers(), remote, self.trust_proxy);

        let exchange = Exchange::new(RequestContext::begin(ip), req);
        let started = exchange.ctx.clone();
        let mut entered = 0;

        let advanced = match self.stage_timeout {
            Some(limit) => {
                let bounded = tokio::time::timeout(limit, self.advance(exchange, &mut entered)).await;
                bounded.unwrap_or_else(|_| {
                    let stage = self.stages.get(entered.saturating_sub(1)).map(|s| s.name()).unwrap_or("pipeline");
                    Err((stage, started, Reply::Failure(timed_out())))
                })
            }
            None => self.advance(exchange, &mut entered).await,
        };

        let (ctx, res) = match advanced {
            Ok(exchange) => {
                let ctx = exchange.ctx.clone();
                match exchange.into_request() {
                    Ok(req) => {
                        let res = handler(req).await;
                        (ctx, res)
                    }
                    Err(err) => {
                        let res = self.render(&ctx, &err);
                        (ctx, res)
                    }
                }
            }
            Err((stage, ctx, Reply::Failure(err))) => {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    stage,
                    client = %ctx.client_ip(),
                    "request rejected: {}",
                    err
                );
                let res = self.render(&ctx, &err);
                (ctx, res)
            }
            Err((_, ctx, Reply::Response(res))) => (ctx, res),
        };

        let mut res = self.settle(&ctx, res).await;
        for stage in self.stages[..entered].iter().rev() {
            stage.finish(&ctx, &mut res);
        }

        tracing::info!(
            request_id = %ctx.request_id(),
            method = %method,
            path = %path,
            status = res.status().as_u16(),
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            "request completed"
        );
        res
    }

    async fn advance(
        &self,
        mut exchange: Exchange,
        entered: &mut usize,
    ) -> Result<Exchange, (&'static str, RequestContext, Reply)> {
        for stage in &self.stages {
            *entered += 1;
            match stage.process(exchange).await {
                Outcome::Continue(next) => exchange = next,
                Outcome::Terminate { ctx, reply } => return Err((stage.name(), ctx, reply)),
            }
        }
        Ok(exchange)
    }

    fn render(&self, ctx: &RequestContext, err: &AppError) -> Response {
        self.metrics.record_failure(err.kind());
        self.classifier.render(err, ctx.request_id())
    }

    /// Renders pending failures from handlers and wraps bare framework error
    /// responses (extractor rejections, timeouts, 405s) into the envelope.
    async fn settle(&self, ctx: &RequestContext, res: Response) -> Response {
        if let Some(PendingFailure(failure)) = res.extensions().get::<PendingFailure>().cloned() {
            return self.render(ctx, &failure);
        }
        if !is_bare_error(&res) {
            return res;
        }
        let status = res.status();
        let text = axum::body::to_bytes(res.into_body(), BARE_ERROR_BODY_LIMIT)
            .await
            .map(|b| String::from_utf8_lossy(&b).trim().to_string())
            .unwrap_or_default();
        let err = bare_error(status, text, self.max_body_bytes);
        self.render(ctx, &err)
    }
}

fn is_bare_error(res: &Response) -> bool {
    let status = res.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return false;
    }
    let is_json = res
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);
    !is_json
}

fn timed_out() -> AppError {
    let status = StatusCode::REQUEST_TIMEOUT;
    AppError::Unclassified { status, source: anyhow::anyhow!(status.canonical_reason().unwrap_or("Request Timeout")) }
}

fn bare_error(status: StatusCode, text: String, max_body_bytes: usize) -> AppError {
    let reason = if text.is_empty() { status.canonical_reason().unwrap_or("error").to_string() } else { text };
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => AppError::validation("body", reason),
        StatusCode::UNAUTHORIZED => AppError::Unauthorized(reason),
        StatusCode::FORBIDDEN => AppError::Forbidden(reason),
        StatusCode::NOT_FOUND => AppError::NotFound("Route not found".to_string()),
        StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge { limit: max_body_bytes },
        StatusCode::UNSUPPORTED_MEDIA_TYPE => AppError::UnsupportedContentType(reason),
        _ => AppError::Unclassified { status, source: anyhow::anyhow!(reason) },
    }
}

/// Axum middleware that runs the pipeline around the matched route.
///
/// Install with `Router::layer` so route parameters are already resolved.
pub async fn pipeline_middleware(State(pipeline): State<Arc<Pipeline>>, req: Request, next: Next) -> Response {
    pipeline.handle(req, move |req| next.run(req)).await
}
