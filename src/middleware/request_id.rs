use async_trait::async_trait;
use axum::{
    http::{HeaderName, HeaderValue},
    response::Response,
};

use super::pipeline::{Exchange, Outcome, Stage};
use crate::context::RequestContext;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Publishes the context's request id: on the inbound request for handlers
/// and logs, and as `X-Request-ID` on every response.
pub struct RequestIdStage;

#[async_trait]
impl Stage for RequestIdStage {
    fn name(&self) -> &'static str {
        "request_id"
    }

    async fn process(&self, mut exchange: Exchange) -> Outcome {
        // An id supplied by the caller is never trusted; ours replaces it.
        match HeaderValue::from_str(exchange.ctx.request_id()) {
            Ok(v) => {
                exchange.parts.headers.insert(X_REQUEST_ID.clone(), v);
            }
            Err(_) => {
                exchange.parts.headers.remove(&X_REQUEST_ID);
            }
        }
        exchange.proceed()
    }

    fn finish(&self, ctx: &RequestContext, res: &mut Response) {
        if let Ok(v) = HeaderValue::from_str(ctx.request_id()) {
            res.headers_mut().insert(X_REQUEST_ID.clone(), v);
        }
    }
}
