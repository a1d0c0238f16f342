use async_trait::async_trait;
use axum::{body::HttpBody, http::HeaderName, response::Response};
use tower_http::compression::predicate::{DefaultPredicate, Predicate};

use super::pipeline::{Exchange, Outcome, Stage};
use crate::context::RequestContext;

pub static X_NO_COMPRESSION: HeaderName = HeaderName::from_static("x-no-compression");

/// Response marker read by [`SkipMarked`].
#[derive(Debug, Clone, Copy)]
pub struct CompressionBypass;

/// Honors `X-No-Compression` by marking the response for the outer
/// `CompressionLayer`.
pub struct CompressionStage;

#[async_trait]
impl Stage for CompressionStage {
    fn name(&self) -> &'static str {
        "compression"
    }

    async fn process(&self, mut exchange: Exchange) -> Outcome {
        if exchange.parts.headers.contains_key(&X_NO_COMPRESSION) {
            exchange.ctx = exchange.ctx.with_compression_bypass(true);
        }
        exchange.proceed()
    }

    fn finish(&self, ctx: &RequestContext, res: &mut Response) {
        if ctx.compression_bypass() {
            res.extensions_mut().insert(CompressionBypass);
        }
    }
}

/// Default compression rules, except for responses marked with
/// [`CompressionBypass`].
#[derive(Clone, Default)]
pub struct SkipMarked(DefaultPredicate);

impl SkipMarked {
    pub fn new() -> Self {
        Self(DefaultPredicate::new())
    }
}

impl Predicate for SkipMarked {
    fn should_compress<B: HttpBody>(&self, res: &axum::http::Response<B>) -> bool {
        if res.extensions().get::<CompressionBypass>().is_some() {
            return false;
        }
        self.0.should_compress(res)
    }
}
