//! Middleware components for HTTP request processing.
//!
//! The security pipeline ([`pipeline`]) runs every request through a fixed
//! sequence of stages, one module each. Route-scoped concerns (bearer
//! authentication, per-route rate limits) are plain axum middleware layered
//! on individual routes inside the pipeline.

pub mod anomaly;
pub mod auth;
pub mod body_limit;
pub mod compression;
pub mod content_type;
pub mod cors;
pub mod ip;
pub mod pipeline;
pub mod rate_limit;
pub mod request_id;
pub mod sanitize_input;
pub mod security_headers;

pub use pipeline::{pipeline_middleware, Pipeline, Stage};
pub use rate_limit::{RateLimiter, RateLimiters};
