//! HTTP route handlers and the application router.
//!
//! - `health`: liveness, version and metrics endpoints (outside the API prefix)
//! - `auth`: registration, login, token refresh, logout and the current user
//! - `admin`: administrator-only user listing
//! - `uploads`: category-checked multipart uploads
//!
//! [`router`] wires them behind the security pipeline. Route-scoped limiters
//! and authentication sit on the individual routes and therefore run inside
//! the pipeline, after its stages.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::middleware::{
    auth::{require_admin, require_auth},
    compression::SkipMarked,
    pipeline_middleware,
    rate_limit::enforce,
    Pipeline,
};
use crate::state::AppState;

pub mod admin;
pub mod auth;
pub mod health;
pub mod uploads;

/// Builds the complete application: routes, route-scoped middleware and the
/// security pipeline around them.
pub fn router(state: AppState) -> Router {
    let cfg = state.config.clone();
    let pipeline = Arc::new(Pipeline::standard(&state));
    let limiters = state.limiters.clone();

    let auth_limited = from_fn_with_state(limiters.auth.clone(), enforce);
    let api_limited = from_fn_with_state(limiters.api.clone(), enforce);
    let strict_limited = from_fn_with_state(limiters.strict.clone(), enforce);
    let authenticated = from_fn_with_state(state.clone(), require_auth);

    // `.layer(inner).layer(outer)`: authentication runs before the role check
    let api = Router::new()
        .route("/auth/register", post(auth::register).layer(auth_limited.clone()))
        .route("/auth/login", post(auth::login).layer(auth_limited))
        .route("/auth/refresh", post(auth::refresh).layer(api_limited.clone()))
        .route("/auth/logout", post(auth::logout).layer(authenticated.clone()))
        .route("/auth/me", get(auth::me).layer(api_limited.clone()).layer(authenticated.clone()))
        .route(
            "/admin/users",
            get(admin::list_users).layer(from_fn(require_admin)).layer(authenticated.clone()),
        )
        .route("/uploads", get(uploads::list_mine).layer(api_limited).layer(authenticated.clone()))
        .route("/uploads/{category}", post(uploads::upload).layer(strict_limited).layer(authenticated));

    Router::new()
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        .route("/metrics", get(health::metrics))
        .nest(&cfg.server.api_prefix, api)
        .fallback(health::not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(cfg.limits.max_body_bytes))
        .layer(TimeoutLayer::new(cfg.request_timeout()))
        .layer(from_fn_with_state(pipeline, pipeline_middleware))
        .layer(CompressionLayer::new().compress_when(SkipMarked::new()))
        .layer(TraceLayer::new_for_http())
}
