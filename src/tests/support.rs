//! Shared fixtures for the router and client suites.

use axum::{
    body::Body,
    http::{header, Request},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;

use crate::config::{AppConfig, Environment};
use crate::routes;
use crate::state::AppState;
use crate::store::{NewUser, UserRecord};
use crate::token::{CredentialPair, Role};

pub const ORIGIN: &str = "https://app.example.com";
pub const ACCESS_SECRET: &str = "access-secret-access-secret-0123456789";
pub const REFRESH_SECRET: &str = "refresh-secret-refresh-secret-0123456789";

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.server.environment = Environment::Test;
    cfg.auth.access_secret = ACCESS_SECRET.to_string();
    cfg.auth.refresh_secret = REFRESH_SECRET.to_string();
    cfg.auth.cookie_secret = "cookie-secret-cookie-secret-0123456789".to_string();
    cfg.cors.allowed_origins = vec![ORIGIN.to_string()];
    cfg
}

pub fn setup_app_with(cfg: AppConfig) -> (Router, AppState) {
    let state = AppState::new(cfg).unwrap();
    (routes::router(state.clone()), state)
}

pub fn setup_app() -> (Router, AppState) {
    setup_app_with(test_config())
}

/// Inserts a user directly, bypassing password hashing, and issues a pair.
pub async fn seed_user(state: &AppState, email: &str, role: Role) -> (UserRecord, CredentialPair) {
    let user = state
        .users
        .create(NewUser {
            email: email.to_string(),
            name: "Test User".to_string(),
            role,
            password_hash: "unused".to_string(),
            password_salt: "unused".to_string(),
        })
        .await
        .unwrap();
    let pair = state.tokens.issue_pair(&user.subject()).unwrap();
    (user, pair)
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn authed_get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(res: Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn request_id(res: &Response) -> String {
    res.headers().get("x-request-id").unwrap().to_str().unwrap().to_string()
}
