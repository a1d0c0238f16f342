use axum::{
    body::Bytes,
    extract::State,
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue,
    },
    response::{IntoResponse, Response},
    Json,
};

use crate::context::Identity;
use crate::crypto::{self, HashOutput};
use crate::error::{AppError, AppResult, OptionExt};
use crate::sanitize::Sanitizer;
use crate::state::AppState;
use crate::store::NewUser;
use crate::token::{CredentialPair, Role, TokenKind};
use crate::types::{ApiResponse, AuthPayload, Created, LoginRequest, RefreshRequest, RegisterRequest, UserDto};

pub const REFRESH_COOKIE: &str = "refresh_token";

/// Runs the (deliberately slow) password hash off the async workers.
async fn hash_password(password: String) -> AppResult<HashOutput> {
    tokio::task::spawn_blocking(move || crypto::hash(&password, None))
        .await
        .map_err(|e| AppError::Internal(e.into()))
}

async fn password_matches(password: String, hash: String, salt: String) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || crypto::verify_hash(&password, &hash, &salt))
        .await
        .map_err(|e| AppError::Internal(e.into()))
}

/// `refresh_token=<sealed>.<hmac>; HttpOnly; SameSite=Strict; ...`
///
/// The token is encrypted with the server key and the sealed value is signed
/// with the cookie secret.
fn refresh_cookie(state: &AppState, token: &str) -> AppResult<HeaderValue> {
    let sealed = state.crypto.seal(token)?;
    let signature = crypto::sign(&sealed, &state.config.auth.cookie_secret)?;
    let secure = if state.config.is_production() { "; Secure" } else { "" };
    let value = format!(
        "{}={}.{}; Path={}/auth; HttpOnly; SameSite=Strict; Max-Age={}{}",
        REFRESH_COOKIE, sealed, signature, state.config.server.api_prefix, state.config.auth.refresh_ttl_secs, secure
    );
    HeaderValue::from_str(&value).map_err(|e| AppError::Internal(e.into()))
}

fn cleared_cookie(state: &AppState) -> HeaderValue {
    let value = format!(
        "{}=; Path={}/auth; HttpOnly; SameSite=Strict; Max-Age=0",
        REFRESH_COOKIE, state.config.server.api_prefix
    );
    HeaderValue::from_str(&value).unwrap_or(HeaderValue::from_static("refresh_token=; Max-Age=0"))
}

/// Returns the refresh token from the signed cookie, if present and intact.
fn token_from_cookie(state: &AppState, headers: &HeaderMap) -> Option<String> {
    let raw = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == REFRESH_COOKIE)
        .map(|(_, value)| value.to_string())?;
    let (sealed, signature) = raw.rsplit_once('.')?;
    if !crypto::verify_signature(sealed, signature, &state.config.auth.cookie_secret) {
        tracing::warn!("refresh cookie signature mismatch");
        return None;
    }
    match state.crypto.open(sealed) {
        Ok(token) => Some(token),
        Err(e) => {
            tracing::warn!("refresh cookie could not be opened: {}", e);
            None
        }
    }
}

fn with_cookie(cookie: HeaderValue, body: impl IntoResponse) -> Response {
    let mut res = body.into_response();
    res.headers_mut().append(SET_COOKIE, cookie);
    res
}

pub async fn register(State(state): State<AppState>, Json(req): Json<RegisterRequest>) -> AppResult<Response> {
    req.validate()?;

    let persisted = Sanitizer::strict();
    let name = persisted.sanitize_str(&req.name);
    if name.is_empty() {
        return Err(AppError::validation("name", "is required"));
    }
    let hashed = hash_password(req.password).await?;
    let user = state
        .users
        .create(NewUser {
            email: persisted.sanitize_str(&req.email),
            name,
            role: Role::User,
            password_hash: hashed.hash,
            password_salt: hashed.salt,
        })
        .await?;

    let tokens = state.tokens.issue_pair(&user.subject())?;
    let cookie = refresh_cookie(&state, &tokens.refresh_token)?;
    tracing::info!(user_id = %user.id, "user registered");

    let payload = AuthPayload { user: UserDto::from(&user), tokens };
    Ok(with_cookie(cookie, Created(ApiResponse::with_message("User registered successfully", payload))))
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> AppResult<Response> {
    req.validate()?;

    let invalid = || AppError::Unauthorized("Invalid credentials".to_string());
    let user = state.users.find_by_email(req.email.trim()).await?.ok_or_else(invalid)?;
    if !password_matches(req.password, user.password_hash.clone(), user.password_salt.clone()).await? {
        return Err(invalid());
    }

    let tokens = state.tokens.issue_pair(&user.subject())?;
    let cookie = refresh_cookie(&state, &tokens.refresh_token)?;
    tracing::info!(user_id = %user.id, "user logged in");

    let payload = AuthPayload { user: UserDto::from(&user), tokens };
    Ok(with_cookie(cookie, ApiResponse::with_message("Login successful", payload)))
}

/// Exchanges a valid refresh token for a new credential pair. The token is
/// taken from the body (`refreshToken`) or the signed cookie, in that order.
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> AppResult<Response> {
    let req: RefreshRequest = if body.is_empty() {
        RefreshRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::validation("body", e.to_string()))?
    };
    let token = req
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| token_from_cookie(&state, &headers))
        .ok_or_else(|| AppError::Unauthorized("Refresh token required".to_string()))?;

    let claims = state.tokens.verify(&token, TokenKind::Refresh)?;
    let user = state
        .users
        .find_by_id(&claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;

    let tokens: CredentialPair = state.tokens.issue_pair(&user.subject())?;
    let cookie = refresh_cookie(&state, &tokens.refresh_token)?;
    Ok(with_cookie(cookie, ApiResponse::with_message("Token refreshed", tokens)))
}

pub async fn logout(State(state): State<AppState>, Identity(claims): Identity) -> Response {
    tracing::info!(user_id = %claims.sub, "user logged out");
    with_cookie(cleared_cookie(&state), ApiResponse::message("Logged out successfully"))
}

pub async fn me(State(state): State<AppState>, Identity(claims): Identity) -> AppResult<ApiResponse<UserDto>> {
    let user = state.users.find_by_id(&claims.sub).await?.ok_or_not_found("User")?;
    Ok(ApiResponse::ok(UserDto::from(&user)))
}
