use std::sync::Arc;
use std::time::Duration;

use reqwest::{header::RETRY_AFTER, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;

use super::storage::SecureStorage;
use crate::middleware::rate_limit::{Decision, RateLimitPolicy, RateLimiter};
use crate::token::{decode_unverified, CredentialPair};
use crate::types::{ApiResponse, AuthPayload, UserDto};

pub const X_CSRF_TOKEN: &str = "x-csrf-token";
const ANONYMOUS: &str = "anonymous";
const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";
const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";

/// User-facing failure categories. Server messages pass through only for
/// validation failures, which are already caller-safe.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(&'static str),
    #[error("not authorized")]
    Unauthorized,
    #[error("resource not found")]
    NotFound,
    #[error("{message}")]
    Validation { message: String, errors: Vec<String> },
    #[error("too many requests")]
    RateLimited { retry_after_seconds: Option<u64> },
    #[error("server error")]
    Server,
}

impl ClientError {
    fn network(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Network("request timed out")
        } else {
            ClientError::Network("server unreachable")
        }
    }
}

/// Notified when the session ends involuntarily, i.e. when the caller must
/// re-authenticate.
pub trait SessionListener: Send + Sync {
    fn session_expired(&self);
}

#[derive(Debug, Default)]
pub struct NoopListener;

impl SessionListener for NoopListener {
    fn session_expired(&self) {}
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Scheme, host and port, e.g. `http://127.0.0.1:5000`.
    pub base_url: String,
    pub api_prefix: String,
    pub timeout: Duration,
    pub rate_limit_max_requests: usize,
    pub rate_limit_window_secs: u64,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_prefix: "/api".to_string(),
            timeout: Duration::from_secs(30),
            rate_limit_max_requests: 100,
            rate_limit_window_secs: 60,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[serde(default)]
    errors: Vec<String>,
}

/// Token-aware API client.
///
/// Before dispatch it fails fast on an expired access token, attaches the
/// bearer credential, adds the session CSRF token to mutations and applies a
/// per-user rate limit. A 401 triggers at most one refresh-and-replay;
/// concurrent 401s share a single refresh.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    storage: SecureStorage,
    limiter: RateLimiter,
    refresh_lock: Arc<Mutex<()>>,
    listener: Arc<dyn SessionListener>,
}

impl ApiClient {
    pub fn new(config: ClientConfig, storage: SecureStorage) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|_| ClientError::Network("client could not be initialized"))?;
        let limiter = RateLimiter::new(RateLimitPolicy::new(
            "client",
            config.rate_limit_max_requests,
            config.rate_limit_window_secs,
            "Too many requests, please slow down.",
        ));
        Ok(Self {
            http,
            config: Arc::new(config),
            storage,
            limiter,
            refresh_lock: Arc::new(Mutex::new(())),
            listener: Arc::new(NoopListener),
        })
    }

    pub fn with_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn storage(&self) -> &SecureStorage {
        &self.storage
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send(Method::GET, path, None).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        self.send(Method::POST, path, Some(to_value(body)?)).await
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        self.send(Method::PUT, path, Some(to_value(body)?)).await
    }

    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        self.send(Method::PATCH, path, Some(to_value(body)?)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send(Method::DELETE, path, None).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserDto, ClientError> {
        let res: ApiResponse<AuthPayload> =
            self.post(LOGIN_PATH, &json!({ "email": email, "password": password })).await?;
        self.store_session(res)
    }

    pub async fn register(&self, email: &str, password: &str, name: &str) -> Result<UserDto, ClientError> {
        let res: ApiResponse<AuthPayload> = self
            .post(REGISTER_PATH, &json!({ "email": email, "password": password, "name": name }))
            .await?;
        self.store_session(res)
    }

    /// Ends the session locally even when the server cannot be reached.
    pub async fn logout(&self) {
        if self.storage.access_token().is_some() {
            if let Err(e) = self.send::<Value>(Method::POST, LOGOUT_PATH, None).await {
                tracing::debug!(error = %e, "logout request failed");
            }
        }
        self.storage.clear_credentials();
    }

    pub fn current_user(&self) -> Option<UserDto> {
        self.storage.user()
    }

    fn store_session(&self, res: ApiResponse<AuthPayload>) -> Result<UserDto, ClientError> {
        let payload = res.data.ok_or(ClientError::Server)?;
        self.storage.set_credentials(&payload.tokens).map_err(|_| ClientError::Server)?;
        self.storage.set_user(&payload.user).map_err(|_| ClientError::Server)?;
        Ok(payload.user)
    }

    async fn send<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T, ClientError> {
        let (res, used_token) = self.dispatch(&method, path, body.as_ref()).await?;
        if res.status() != StatusCode::UNAUTHORIZED || is_credential_endpoint(path) {
            return read_response(res).await;
        }

        self.refresh_session(used_token.as_deref()).await?;
        // The replay is final: a second 401 surfaces as Unauthorized
        let (retried, _) = self.dispatch(&method, path, body.as_ref()).await?;
        read_response(retried).await
    }

    /// Sends one attempt and returns the access token it carried.
    async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(reqwest::Response, Option<String>), ClientError> {
        let token = self.current_token()?;
        let limit_key = token
            .as_deref()
            .and_then(decode_unverified)
            .map(|c| c.sub)
            .unwrap_or_else(|| ANONYMOUS.to_string());
        if let Decision::Limited { retry_after } = self.limiter.check(&limit_key).await {
            return Err(ClientError::RateLimited { retry_after_seconds: Some(retry_after.as_secs().max(1)) });
        }

        let mut req = self.http.request(method.clone(), self.url(path));
        if let Some(token) = &token {
            req = req.bearer_auth(token);
        }
        if is_mutation(method) {
            let csrf = self.storage.csrf_token().map_err(|_| ClientError::Server)?;
            // Always declare a JSON body so the content-type check passes
            req = req.header(X_CSRF_TOKEN, csrf).json(body.unwrap_or(&json!({})));
        } else if let Some(body) = body {
            req = req.json(body);
        }

        let res = req.send().await.map_err(ClientError::network)?;
        Ok((res, token))
    }

    /// The stored access token if it is still usable. An expired token ends
    /// the session without a network round trip.
    fn current_token(&self) -> Result<Option<String>, ClientError> {
        let Some(token) = self.storage.access_token() else {
            return Ok(None);
        };
        match decode_unverified(&token) {
            Some(claims) if !claims.is_expired() => Ok(Some(token)),
            _ => {
                tracing::debug!("stored access token expired");
                self.expire_session();
                Err(ClientError::Unauthorized)
            }
        }
    }

    /// Single-flight refresh. `stale` is the token the failed attempt used; a
    /// waiter that finds a different, unexpired token reuses it.
    async fn refresh_session(&self, stale: Option<&str>) -> Result<(), ClientError> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.storage.access_token() {
            let fresh = decode_unverified(&current).is_some_and(|c| !c.is_expired());
            if fresh && Some(current.as_str()) != stale {
                return Ok(());
            }
        }

        let Some(refresh_token) =
            self.storage.refresh_token().filter(|t| decode_unverified(t).is_some_and(|c| !c.is_expired()))
        else {
            self.expire_session();
            return Err(ClientError::Unauthorized);
        };

        let csrf = self.storage.csrf_token().map_err(|_| ClientError::Server)?;
        let res = self
            .http
            .post(self.url(REFRESH_PATH))
            .header(X_CSRF_TOKEN, csrf)
            .json(&json!({ "refreshToken": refresh_token }))
            .send()
            .await
            .map_err(ClientError::network)?;

        if !res.status().is_success() {
            tracing::debug!(status = %res.status(), "token refresh rejected");
            self.expire_session();
            return Err(ClientError::Unauthorized);
        }

        let body: ApiResponse<CredentialPair> = res.json().await.map_err(|_| ClientError::Server)?;
        let pair = body.data.ok_or(ClientError::Server)?;
        self.storage.set_credentials(&pair).map_err(|_| ClientError::Server)?;
        tracing::debug!("session refreshed");
        Ok(())
    }

    fn expire_session(&self) {
        self.storage.clear_credentials();
        self.listener.session_expired();
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.config.base_url, self.config.api_prefix, path)
    }
}

fn to_value<B: Serialize + ?Sized>(body: &B) -> Result<Value, ClientError> {
    serde_json::to_value(body).map_err(|e| ClientError::Validation { message: e.to_string(), errors: Vec::new() })
}

fn is_mutation(method: &Method) -> bool {
    [Method::POST, Method::PUT, Method::PATCH, Method::DELETE].contains(method)
}

/// Login, registration and refresh answer 401 for bad credentials; retrying
/// them with a refreshed token makes no sense.
fn is_credential_endpoint(path: &str) -> bool {
    let path = path.split('?').next().unwrap_or(path);
    matches!(path, LOGIN_PATH | REGISTER_PATH | REFRESH_PATH)
}

async fn read_response<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, ClientError> {
    let status = res.status();
    if status.is_success() {
        return res.json::<T>().await.map_err(|_| ClientError::Server);
    }

    let retry_after_seconds = res
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body = res.json::<ErrorBody>().await.unwrap_or_default();

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Unauthorized,
        StatusCode::NOT_FOUND => ClientError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimited { retry_after_seconds },
        s if s.is_client_error() => ClientError::Validation {
            message: body.message.unwrap_or_else(|| "Request rejected".to_string()),
            errors: body.errors,
        },
        _ => ClientError::Server,
    })
}
