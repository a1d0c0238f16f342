use super::pipeline::{Exchange, Outcome, Stage};
use crate::config::RateLimitConfig;
use crate::context::RequestContext;
use crate::error::AppError;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

/// Source of "now" for window arithmetic.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset_ms: AtomicU64,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self { base: Instant::now(), offset_ms: AtomicU64::new(0) }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// Named limiter settings.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub max_requests: usize,
    pub window: Duration,
    /// Caller-facing message carried by the 429.
    pub message: String,
    /// Requests that end in a 2xx/3xx are refunded.
    pub skip_successful: bool,
}

impl RateLimitPolicy {
    pub fn new(name: &'static str, max_requests: usize, window_seconds: u64, message: &str) -> Self {
        Self {
            name,
            max_requests,
            window: Duration::from_secs(window_seconds),
            message: message.to_string(),
            skip_successful: false,
        }
    }

    pub fn skip_successful(mut self) -> Self {
        self.skip_successful = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited { retry_after: Duration },
}

/// A thread-safe rate limiter based on the sliding window algorithm.
#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<RwLock<HashMap<String, Vec<Instant>>>>,
    policy: Arc<RateLimitPolicy>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter").field("policy", &self.policy).finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { requests: Arc::new(RwLock::new(HashMap::new())), policy: Arc::new(policy), clock }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    fn in_window(&self, now: Instant, t: Instant) -> bool {
        // On time skew, keep the timestamp
        now.checked_duration_since(t).map(|d| d < self.policy.window).unwrap_or(true)
    }

    /// Checks and, when allowed, records one hit for `id`.
    ///
    /// The write lock is held across eviction, comparison and push, so two
    /// concurrent checks can never both take the last slot.
    pub async fn check(&self, id: &str) -> Decision {
        let now = self.clock.now();
        let mut requests = self.requests.write().await;
        let timestamps = requests.entry(id.to_string()).or_default();

        timestamps.retain(|&t| self.in_window(now, t));

        if timestamps.len() >= self.policy.max_requests {
            let oldest = timestamps.first().copied().unwrap_or(now);
            let retry_after = match now.checked_duration_since(oldest) {
                Some(elapsed) => self.policy.window.saturating_sub(elapsed),
                None => Duration::from_secs(1),
            };
            return Decision::Limited { retry_after };
        }

        timestamps.push(now);
        Decision::Allowed
    }

    pub async fn is_allowed(&self, id: &str) -> bool {
        matches!(self.check(id).await, Decision::Allowed)
    }

    /// Forgets every hit recorded for `id`.
    pub async fn reset(&self, id: &str) {
        self.requests.write().await.remove(id);
    }

    /// Removes the newest hit for `id`.
    pub async fn refund(&self, id: &str) {
        let mut requests = self.requests.write().await;
        if let Some(timestamps) = requests.get_mut(id) {
            timestamps.pop();
            if timestamps.is_empty() {
                requests.remove(id);
            }
        }
    }

    /// Builds the failure for a limited decision.
    pub fn rejection(&self, retry_after: Duration) -> AppError {
        let mut secs = retry_after.as_secs();
        if retry_after.subsec_nanos() > 0 || secs == 0 {
            secs += 1;
        }
        AppError::RateLimitExceeded { message: self.policy.message.clone(), retry_after_seconds: secs }
    }

    /// Drops identifiers whose timestamps have all left the window.
    pub async fn cleanup_old_entries(&self) {
        let now = self.clock.now();
        let mut requests = self.requests.write().await;
        requests.retain(|_, timestamps| {
            timestamps.retain(|&t| self.in_window(now, t));
            !timestamps.is_empty()
        });
    }

    #[cfg(test)]
    pub(crate) async fn tracked(&self, id: &str) -> usize {
        self.requests.read().await.get(id).map(|t| t.len()).unwrap_or(0)
    }
}

/// The four policies the application uses.
#[derive(Debug, Clone)]
pub struct RateLimiters {
    pub general: RateLimiter,
    pub auth: RateLimiter,
    pub api: RateLimiter,
    pub strict: RateLimiter,
}

impl RateLimiters {
    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(cfg: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let build = |policy: RateLimitPolicy| RateLimiter::with_clock(policy, clock.clone());
        Self {
            general: build(RateLimitPolicy::new(
                "general",
                cfg.general_max_requests,
                cfg.general_window_secs,
                "Too many requests from this IP, please try again later.",
            )),
            auth: build(
                RateLimitPolicy::new(
                    "auth",
                    cfg.auth_max_requests,
                    cfg.auth_window_secs,
                    "Too many authentication attempts, please try again later.",
                )
                .skip_successful(),
            ),
            api: build(RateLimitPolicy::new(
                "api",
                cfg.api_max_requests,
                cfg.api_window_secs,
                "API rate limit exceeded, please slow down.",
            )),
            strict: build(RateLimitPolicy::new(
                "strict",
                cfg.strict_max_requests,
                cfg.strict_window_secs,
                "Too many requests for this operation, please try again later.",
            )),
        }
    }

    pub async fn cleanup_all(&self) {
        for limiter in [&self.general, &self.auth, &self.api, &self.strict] {
            limiter.cleanup_old_entries().await;
        }
    }
}

/// A background task that periodically cleans up old entries from all limiters.
pub async fn cleanup_task(limiters: RateLimiters, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        limiters.cleanup_all().await;
    }
}

/// Pipeline stage applying the general limiter to paths under the API prefix.
pub struct RateLimitStage {
    limiter: RateLimiter,
    prefix: String,
}

impl RateLimitStage {
    pub fn new(limiter: RateLimiter, prefix: String) -> Self {
        Self { limiter, prefix: prefix.trim_end_matches('/').to_string() }
    }

    fn applies_to(&self, path: &str) -> bool {
        path == self.prefix || path.strip_prefix(self.prefix.as_str()).is_some_and(|rest| rest.starts_with('/'))
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn process(&self, exchange: Exchange) -> Outcome {
        if !self.applies_to(exchange.parts.uri.path()) {
            return exchange.proceed();
        }
        let id = exchange.ctx.client_ip().to_string();
        match self.limiter.check(&id).await {
            Decision::Allowed => exchange.proceed(),
            Decision::Limited { retry_after } => {
                let err = self.limiter.rejection(retry_after);
                exchange.fail(err)
            }
        }
    }
}

/// Route-level limiter keyed by the client IP of the request context.
///
/// Use with `axum::middleware::from_fn_with_state(limiter, enforce)`.
pub async fn enforce(State(limiter): State<RateLimiter>, req: Request, next: Next) -> Response {
    let id = match req.extensions().get::<RequestContext>() {
        Some(ctx) => ctx.client_ip().to_string(),
        None => "unknown".to_string(),
    };

    if let Decision::Limited { retry_after } = limiter.check(&id).await {
        tracing::warn!(limiter = limiter.policy().name, client = %id, "rate limit exceeded");
        return limiter.rejection(retry_after).into_response();
    }

    let res = next.run(req).await;
    if limiter.policy().skip_successful && (res.status().is_success() || res.status().is_redirection()) {
        limiter.refund(&id).await;
    }
    res
}
