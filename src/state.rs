use std::sync::Arc;

use crate::classifier::ErrorClassifier;
use crate::config::AppConfig;
use crate::crypto::Crypto;
use crate::metrics::Metrics;
use crate::middleware::rate_limit::RateLimiters;
use crate::store::{MemoryUploadStore, MemoryUserStore, UploadStore, UserStore};
use crate::token::TokenService;

/// The shared application state.
///
/// Every service the pipeline and the handlers depend on is constructed once
/// from the validated configuration and injected here; nothing reads the
/// environment after startup.
#[derive(Clone)]
pub struct AppState {
    /// The application configuration.
    pub config: Arc<AppConfig>,
    /// Symmetric encryption with the configured key; seals refresh cookies.
    pub crypto: Arc<Crypto>,
    /// Issues and verifies access/refresh credentials.
    pub tokens: Arc<TokenService>,
    /// The general, auth, api and strict limiters.
    pub limiters: RateLimiters,
    pub users: Arc<dyn UserStore>,
    pub uploads: Arc<dyn UploadStore>,
    /// The application metrics.
    pub metrics: Metrics,
    /// Renders failures; production mode hides internal detail.
    pub classifier: ErrorClassifier,
}

impl AppState {
    /// Creates a new `AppState` backed by in-memory stores.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        Self::with_stores(config, Arc::new(MemoryUserStore::new()), Arc::new(MemoryUploadStore::new()))
    }

    pub fn with_stores(
        config: AppConfig,
        users: Arc<dyn UserStore>,
        uploads: Arc<dyn UploadStore>,
    ) -> anyhow::Result<Self> {
        let crypto = if config.crypto.encryption_key.trim().is_empty() {
            // Only reachable in the test environment; validation rejects it elsewhere
            tracing::warn!("no encryption key configured, using an ephemeral key");
            Crypto::ephemeral()
        } else {
            Crypto::from_key_material(&config.crypto.encryption_key)?
        };

        Ok(Self {
            crypto: Arc::new(crypto),
            tokens: Arc::new(TokenService::from_config(&config.auth)),
            limiters: RateLimiters::from_config(&config.rate_limit),
            users,
            uploads,
            metrics: Metrics::new(),
            classifier: ErrorClassifier::new(config.is_production()),
            config: Arc::new(config),
        })
    }

    /// Replaces the limiters, e.g. with ones driven by a manual clock.
    pub fn with_limiters(mut self, limiters: RateLimiters) -> Self {
        self.limiters = limiters;
        self
    }
}
