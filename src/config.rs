use std::time::Duration;

use serde::Deserialize;

/// Minimum length for signing secrets outside the test environment.
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub api_prefix: String,
    pub trust_proxy: bool,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub cookie_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CryptoConfig {
    pub encryption_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub general_max_requests: usize,
    pub general_window_secs: u64,
    pub auth_max_requests: usize,
    pub auth_window_secs: u64,
    pub api_max_requests: usize,
    pub api_window_secs: u64,
    pub strict_max_requests: usize,
    pub strict_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_body_bytes: usize,
    pub allowed_content_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub image_max_bytes: usize,
    pub image_mime_types: Vec<String>,
    pub document_max_bytes: usize,
    pub document_mime_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub crypto: CryptoConfig,
    pub rate_limit: RateLimitConfig,
    pub cors: CorsConfig,
    pub limits: LimitsConfig,
    pub uploads: UploadConfig,
    pub security: Option<SecurityConfig>,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.server.environment.is_production()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        let defaults: &str = include_str!("../config/default.toml");
        match ::config::Config::builder()
            .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

/// Loads configuration: embedded defaults -> bollwerk.toml -> $BOLLWERK_CONFIG -> env/.env.
pub fn load() -> anyhow::Result<AppConfig> {
    let _ = dotenvy::dotenv();

    let defaults: &str = include_str!("../config/default.toml");
    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
        .add_source(::config::File::with_name("bollwerk").required(false));

    if let Ok(custom_path) = std::env::var("BOLLWERK_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(
        ::config::Environment::with_prefix("BOLLWERK")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("cors.allowed_origins")
            .with_list_parse_key("limits.allowed_content_types"),
    );

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }
    if !cfg.server.api_prefix.starts_with('/') {
        return Err(anyhow::anyhow!("server.api_prefix must start with '/'"));
    }
    if cfg.server.request_timeout_secs == 0 {
        return Err(anyhow::anyhow!("server.request_timeout_secs must be > 0"));
    }

    let rl = &cfg.rate_limit;
    for (name, max, window) in [
        ("general", rl.general_max_requests, rl.general_window_secs),
        ("auth", rl.auth_max_requests, rl.auth_window_secs),
        ("api", rl.api_max_requests, rl.api_window_secs),
        ("strict", rl.strict_max_requests, rl.strict_window_secs),
    ] {
        if max == 0 || window == 0 {
            return Err(anyhow::anyhow!("rate_limit.{} requires max_requests > 0 and window_secs > 0", name));
        }
    }

    if cfg.limits.max_body_bytes == 0 {
        return Err(anyhow::anyhow!("limits.max_body_bytes must be > 0"));
    }
    if cfg.uploads.image_max_bytes > cfg.limits.max_body_bytes
        || cfg.uploads.document_max_bytes > cfg.limits.max_body_bytes
    {
        tracing::warn!("upload ceilings exceed limits.max_body_bytes; the body limit wins");
    }

    if cfg.auth.access_ttl_secs == 0 || cfg.auth.refresh_ttl_secs == 0 {
        return Err(anyhow::anyhow!("auth token lifetimes must be > 0"));
    }

    // Secrets are only optional in the test environment
    if cfg.server.environment != Environment::Test {
        require_secret("auth.access_secret", &cfg.auth.access_secret)?;
        require_secret("auth.refresh_secret", &cfg.auth.refresh_secret)?;
        require_secret("auth.cookie_secret", &cfg.auth.cookie_secret)?;
        if cfg.crypto.encryption_key.trim().is_empty() {
            return Err(anyhow::anyhow!("crypto.encryption_key is required"));
        }
        if cfg.auth.access_secret == cfg.auth.refresh_secret {
            return Err(anyhow::anyhow!("auth.access_secret and auth.refresh_secret must differ"));
        }
    }

    Ok(())
}

fn require_secret(name: &str, value: &str) -> anyhow::Result<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow::anyhow!("{} is required", name));
    }
    if trimmed.len() < MIN_SECRET_LEN {
        return Err(anyhow::anyhow!("{} must be at least {} characters", name, MIN_SECRET_LEN));
    }
    Ok(())
}
