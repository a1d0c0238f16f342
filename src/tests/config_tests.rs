#[cfg(test)]
mod tests {
    use crate::config::{self, AppConfig, Environment};
    use std::env;
    use std::fs;
    use std::sync::{Mutex, MutexGuard};
    use tempfile::NamedTempFile;

    // Tests below mutate the process environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lock_env() -> MutexGuard<'static, ()> {
        let guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("BOLLWERK__SERVER__ENVIRONMENT", "test");
        guard
    }

    fn write_temp_config(content: &str) -> NamedTempFile {
        let temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        fs::write(temp_file.path(), content).unwrap();
        temp_file
    }

    fn production_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.server.environment = Environment::Production;
        cfg.auth.access_secret = "a".repeat(40);
        cfg.auth.refresh_secret = "r".repeat(40);
        cfg.auth.cookie_secret = "c".repeat(40);
        cfg.crypto.encryption_key = "k".repeat(64);
        cfg
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.api_prefix, "/api");
        assert_eq!(config.server.environment, Environment::Development);
        assert!(!config.server.trust_proxy);
        assert_eq!(config.rate_limit.auth_max_requests, 5);
        assert_eq!(config.limits.max_body_bytes, 10 * 1024 * 1024);
        assert!(config.limits.allowed_content_types.contains(&"application/json".to_string()));
    }

    #[test]
    fn test_valid_config_does_not_error() {
        let _env = lock_env();
        assert!(config::load().is_ok());
    }

    #[test]
    fn test_invalid_server_port() {
        let _env = lock_env();
        env::set_var("BOLLWERK__SERVER__PORT", "0");
        let result = config::load();
        env::remove_var("BOLLWERK__SERVER__PORT");

        assert!(result.unwrap_err().to_string().contains("invalid server.port"));
    }

    #[test]
    fn test_config_from_env() {
        let _env = lock_env();
        env::set_var("BOLLWERK__SERVER__HOST", "0.0.0.0");
        env::set_var("BOLLWERK__SERVER__PORT", "3000");
        env::set_var("BOLLWERK__CORS__ALLOWED_ORIGINS", "https://a.example,https://b.example");
        env::set_var("BOLLWERK__RATE_LIMIT__AUTH_MAX_REQUESTS", "3");

        let result = config::load();

        env::remove_var("BOLLWERK__SERVER__HOST");
        env::remove_var("BOLLWERK__SERVER__PORT");
        env::remove_var("BOLLWERK__CORS__ALLOWED_ORIGINS");
        env::remove_var("BOLLWERK__RATE_LIMIT__AUTH_MAX_REQUESTS");

        let config = result.unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.cors.allowed_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(config.rate_limit.auth_max_requests, 3);
    }

    #[test]
    fn test_config_priority() {
        let _env = lock_env();
        let temp_file = write_temp_config(
            r#"
[server]
port = 7000
request_timeout_secs = 5
"#,
        );
        env::set_var("BOLLWERK_CONFIG", temp_file.path().to_str().unwrap());
        env::set_var("BOLLWERK__SERVER__PORT", "8888");

        let result = config::load();

        env::remove_var("BOLLWERK_CONFIG");
        env::remove_var("BOLLWERK__SERVER__PORT");

        let config = result.unwrap();
        // Environment beats the file, the file beats the defaults
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.server.request_timeout_secs, 5);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_zero_limiter_ceiling_is_rejected() {
        let _env = lock_env();
        env::set_var("BOLLWERK__RATE_LIMIT__STRICT_MAX_REQUESTS", "0");
        let result = config::load();
        env::remove_var("BOLLWERK__RATE_LIMIT__STRICT_MAX_REQUESTS");

        assert!(result.unwrap_err().to_string().contains("rate_limit.strict"));
    }

    #[test]
    fn test_secrets_required_outside_test() {
        assert!(config::validate(&production_config()).is_ok());

        let mut cfg = production_config();
        cfg.auth.access_secret = String::new();
        assert!(config::validate(&cfg).unwrap_err().to_string().contains("auth.access_secret is required"));

        let mut cfg = production_config();
        cfg.auth.refresh_secret = "short".into();
        assert!(config::validate(&cfg).unwrap_err().to_string().contains("at least 32 characters"));

        let mut cfg = production_config();
        cfg.auth.refresh_secret = cfg.auth.access_secret.clone();
        assert!(config::validate(&cfg).unwrap_err().to_string().contains("must differ"));

        let mut cfg = production_config();
        cfg.crypto.encryption_key = " ".into();
        assert!(config::validate(&cfg).unwrap_err().to_string().contains("encryption_key"));
    }

    #[test]
    fn test_test_environment_tolerates_missing_secrets() {
        let mut cfg = AppConfig::default();
        cfg.server.environment = Environment::Test;
        assert!(config::validate(&cfg).is_ok());
    }
}
