use std::sync::OnceLock;
use std::time::Duration;

use crate::errors::AppError;

/// Deployment environment, read from `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "production" | "prod" => AppEnv::Production,
            _ => AppEnv::Development,
        }
    }
}

/// Production mode hides store failure details from clients.
pub fn is_production() -> bool {
    static ENV: OnceLock<AppEnv> = OnceLock::new();
    *ENV.get_or_init(|| AppEnv::parse(&std::env::var("APP_ENV").unwrap_or_default())) == AppEnv::Production
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: AppEnv,
    pub port: u16,
    pub cache_enabled: bool,
    /// TTL of the per-user effective permission snapshot.
    pub access_cache_ttl: Duration,
    /// Honour `X-Forwarded-For` / `X-Real-IP` as the client address. Only
    /// safe behind a proxy that overwrites those headers.
    pub trust_proxy_headers: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: AppEnv::Development,
            port: 8000,
            cache_enabled: true,
            access_cache_ttl: Duration::from_secs(24 * 60 * 60),
            trust_proxy_headers: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let env = std::env::var("APP_ENV")
            .map(|raw| AppEnv::parse(&raw))
            .unwrap_or(defaults.env);

        let port = env_parse("APP_PORT", defaults.port)?;
        let cache_enabled = env_parse("CACHE_ENABLED", defaults.cache_enabled)?;
        let access_cache_ttl = env_parse("ACCESS_CACHE_TTL_SECONDS", defaults.access_cache_ttl.as_secs())
            .map(Duration::from_secs)?;
        let trust_proxy_headers = env_parse("TRUST_PROXY_HEADERS", defaults.trust_proxy_headers)?;

        Ok(Self {
            env,
            port,
            cache_enabled,
            access_cache_ttl,
            trust_proxy_headers,
        })
    }
}

/// Reads `key` and parses it, falling back to `default` when unset.
pub fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{key} has an invalid value: {raw}"))),
        _ => Ok(default),
    }
}
