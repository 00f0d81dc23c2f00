use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET is not set"))?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env_or("APP_PORT", 3000);
        Ok(Self {
            port,
            database_url,
            host,
            jwt_secret,
            rate_limit: RateLimitConfig::from_env(),
        })
    }
}

/// Request budget for one limiter: `max_requests` per fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl LimitPolicy {
    pub const fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login: LimitPolicy,
    pub checkout: LimitPolicy,
    pub general: LimitPolicy,
    /// Approximate bound on tracked client keys per limiter; concurrent
    /// first requests from new clients may overshoot it slightly.
    pub max_keys: usize,
    pub sweep_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            login: LimitPolicy::new(
                env_or("RATE_LIMIT_LOGIN_MAX", defaults.login.max_requests),
                env_or("RATE_LIMIT_LOGIN_WINDOW_MS", defaults.login.window_ms),
            ),
            checkout: LimitPolicy::new(
                env_or("RATE_LIMIT_CHECKOUT_MAX", defaults.checkout.max_requests),
                env_or("RATE_LIMIT_CHECKOUT_WINDOW_MS", defaults.checkout.window_ms),
            ),
            general: LimitPolicy::new(
                env_or("RATE_LIMIT_GENERAL_MAX", defaults.general.max_requests),
                env_or("RATE_LIMIT_GENERAL_WINDOW_MS", defaults.general.window_ms),
            ),
            max_keys: env_or("RATE_LIMIT_MAX_KEYS", defaults.max_keys),
            sweep_interval_secs: env_or("RATE_LIMIT_SWEEP_SECS", defaults.sweep_interval_secs),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: LimitPolicy::new(5, 60_000),
            checkout: LimitPolicy::new(10, 60_000),
            general: LimitPolicy::new(100, 60_000),
            max_keys: 100_000,
            sweep_interval_secs: 60,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
