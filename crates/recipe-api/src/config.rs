//! API configuration.

use std::time::Duration;

/// Upload limit for a single recipe image.
pub const DEFAULT_MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Anonymous requests per second, per client IP
    pub rate_limit_rps: u32,
    /// Requests per second for each authenticated customer
    pub rate_limit_customer_rps: u32,
    /// Requests per second for each authenticated seller
    pub rate_limit_seller_rps: u32,
    /// Rate limit burst
    pub rate_limit_burst: u32,
    /// Request timeout
    pub request_timeout: Duration,
    /// Max request body size
    pub max_body_size: usize,
    /// Max accepted image upload
    pub max_image_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// HMAC secret for signing tokens
    pub jwt_secret: String,
    /// Access token lifetime
    pub access_token_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_token_ttl: Duration,
    /// bcrypt work factor
    pub bcrypt_cost: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_customer_rps: 20,
            rate_limit_seller_rps: 30,
            rate_limit_burst: 20,
            request_timeout: Duration::from_secs(30),
            max_body_size: 12 * 1024 * 1024,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            environment: "development".to_string(),
            jwt_secret: "change-me".to_string(),
            access_token_ttl: Duration::from_secs(60 * 60),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_or("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_or("RATE_LIMIT_RPS", defaults.rate_limit_rps),
            rate_limit_customer_rps: env_or(
                "RATE_LIMIT_CUSTOMER_RPS",
                defaults.rate_limit_customer_rps,
            ),
            rate_limit_seller_rps: env_or("RATE_LIMIT_SELLER_RPS", defaults.rate_limit_seller_rps),
            rate_limit_burst: env_or("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT", 30)),
            max_body_size: env_or("MAX_BODY_SIZE", defaults.max_body_size),
            max_image_size: env_or("MAX_IMAGE_SIZE", defaults.max_image_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            access_token_ttl: Duration::from_secs(60 * env_or("JWT_ACCESS_TTL_MINUTES", 60u64)),
            refresh_token_ttl: Duration::from_secs(
                24 * 60 * 60 * env_or("JWT_REFRESH_TTL_DAYS", 7u64),
            ),
            bcrypt_cost: env_or("BCRYPT_COST", defaults.bcrypt_cost),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }

    /// Settings that must not reach production unchanged.
    pub fn insecure_defaults(&self) -> Vec<&'static str> {
        let mut problems = Vec::new();
        if self.jwt_secret == "change-me" || self.jwt_secret.len() < 32 {
            problems.push("JWT_SECRET is unset or shorter than 32 bytes");
        }
        if self.cors_origins.iter().any(|o| o == "*") {
            problems.push("CORS_ORIGINS allows any origin");
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn reads_overrides_from_env() {
        std::env::set_var("API_PORT", "9100");
        std::env::set_var("JWT_ACCESS_TTL_MINUTES", "5");
        std::env::set_var("CORS_ORIGINS", "https://a.example, https://b.example");
        let config = ApiConfig::from_env();
        std::env::remove_var("API_PORT");
        std::env::remove_var("JWT_ACCESS_TTL_MINUTES");
        std::env::remove_var("CORS_ORIGINS");

        assert_eq!(config.port, 9100);
        assert_eq!(config.access_token_ttl, Duration::from_secs(300));
        assert_eq!(
            config.cors_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    #[serial]
    fn ignores_unparsable_values() {
        std::env::set_var("API_PORT", "not-a-port");
        let config = ApiConfig::from_env();
        std::env::remove_var("API_PORT");
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn default_secret_is_flagged() {
        let config = ApiConfig::default();
        assert!(!config.insecure_defaults().is_empty());
        assert!(!config.is_production());
    }
}
