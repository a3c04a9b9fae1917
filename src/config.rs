use std::time::Duration as StdDuration;

use serde::Deserialize;
use time::Duration;

/// Lifetimes of the tokens issued per scope.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub authentication_ttl_hours: i64,
    pub password_reset_ttl_minutes: i64,
    pub activation_ttl_hours: i64,
}

impl TokenConfig {
    pub fn authentication_ttl(&self) -> Duration {
        Duration::hours(self.authentication_ttl_hours)
    }

    pub fn password_reset_ttl(&self) -> Duration {
        Duration::minutes(self.password_reset_ttl_minutes)
    }

    pub fn activation_ttl(&self) -> Duration {
        Duration::hours(self.activation_ttl_hours)
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            authentication_ttl_hours: 24,
            password_reset_ttl_minutes: 60,
            activation_ttl_hours: 72,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout: StdDuration,
    pub mail_sender: String,
    pub tokens: TokenConfig,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let defaults = TokenConfig::default();
        let tokens = TokenConfig {
            authentication_ttl_hours: env_or("AUTH_TOKEN_TTL_HOURS", defaults.authentication_ttl_hours),
            password_reset_ttl_minutes: env_or(
                "RESET_TOKEN_TTL_MINUTES",
                defaults.password_reset_ttl_minutes,
            ),
            activation_ttl_hours: env_or("ACTIVATION_TOKEN_TTL_HOURS", defaults.activation_ttl_hours),
        };
        Ok(Self {
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            db_timeout: StdDuration::from_secs(env_or("DB_TIMEOUT_SECS", 3)),
            mail_sender: std::env::var("MAIL_SENDER")
                .unwrap_or_else(|_| "Credvault <no-reply@credvault.local>".into()),
            tokens,
        })
    }
}
