//! Application configuration loaded from environment variables.

use std::time::Duration;

/// Server and consumer configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `CONSUMER_PREFETCH` — deliveries in flight per consumer (default: `8`)
/// - `CONSUMER_MAX_RETRIES` — attempts before dead-lettering (default: `3`)
/// - `CONSUMER_RETRY_DELAY_MS` — delay before a redelivery (default: `100`)
/// - `PROCESSOR_TIMEOUT_MS` — payment provider call deadline (default: `5000`)
/// - `CANCEL_AFTER_ATTEMPTS` — cancel an order after this many failed
///   payment attempts; unset keeps failures record-only
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub prefetch: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub processor_timeout: Duration,
    pub cancel_after_attempts: Option<u32>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parsed("PORT").unwrap_or(3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            prefetch: env_parsed("CONSUMER_PREFETCH").unwrap_or(8),
            max_retries: env_parsed("CONSUMER_MAX_RETRIES").unwrap_or(3),
            retry_delay: Duration::from_millis(env_parsed("CONSUMER_RETRY_DELAY_MS").unwrap_or(100)),
            processor_timeout: Duration::from_millis(
                env_parsed("PROCESSOR_TIMEOUT_MS").unwrap_or(5000),
            ),
            cancel_after_attempts: env_parsed("CANCEL_AFTER_ATTEMPTS"),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            prefetch: 8,
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            processor_timeout: Duration::from_millis(5000),
            cancel_after_attempts: None,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.prefetch, 8);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.cancel_after_attempts, None);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
