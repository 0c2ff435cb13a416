//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL`: PostgreSQL URL; in-memory stores when unset
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `PRICING_URL`, `INVENTORY_URL`, `PAYMENT_URL`: collaborator base URLs
/// - `PAYMENT_TIMEOUT_SECS`: charge timeout (default: `10`)
/// - `COLLABORATOR_TIMEOUT_SECS`: catalog and inventory timeout (default: `30`)
/// - `IDEMPOTENCY_RETRY_FAILED`: let a failed key be retried (default: `false`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub pricing_url: String,
    pub inventory_url: String,
    pub payment_url: String,
    pub payment_timeout: Duration,
    pub collaborator_timeout: Duration,
    pub retry_failed_keys: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: parse_var(&lookup, "DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            pricing_url: lookup("PRICING_URL").unwrap_or(defaults.pricing_url),
            inventory_url: lookup("INVENTORY_URL").unwrap_or(defaults.inventory_url),
            payment_url: lookup("PAYMENT_URL").unwrap_or(defaults.payment_url),
            payment_timeout: parse_var(&lookup, "PAYMENT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.payment_timeout),
            collaborator_timeout: parse_var(&lookup, "COLLABORATOR_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.collaborator_timeout),
            retry_failed_keys: lookup("IDEMPOTENCY_RETRY_FAILED")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.retry_failed_keys),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 10,
            pricing_url: "http://localhost:4001/products/prices".to_string(),
            inventory_url: "http://localhost:4002/inventory".to_string(),
            payment_url: "http://localhost:4003/payments".to_string(),
            payment_timeout: saga::services::DEFAULT_PAYMENT_TIMEOUT,
            collaborator_timeout: saga::services::DEFAULT_COLLABORATOR_TIMEOUT,
            retry_failed_keys: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
        assert_eq!(config.payment_timeout, Duration::from_secs(10));
        assert_eq!(config.collaborator_timeout, Duration::from_secs(30));
        assert!(!config.retry_failed_keys);
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = from_map(&[]);
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.database_max_connections, 10);
    }

    #[test]
    fn test_reads_overrides() {
        let config = from_map(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("PAYMENT_URL", "http://payments:9000"),
            ("PAYMENT_TIMEOUT_SECS", "3"),
            ("IDEMPOTENCY_RETRY_FAILED", "true"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/orders")
        );
        assert_eq!(config.payment_url, "http://payments:9000");
        assert_eq!(config.payment_timeout, Duration::from_secs(3));
        assert!(config.retry_failed_keys);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = from_map(&[("PORT", "not-a-port"), ("PAYMENT_TIMEOUT_SECS", "-1")]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.payment_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_blank_database_url_means_in_memory() {
        let config = from_map(&[("DATABASE_URL", "  ")]);
        assert!(config.database_url.is_none());
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
