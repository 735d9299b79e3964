//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::str::FromStr;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL; the in-memory store is used when unset
    pub redis_url: Option<String>,
    /// Namespace for every store key the cache owns
    pub key_prefix: String,
    /// Upper bound for a single store call, in milliseconds
    pub store_timeout_ms: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Background purge interval in seconds, 0 disables the task
    pub purge_interval: u64,
    /// Enables destructive admin operations such as flushing the store
    pub allow_admin: bool,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `REDIS_URL` - Redis connection URL (default: unset, in-memory store)
    /// - `KEY_PREFIX` - Store key namespace (default: "l2cache")
    /// - `STORE_TIMEOUT_MS` - Per-call store timeout (default: 5000)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `PURGE_INTERVAL` - Purge frequency in seconds (default: 60)
    /// - `ALLOW_ADMIN` - Allow flushing the store (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            key_prefix: env::var("KEY_PREFIX")
                .ok()
                .filter(|prefix| !prefix.is_empty())
                .unwrap_or(defaults.key_prefix),
            store_timeout_ms: parse_var("STORE_TIMEOUT_MS").unwrap_or(defaults.store_timeout_ms),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            purge_interval: parse_var("PURGE_INTERVAL").unwrap_or(defaults.purge_interval),
            allow_admin: parse_var("ALLOW_ADMIN").unwrap_or(defaults.allow_admin),
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "l2cache".to_string(),
            store_timeout_ms: 5000,
            server_port: 3000,
            purge_interval: 60,
            allow_admin: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.redis_url, None);
        assert_eq!(config.key_prefix, "l2cache");
        assert_eq!(config.store_timeout_ms, 5000);
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.purge_interval, 60);
        assert!(!config.allow_admin);
    }

    // Single test touching the environment so parallel tests cannot race on it
    #[test]
    fn test_config_from_env() {
        env::remove_var("REDIS_URL");
        env::remove_var("KEY_PREFIX");
        env::remove_var("STORE_TIMEOUT_MS");
        env::remove_var("SERVER_PORT");
        env::remove_var("PURGE_INTERVAL");
        env::remove_var("ALLOW_ADMIN");

        let config = Config::from_env();
        assert_eq!(config.redis_url, None);
        assert_eq!(config.key_prefix, "l2cache");
        assert_eq!(config.purge_interval, 60);

        env::set_var("KEY_PREFIX", "orders");
        env::set_var("PURGE_INTERVAL", "0");
        env::set_var("ALLOW_ADMIN", "true");
        env::set_var("STORE_TIMEOUT_MS", "not-a-number");

        let config = Config::from_env();
        assert_eq!(config.key_prefix, "orders");
        assert_eq!(config.purge_interval, 0);
        assert!(config.allow_admin);
        assert_eq!(config.store_timeout_ms, 5000);

        env::remove_var("KEY_PREFIX");
        env::remove_var("PURGE_INTERVAL");
        env::remove_var("ALLOW_ADMIN");
        env::remove_var("STORE_TIMEOUT_MS");
    }
}
