//! Server configuration management

use crate::error::{ApiError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,

    /// Root of the blob store
    pub data_dir: PathBuf,

    /// Bearer tokens allowed to publish
    pub tokens: Vec<String>,

    /// Concurrent repository operations
    pub pool_size: usize,

    /// How long a request waits for a repository slot
    pub acquire_timeout: Duration,

    /// Whole-request deadline
    pub request_timeout: Duration,

    /// Largest accepted request body
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT", defaults.port)?,
            data_dir: lookup("RULEPACK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            tokens: lookup("RULEPACK_TOKENS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            pool_size: parse_var(&lookup, "DB_POOL_SIZE", defaults.pool_size)?,
            acquire_timeout: Duration::from_millis(parse_var(
                &lookup,
                "DB_ACQUIRE_TIMEOUT_MS",
                defaults.acquire_timeout.as_millis() as u64,
            )?),
            request_timeout: Duration::from_secs(parse_var(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            max_upload_bytes: parse_var(&lookup, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(ApiError::Config("DB_POOL_SIZE must be at least 1".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(ApiError::Config(
                "REQUEST_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        if self.acquire_timeout >= self.request_timeout {
            return Err(ApiError::Config(
                "DB_ACQUIRE_TIMEOUT_MS must be shorter than the request timeout".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` for binding
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ApiError::Config(format!("Invalid {} value: {}", key, raw))),
        None => Ok(default),
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            tokens: Vec::new(),
            pool_size: 16,
            acquire_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            // 10 MiB archive ceiling plus room for the manifest and multipart framing
            max_upload_bytes: 11 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.pool_size, 16);
        assert!(config.tokens.is_empty());
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("RULEPACK_TOKENS", "alpha, beta,,"),
            ("DB_POOL_SIZE", "4"),
            ("REQUEST_TIMEOUT_SECS", "10"),
            ("DB_ACQUIRE_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.tokens, vec!["alpha", "beta"]);
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("PORT", "http")])),
            Err(ApiError::Config(_))
        ));
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("DB_POOL_SIZE", "0")])),
            Err(ApiError::Config(_))
        ));
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("REQUEST_TIMEOUT_SECS", "2"), ("DB_ACQUIRE_TIMEOUT_MS", "5000")])),
            Err(ApiError::Config(_))
        ));
    }
}
