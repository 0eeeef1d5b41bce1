use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Process-level settings, read from the environment (and `.env` when the
/// binary loaded one).
#[derive(Clone, Debug)]
pub struct Config {
    pub namespace: String,
    pub set: String,
    pub ttl_secs: u32,
    pub data_bin: String,
    /// `None` when original keys should not be persisted next to the data.
    pub key_bin: Option<String>,
    pub admin_timeout: Duration,
    pub source_url: String,
    pub source_format: String,
    pub source_timeout: Duration,
    pub nodes: usize,
}

impl Config {
    const DEFAULT_NAMESPACE: &str = "test";
    const DEFAULT_SET: &str = "flights";
    const DEFAULT_TTL_SECS: u32 = 300;
    pub const DEFAULT_DATA_BIN: &str = "flt_data_bin";
    pub const DEFAULT_KEY_BIN: &str = "user_key";
    const DEFAULT_ADMIN_TIMEOUT_MS: u64 = 1000;
    const DEFAULT_SOURCE_URL: &str = "http://services.faa.gov/airport/status";
    const DEFAULT_SOURCE_FORMAT: &str = "JSON";
    const DEFAULT_SOURCE_TIMEOUT_MS: u64 = 5000;
    const DEFAULT_NODES: usize = 3;

    pub fn from_env() -> Self {
        let key_bin = match std::env::var("AEROCACHE_KEY_BIN") {
            Ok(name) if name.trim().is_empty() => None,
            Ok(name) => Some(name),
            Err(_) => Some(Self::DEFAULT_KEY_BIN.to_string()),
        };

        Self {
            namespace: env_string("AEROCACHE_NAMESPACE", Self::DEFAULT_NAMESPACE),
            set: env_string("AEROCACHE_SET", Self::DEFAULT_SET),
            ttl_secs: env_parsed("AEROCACHE_TTL_SECS", Self::DEFAULT_TTL_SECS),
            data_bin: env_string("AEROCACHE_DATA_BIN", Self::DEFAULT_DATA_BIN),
            key_bin,
            admin_timeout: Duration::from_millis(env_parsed(
                "AEROCACHE_ADMIN_TIMEOUT_MS",
                Self::DEFAULT_ADMIN_TIMEOUT_MS,
            )),
            source_url: env_string("AEROCACHE_SOURCE_URL", Self::DEFAULT_SOURCE_URL),
            source_format: env_string("AEROCACHE_SOURCE_FORMAT", Self::DEFAULT_SOURCE_FORMAT),
            source_timeout: Duration::from_millis(env_parsed(
                "AEROCACHE_SOURCE_TIMEOUT_MS",
                Self::DEFAULT_SOURCE_TIMEOUT_MS,
            )),
            nodes: env_parsed("AEROCACHE_NODES", Self::DEFAULT_NODES),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: Self::DEFAULT_NAMESPACE.to_string(),
            set: Self::DEFAULT_SET.to_string(),
            ttl_secs: Self::DEFAULT_TTL_SECS,
            data_bin: Self::DEFAULT_DATA_BIN.to_string(),
            key_bin: Some(Self::DEFAULT_KEY_BIN.to_string()),
            admin_timeout: Duration::from_millis(Self::DEFAULT_ADMIN_TIMEOUT_MS),
            source_url: Self::DEFAULT_SOURCE_URL.to_string(),
            source_format: Self::DEFAULT_SOURCE_FORMAT.to_string(),
            source_timeout: Duration::from_millis(Self::DEFAULT_SOURCE_TIMEOUT_MS),
            nodes: Self::DEFAULT_NODES,
        }
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{name}={raw:?} is not valid, using default {default}");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let config = Config::default();
        assert_eq!(config.namespace, "test");
        assert_eq!(config.data_bin, "flt_data_bin");
        assert_eq!(config.key_bin.as_deref(), Some("user_key"));
        assert_eq!(config.source_url, "http://services.faa.gov/airport/status");
    }

    #[test]
    fn test_env_parsed_falls_back_on_garbage() {
        // Not read by any other test.
        let name = "AEROCACHE_TEST_ONLY_GARBAGE_NUMBER";
        unsafe { std::env::set_var(name, "not-a-number") };
        assert_eq!(env_parsed(name, 42u32), 42);
        unsafe { std::env::set_var(name, " 7 ") };
        assert_eq!(env_parsed(name, 42u32), 7);
        unsafe { std::env::remove_var(name) };
    }
}
