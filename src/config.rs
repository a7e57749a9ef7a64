//! Engine configuration
use anyhow::Context;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB_PATH: &str = "TRADE_LEDGER_DB_PATH";
pub const ENV_MAX_RETRIES: &str = "TRADE_LEDGER_MAX_RETRIES";
pub const ENV_RETRY_BACKOFF_MS: &str = "TRADE_LEDGER_RETRY_BACKOFF_MS";
pub const ENV_FLUSH_ON_APPEND: &str = "TRADE_LEDGER_FLUSH_ON_APPEND";

/// Upper bound for the base retry delay read from the environment.
pub const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Where the sled database lives
    pub db_path: PathBuf,
    /// Extra attempts after losing an append race on the same document
    pub max_retries: u32,
    /// Base delay between attempts, multiplied by the attempt number
    pub retry_backoff: Duration,
    /// Flush sled to disk before acknowledging an append
    pub flush_on_append: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/trade-ledger"),
            max_retries: 3,
            retry_backoff: Duration::from_millis(5),
            flush_on_append: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }
    pub fn set_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
    pub fn set_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
    pub fn set_flush_on_append(mut self, flush: bool) -> Self {
        self.flush_on_append = flush;
        self
    }

    /// Defaults overridden by whichever `TRADE_LEDGER_*` variables are set.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DB_PATH) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(retries) = lookup(ENV_MAX_RETRIES) {
            config.max_retries = retries
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_RETRIES} must be a non-negative integer"))?;
        }
        if let Some(ms) = lookup(ENV_RETRY_BACKOFF_MS) {
            let ms: u64 = ms
                .trim()
                .parse()
                .with_context(|| format!("{ENV_RETRY_BACKOFF_MS} must be milliseconds"))?;
            if ms > MAX_RETRY_BACKOFF_MS {
                anyhow::bail!("{ENV_RETRY_BACKOFF_MS} must be at most {MAX_RETRY_BACKOFF_MS}, got {ms}");
            }
            config.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(flush) = lookup(ENV_FLUSH_ON_APPEND) {
            config.flush_on_append = match flush.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => anyhow::bail!("{ENV_FLUSH_ON_APPEND} must be a boolean, got '{other}'"),
            };
        }

        Ok(config)
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
    fn defaults_without_variables() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[
            (ENV_DB_PATH, "/var/lib/ledger"),
            (ENV_MAX_RETRIES, "7"),
            (ENV_RETRY_BACKOFF_MS, "20"),
            (ENV_FLUSH_ON_APPEND, "no"),
        ]))
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/var/lib/ledger"));
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.retry_backoff, Duration::from_millis(20));
        assert!(!config.flush_on_append);
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(EngineConfig::from_lookup(lookup(&[(ENV_MAX_RETRIES, "-1")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[(ENV_FLUSH_ON_APPEND, "maybe")])).is_err());
    }

    #[test]
    fn oversized_backoff_is_rejected() {
        let huge = u64::MAX.to_string();
        assert!(EngineConfig::from_lookup(lookup(&[(ENV_RETRY_BACKOFF_MS, huge.as_str())])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[(ENV_RETRY_BACKOFF_MS, "60001")])).is_err());

        let config = EngineConfig::from_lookup(lookup(&[(ENV_RETRY_BACKOFF_MS, "60000")])).unwrap();
        assert_eq!(config.retry_backoff, Duration::from_millis(MAX_RETRY_BACKOFF_MS));
    }
}
