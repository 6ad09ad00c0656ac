//! Thread controller configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults. `from_vars` exists so tests can inject values.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default number of workers (browser pages) in the pool.
pub const DEFAULT_WORKER_LIMIT: usize = 4;

/// Default soft deadline per action, in seconds. `0` disables enforcement.
pub const DEFAULT_ACTION_TIMEOUT_SECONDS: u64 = 30;

/// Default URL prefix conversation threads live under.
pub const DEFAULT_THREAD_URL_PREFIX: &str = "https://www.messenger.com/t/";

/// Default instance id prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "tc";

/// Thread controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this controller instance (log correlation).
    pub instance_id: String,

    /// Maximum number of workers the pool may hold.
    pub worker_limit: usize,

    /// Soft deadline per action; `None` disables enforcement.
    pub action_timeout: Option<Duration>,

    /// Numeric id of the authenticated user, for self-origin filtering.
    pub self_user_id: Option<i64>,

    /// Deliver the authenticated user's own messages too.
    pub listen_self: bool,

    /// URL prefix threads live under; used to read canonical thread slugs
    /// back out of page locations after navigation.
    pub thread_url_prefix: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let worker_limit = vars
            .get("TC_WORKER_LIMIT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_WORKER_LIMIT);
        if worker_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "TC_WORKER_LIMIT must be at least 1".to_string(),
            ));
        }

        let timeout_seconds = vars
            .get("TC_ACTION_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_ACTION_TIMEOUT_SECONDS);
        let action_timeout = (timeout_seconds > 0).then(|| Duration::from_secs(timeout_seconds));

        let self_user_id = vars.get("TC_SELF_USER_ID").and_then(|s| s.parse().ok());

        let listen_self = vars
            .get("TC_LISTEN_SELF")
            .is_some_and(|s| matches!(s.as_str(), "1" | "true" | "yes"));

        let thread_url_prefix = vars
            .get("TC_THREAD_URL_PREFIX")
            .cloned()
            .unwrap_or_else(|| DEFAULT_THREAD_URL_PREFIX.to_string());

        // Generate instance ID
        let instance_id = vars.get("TC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            instance_id,
            worker_limit,
            action_timeout,
            self_user_id,
            listen_self,
            thread_url_prefix,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("defaults should load");

        assert_eq!(config.worker_limit, DEFAULT_WORKER_LIMIT);
        assert_eq!(
            config.action_timeout,
            Some(Duration::from_secs(DEFAULT_ACTION_TIMEOUT_SECONDS))
        );
        assert_eq!(config.self_user_id, None);
        assert!(!config.listen_self);
        assert_eq!(config.thread_url_prefix, DEFAULT_THREAD_URL_PREFIX);
        assert!(config.instance_id.starts_with("tc-"));
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            ("TC_WORKER_LIMIT".to_string(), "2".to_string()),
            ("TC_ACTION_TIMEOUT_SECONDS".to_string(), "5".to_string()),
            ("TC_SELF_USER_ID".to_string(), "1234567890".to_string()),
            ("TC_LISTEN_SELF".to_string(), "true".to_string()),
            (
                "TC_THREAD_URL_PREFIX".to_string(),
                "https://example.test/t/".to_string(),
            ),
            ("TC_INSTANCE_ID".to_string(), "tc-custom-001".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("custom config should load");

        assert_eq!(config.worker_limit, 2);
        assert_eq!(config.action_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.self_user_id, Some(1_234_567_890));
        assert!(config.listen_self);
        assert_eq!(config.thread_url_prefix, "https://example.test/t/");
        assert_eq!(config.instance_id, "tc-custom-001");
    }

    #[test]
    fn test_zero_timeout_disables_enforcement() {
        let vars = HashMap::from([("TC_ACTION_TIMEOUT_SECONDS".to_string(), "0".to_string())]);
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.action_timeout, None);
    }

    #[test]
    fn test_zero_worker_limit_is_rejected() {
        let vars = HashMap::from([("TC_WORKER_LIMIT".to_string(), "0".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_unparsable_values_fall_back_to_defaults() {
        let vars = HashMap::from([
            ("TC_WORKER_LIMIT".to_string(), "lots".to_string()),
            ("TC_SELF_USER_ID".to_string(), "not-a-number".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.worker_limit, DEFAULT_WORKER_LIMIT);
        assert_eq!(config.self_user_id, None);
    }

    #[test]
    fn test_listen_self_spellings() {
        for (value, expected) in [("1", true), ("true", true), ("yes", true), ("0", false), ("off", false)] {
            let vars = HashMap::from([("TC_LISTEN_SELF".to_string(), value.to_string())]);
            let config = Config::from_vars(&vars).unwrap();
            assert_eq!(config.listen_self, expected, "TC_LISTEN_SELF={value}");
        }
    }
}
