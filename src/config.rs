//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;

use crate::error::ConfigError;

/// Default system prompt for the stock channels.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a concise, helpful personal assistant. \
Messages may arrive in bursts and are combined before they reach you; \
lines tagged [Follow-up] were sent after the first one. Answer them together in one reply.";

/// Generic notice sent when a batch fails after every retry.
pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "Sorry, something went wrong while handling your message. Please try again in a moment.";

/// Backoff policy for delayed tasks whose handler fails.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always >= 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single backoff.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// No retries: the handler runs exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff with +/-20% jitter, capped at `max_delay`.
    ///
    /// `attempt` is the 1-based attempt that just failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(1u32 << exp);
        let capped = raw.min(self.max_delay);
        if capped.is_zero() {
            return capped;
        }
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        capped.mul_f64(jitter).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Debounce window: delay after the most recent message before combining.
    pub debounce: Duration,
    /// Channel id every combined batch is executed against.
    pub primary_channel: String,
    /// System prompt used by the stock presets.
    pub system_prompt: String,
    /// How many history messages the history enricher loads.
    pub history_limit: usize,
    /// Retry policy for combine tasks.
    pub retry: RetryPolicy,
    /// Text of the failure notice sent after the final attempt.
    pub fallback_message: String,
    /// libSQL database file. `None` keeps every store in memory.
    pub db_path: Option<PathBuf>,
    /// Port for the HTTP ingest router. `None` disables it.
    pub http_port: Option<u16>,
    /// Generation model name.
    pub model: String,
    /// Assistant handle stripped from inbound text, e.g. `@relay`.
    pub mention_name: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(2500),
            primary_channel: "assistant".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_limit: 20,
            retry: RetryPolicy::default(),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            db_path: None,
            http_port: None,
            model: "claude-sonnet-4-20250514".to_string(),
            mention_name: None,
        }
    }
}

impl RelayConfig {
    /// Load configuration from `RELAY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup (env, test map, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let debounce = match get("RELAY_DEBOUNCE_MS") {
            Some(v) => Duration::from_millis(parse_num("RELAY_DEBOUNCE_MS", &v)?),
            None => defaults.debounce,
        };

        let retry = RetryPolicy {
            max_attempts: match get("RELAY_RETRY_MAX_ATTEMPTS") {
                Some(v) => parse_num("RELAY_RETRY_MAX_ATTEMPTS", &v)?,
                None => defaults.retry.max_attempts,
            },
            base_delay: match get("RELAY_RETRY_BASE_MS") {
                Some(v) => Duration::from_millis(parse_num("RELAY_RETRY_BASE_MS", &v)?),
                None => defaults.retry.base_delay,
            },
            max_delay: match get("RELAY_RETRY_MAX_MS") {
                Some(v) => Duration::from_millis(parse_num("RELAY_RETRY_MAX_MS", &v)?),
                None => defaults.retry.max_delay,
            },
        };

        let config = Self {
            debounce,
            primary_channel: get("RELAY_PRIMARY_CHANNEL").unwrap_or(defaults.primary_channel),
            system_prompt: get("RELAY_SYSTEM_PROMPT").unwrap_or(defaults.system_prompt),
            history_limit: match get("RELAY_HISTORY_LIMIT") {
                Some(v) => parse_num("RELAY_HISTORY_LIMIT", &v)?,
                None => defaults.history_limit,
            },
            retry,
            fallback_message: get("RELAY_FALLBACK_MESSAGE").unwrap_or(defaults.fallback_message),
            db_path: get("RELAY_DB_PATH").map(PathBuf::from),
            http_port: get("RELAY_HTTP_PORT")
                .map(|v| parse_num("RELAY_HTTP_PORT", &v))
                .transpose()?,
            model: get("RELAY_MODEL").unwrap_or(defaults.model),
            mention_name: get("RELAY_MENTION_NAME"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce.is_zero() {
            return Err(invalid("RELAY_DEBOUNCE_MS", "must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("RELAY_RETRY_MAX_ATTEMPTS", "must be >= 1"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(invalid(
                "RELAY_RETRY_BASE_MS",
                "must not exceed RELAY_RETRY_MAX_MS",
            ));
        }
        if self.primary_channel.trim().is_empty() {
            return Err(invalid("RELAY_PRIMARY_CHANNEL", "must not be empty"));
        }
        if self.http_port == Some(0) {
            return Err(invalid("RELAY_HTTP_PORT", "must be > 0"));
        }
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, &format!("expected a number, got '{value}'")))
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_env_empty() {
        let config = RelayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.debounce, Duration::from_millis(2500));
        assert_eq!(config.primary_channel, "assistant");
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.db_path.is_none());
        assert!(config.http_port.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("RELAY_DEBOUNCE_MS", "400"),
            ("RELAY_PRIMARY_CHANNEL", "support"),
            ("RELAY_RETRY_MAX_ATTEMPTS", "5"),
            ("RELAY_HTTP_PORT", "8088"),
            ("RELAY_DB_PATH", "/tmp/relay.db"),
        ]))
        .unwrap();
        assert_eq!(config.debounce, Duration::from_millis(400));
        assert_eq!(config.primary_channel, "support");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.http_port, Some(8088));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/relay.db")));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = RelayConfig::from_lookup(lookup(&[("RELAY_SYSTEM_PROMPT", "   ")])).unwrap();
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn rejects_non_numeric() {
        let err = RelayConfig::from_lookup(lookup(&[("RELAY_DEBOUNCE_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "RELAY_DEBOUNCE_MS"));
    }

    #[test]
    fn rejects_zero_attempts() {
        let err =
            RelayConfig::from_lookup(lookup(&[("RELAY_RETRY_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        let first = policy.backoff(1);
        assert!(first >= Duration::from_millis(80) && first <= Duration::from_millis(120));
        let late = policy.backoff(8);
        assert!(late <= Duration::from_millis(500));
        assert!(late >= Duration::from_millis(400));
    }

    #[test]
    fn no_retry_policy_has_zero_backoff() {
        assert_eq!(RetryPolicy::none().backoff(1), Duration::ZERO);
    }
}
