use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const MIN_JWT_SECRET_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub auth_clock_skew: Duration,
    pub session_inactivity: Duration,
    pub rate_limit_window: Duration,
    pub sync_rate_limit_per_window: u32,
    pub session_rate_limit_per_window: u32,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("session_inactivity", &self.session_inactivity)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "sync_rate_limit_per_window",
                &self.sync_rate_limit_per_window,
            )
            .field(
                "session_rate_limit_per_window",
                &self.session_rate_limit_per_window,
            )
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "WSM_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path =
            PathBuf::from(value_or_default(&lookup, "WSM_API_DATABASE_PATH", "wsm-api.db"));

        let jwt_secret = required_trimmed(&lookup, "WSM_JWT_SECRET")?;
        if jwt_secret.len() < MIN_JWT_SECRET_BYTES {
            return Err(ConfigError::Invalid(format!(
                "WSM_JWT_SECRET must be at least {MIN_JWT_SECRET_BYTES} bytes"
            )));
        }
        let jwt_issuer = optional_trimmed(&lookup, "WSM_JWT_ISSUER");

        let auth_clock_skew_secs =
            bounded_integer(&lookup, "AUTH_CLOCK_SKEW_SECS", "60", 0, 300)?;
        let session_inactivity_secs =
            bounded_integer(&lookup, "SESSION_INACTIVITY_SECS", "900", 60, 86_400)?;
        let rate_limit_window_secs =
            bounded_integer(&lookup, "RATE_LIMIT_WINDOW_SECS", "60", 10, 3_600)?;
        let sync_rate_limit_per_window =
            bounded_integer(&lookup, "SYNC_RATE_LIMIT_PER_WINDOW", "600", 1, 5_000)?;
        let session_rate_limit_per_window =
            bounded_integer(&lookup, "SESSION_RATE_LIMIT_PER_WINDOW", "120", 1, 5_000)?;

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            jwt_issuer,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            session_inactivity: Duration::from_secs(session_inactivity_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_rate_limit_per_window: u32::try_from(sync_rate_limit_per_window)
                .map_err(|_| ConfigError::Invalid("SYNC_RATE_LIMIT_PER_WINDOW".to_string()))?,
            session_rate_limit_per_window: u32::try_from(session_rate_limit_per_window)
                .map_err(|_| ConfigError::Invalid("SESSION_RATE_LIMIT_PER_WINDOW".to_string()))?,
        })
    }
}

fn bounded_integer(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let value = value_or_default(lookup, name, default)
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(format!("{name} must be an integer in [{min}, {max}]")))?;
    if !(min..=max).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{min}, {max}]"
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig::from_lookup(|key| match key {
        "WSM_JWT_SECRET" => Some("test-secret-that-is-at-least-32-bytes".to_string()),
        "WSM_JWT_ISSUER" => Some("wsm-tests".to_string()),
        _ => None,
    })
    .unwrap()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn config_requires_jwt_secret() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("WSM_JWT_SECRET"));
    }

    #[test]
    fn config_rejects_short_secret() {
        let err = AppConfig::from_lookup(|key| {
            (key == "WSM_JWT_SECRET").then(|| "short".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn config_applies_defaults() {
        let config = test_config();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.database_path, PathBuf::from("wsm-api.db"));
        assert_eq!(config.session_inactivity, Duration::from_secs(900));
        assert_eq!(config.sync_rate_limit_per_window, 600);
        assert_eq!(config.session_rate_limit_per_window, 120);
    }

    #[test]
    fn config_validates_ranges() {
        let mut map = HashMap::new();
        map.insert("WSM_JWT_SECRET", "test-secret-that-is-at-least-32-bytes");
        map.insert("SESSION_INACTIVITY_SECS", "30");
        let err = AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("SESSION_INACTIVITY_SECS"));

        map.insert("SESSION_INACTIVITY_SECS", "600");
        map.insert("AUTH_CLOCK_SKEW_SECS", "soon");
        let err = AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("AUTH_CLOCK_SKEW_SECS"));
    }

    #[test]
    fn config_redacts_sensitive_debug_fields() {
        let config = test_config();
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("test-secret-that-is-at-least-32-bytes"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
