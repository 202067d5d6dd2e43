//! Client configuration.
//!
//! Values are safe to keep in the user's config directory. The access token
//! is the only secret and is redacted from `Debug` output.

use serde::{Deserialize, Serialize};

use crate::recovery::RetentionPolicy;
use crate::sync::RetryPolicy;
use crate::util::{canonical_api_url, trimmed_non_empty};
use crate::{Error, Result};

const CONFIG_SCHEMA_VERSION: u32 = 1;
const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_DRAIN_INTERVAL_SECS: u64 = 30;
const MIN_INTERVAL_SECS: u64 = 5;
const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Keys accepted by [`ClientConfig::set_value`]
pub const CONFIG_KEYS: [&str; 9] = [
    "api_base_url",
    "access_token",
    "autosave_interval_secs",
    "drain_interval_secs",
    "retry.base_delay_ms",
    "retry.max_delay_ms",
    "retry.stuck_after_attempts",
    "retention.max_points",
    "retention.max_age_days",
];

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub version: u32,
    /// Base URL of the wsm API; sync is disabled without it
    pub api_base_url: Option<String>,
    /// Bearer token sent to the API
    pub access_token: Option<String>,
    pub retry: RetryPolicy,
    /// Automatic recovery point interval of the watch loop
    pub autosave_interval_secs: u64,
    /// Queue drain interval of the watch loop
    pub drain_interval_secs: u64,
    pub retention: RetentionPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_SCHEMA_VERSION,
            api_base_url: None,
            access_token: None,
            retry: RetryPolicy::default(),
            autosave_interval_secs: DEFAULT_AUTOSAVE_INTERVAL_SECS,
            drain_interval_secs: DEFAULT_DRAIN_INTERVAL_SECS,
            retention: RetentionPolicy::default(),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("version", &self.version)
            .field("api_base_url", &self.api_base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("retry", &self.retry)
            .field("autosave_interval_secs", &self.autosave_interval_secs)
            .field("drain_interval_secs", &self.drain_interval_secs)
            .field("retention", &self.retention)
            .finish()
    }
}

impl ClientConfig {
    /// Parse a config document, normalize it and validate it.
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(raw)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        let mut normalized = self.clone();
        normalized.normalize();
        Ok(serde_json::to_string_pretty(&normalized)?)
    }

    /// Apply `WSM_API_BASE_URL` and `WSM_ACCESS_TOKEN` from `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = trimmed_non_empty(lookup("WSM_API_BASE_URL")) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = trimmed_non_empty(lookup("WSM_ACCESS_TOKEN")) {
            self.access_token = Some(token);
        }
        self.normalize();
        self.validate()
    }

    /// Set one key from its textual form. An empty value clears optional keys.
    ///
    /// The config is left unchanged when the new value does not validate.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        let mut updated = self.clone();
        match key {
            "api_base_url" => updated.api_base_url = trimmed_non_empty(Some(value.to_string())),
            "access_token" => updated.access_token = trimmed_non_empty(Some(value.to_string())),
            "autosave_interval_secs" => updated.autosave_interval_secs = parse_number(key, value)?,
            "drain_interval_secs" => updated.drain_interval_secs = parse_number(key, value)?,
            "retry.base_delay_ms" => updated.retry.base_delay_ms = parse_number(key, value)?,
            "retry.max_delay_ms" => updated.retry.max_delay_ms = parse_number(key, value)?,
            "retry.stuck_after_attempts" => {
                updated.retry.stuck_after_attempts = parse_number(key, value)?;
            }
            "retention.max_points" => updated.retention.max_points = parse_number(key, value)?,
            "retention.max_age_days" => updated.retention.max_age_days = parse_number(key, value)?,
            other => {
                return Err(Error::InvalidInput(format!(
                    "unknown config key '{other}' (expected one of: {})",
                    CONFIG_KEYS.join(", ")
                )))
            }
        }
        updated.normalize();
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn sync_enabled(&self) -> bool {
        self.api_base_url.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = self.api_base_url.as_deref() {
            if canonical_api_url(url).is_none() {
                return Err(Error::InvalidInput(
                    "api_base_url must include http:// or https://".to_string(),
                ));
            }
        }
        for (key, value) in [
            ("autosave_interval_secs", self.autosave_interval_secs),
            ("drain_interval_secs", self.drain_interval_secs),
        ] {
            if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&value) {
                return Err(Error::InvalidInput(format!(
                    "{key} must be between {MIN_INTERVAL_SECS} and {MAX_INTERVAL_SECS}"
                )));
            }
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(Error::InvalidInput(
                "retry.max_delay_ms must not be lower than retry.base_delay_ms".to_string(),
            ));
        }
        if self.retry.stuck_after_attempts == 0 {
            return Err(Error::InvalidInput(
                "retry.stuck_after_attempts must be at least 1".to_string(),
            ));
        }
        if self.retention.max_points == 0 || self.retention.max_age_days == 0 {
            return Err(Error::InvalidInput(
                "retention must keep at least one point for at least one day".to_string(),
            ));
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.api_base_url = trimmed_non_empty(self.api_base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.access_token = trimmed_non_empty(self.access_token.take());
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidInput(format!("{key} expects a non-negative integer, got '{value}'")))
}
