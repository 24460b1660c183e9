//! Process-wide queue defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BackoffPolicy, ValidationError};

/// Verbosity of the queue's logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ValidationError::invalid(
                "log_level",
                format!("'{}' is not one of trace, debug, info, warn, error", other),
            )),
        }
    }
}

/// Keys accepted by `config set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    MaxRetries,
    BackoffBaseSeconds,
    LogLevel,
    MaxBackoffSeconds,
    PollIntervalMs,
    JobTimeoutSeconds,
    LeaseSeconds,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 7] = [
        ConfigKey::MaxRetries,
        ConfigKey::BackoffBaseSeconds,
        ConfigKey::LogLevel,
        ConfigKey::MaxBackoffSeconds,
        ConfigKey::PollIntervalMs,
        ConfigKey::JobTimeoutSeconds,
        ConfigKey::LeaseSeconds,
    ];

    /// Field name, as stored and as typed on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::MaxRetries => "max_retries",
            ConfigKey::BackoffBaseSeconds => "backoff_base_seconds",
            ConfigKey::LogLevel => "log_level",
            ConfigKey::MaxBackoffSeconds => "max_backoff_seconds",
            ConfigKey::PollIntervalMs => "poll_interval_ms",
            ConfigKey::JobTimeoutSeconds => "job_timeout_seconds",
            ConfigKey::LeaseSeconds => "lease_seconds",
        }
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConfigKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        // "backoff_seconds" is the older spelling of the backoff base.
        if key == "backoff_seconds" {
            return Ok(ConfigKey::BackoffBaseSeconds);
        }
        ConfigKey::ALL
            .into_iter()
            .find(|k| k.as_str() == key)
            .ok_or_else(|| ValidationError::UnknownKey(s.to_string()))
    }
}

/// Configuration for queue behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Retry ceiling snapshotted into new jobs.
    pub max_retries: u32,
    /// Backoff base snapshotted into new jobs.
    pub backoff_base_seconds: f64,
    /// Log verbosity for queue processes.
    pub log_level: LogLevel,
    /// Ceiling on a single backoff delay.
    pub max_backoff_seconds: u64,
    /// How long an idle worker sleeps between empty claims.
    pub poll_interval_ms: u64,
    /// Kill commands running longer than this; 0 disables.
    pub job_timeout_seconds: u64,
    /// Return `processing` jobs claimed longer ago than this to `pending`; 0 disables.
    pub lease_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_seconds: 2.0,
            log_level: LogLevel::Info,
            max_backoff_seconds: 24 * 60 * 60,
            poll_interval_ms: 1000,
            job_timeout_seconds: 0,
            lease_seconds: 0,
        }
    }
}

impl QueueConfig {
    /// Backoff policy for jobs enqueued under this config.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_base_seconds)
            .with_max_delay(Duration::from_secs(self.max_backoff_seconds))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_seconds > 0).then(|| Duration::from_secs(self.job_timeout_seconds))
    }

    pub fn lease(&self) -> Option<Duration> {
        (self.lease_seconds > 0).then(|| Duration::from_secs(self.lease_seconds))
    }

    /// Current value of `key`, formatted for display.
    pub fn get(&self, key: ConfigKey) -> String {
        match key {
            ConfigKey::MaxRetries => self.max_retries.to_string(),
            ConfigKey::BackoffBaseSeconds => self.backoff_base_seconds.to_string(),
            ConfigKey::LogLevel => self.log_level.to_string(),
            ConfigKey::MaxBackoffSeconds => self.max_backoff_seconds.to_string(),
            ConfigKey::PollIntervalMs => self.poll_interval_ms.to_string(),
            ConfigKey::JobTimeoutSeconds => self.job_timeout_seconds.to_string(),
            ConfigKey::LeaseSeconds => self.lease_seconds.to_string(),
        }
    }

    /// Parse and validate `value`, then store it under `key`.
    ///
    /// On error `self` is left untouched.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<(), ValidationError> {
        let value = value.trim();
        match key {
            ConfigKey::MaxRetries => self.max_retries = parse_positive(key, value)?,
            ConfigKey::BackoffBaseSeconds => {
                let base: f64 = value
                    .parse()
                    .map_err(|_| ValidationError::invalid(key.as_str(), "not a number"))?;
                if !base.is_finite() || base <= 0.0 {
                    return Err(ValidationError::invalid(
                        key.as_str(),
                        "must be a positive number",
                    ));
                }
                self.backoff_base_seconds = base;
            }
            ConfigKey::LogLevel => self.log_level = value.parse()?,
            ConfigKey::MaxBackoffSeconds => self.max_backoff_seconds = parse_positive(key, value)?,
            ConfigKey::PollIntervalMs => self.poll_interval_ms = parse_positive(key, value)?,
            ConfigKey::JobTimeoutSeconds => self.job_timeout_seconds = parse_non_negative(key, value)?,
            ConfigKey::LeaseSeconds => self.lease_seconds = parse_non_negative(key, value)?,
        }
        Ok(())
    }

    /// All keys with their current values, in display order.
    pub fn entries(&self) -> Vec<(ConfigKey, String)> {
        ConfigKey::ALL
            .into_iter()
            .map(|key| (key, self.get(key)))
            .collect()
    }
}

fn parse_non_negative<T: std::str::FromStr>(key: ConfigKey, value: &str) -> Result<T, ValidationError> {
    value
        .parse()
        .map_err(|_| ValidationError::invalid(key.as_str(), "must be a non-negative integer"))
}

fn parse_positive<T>(key: ConfigKey, value: &str) -> Result<T, ValidationError>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let parsed: T = value
        .parse()
        .map_err(|_| ValidationError::invalid(key.as_str(), "must be a positive integer"))?;
    if parsed == T::default() {
        return Err(ValidationError::invalid(
            key.as_str(),
            "must be a positive integer",
        ));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = QueueConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base_seconds, 2.0);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.job_timeout(), None);
        assert_eq!(config.lease(), None);
    }

    #[test]
    fn set_validates_before_writing() {
        let mut config = QueueConfig::default();

        config.set(ConfigKey::MaxRetries, "5").unwrap();
        assert_eq!(config.max_retries, 5);

        assert!(config.set(ConfigKey::MaxRetries, "0").is_err());
        assert!(config.set(ConfigKey::MaxRetries, "-2").is_err());
        assert!(config.set(ConfigKey::MaxRetries, "three").is_err());
        assert_eq!(config.max_retries, 5);

        config.set(ConfigKey::BackoffBaseSeconds, "1.5").unwrap();
        assert_eq!(config.backoff_base_seconds, 1.5);
        assert!(config.set(ConfigKey::BackoffBaseSeconds, "0").is_err());
        assert!(config.set(ConfigKey::BackoffBaseSeconds, "NaN").is_err());

        config.set(ConfigKey::LogLevel, "DEBUG").unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.set(ConfigKey::LogLevel, "loud").is_err());

        config.set(ConfigKey::LeaseSeconds, "0").unwrap();
        config.set(ConfigKey::JobTimeoutSeconds, "30").unwrap();
        assert_eq!(config.job_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn keys_parse_with_legacy_alias() {
        assert_eq!("max_retries".parse(), Ok(ConfigKey::MaxRetries));
        assert_eq!("backoff_seconds".parse(), Ok(ConfigKey::BackoffBaseSeconds));
        assert_eq!("poll-interval-ms".parse(), Ok(ConfigKey::PollIntervalMs));
        assert!(matches!(
            "colour".parse::<ConfigKey>(),
            Err(ValidationError::UnknownKey(_))
        ));
    }

    #[test]
    fn entries_cover_every_key() {
        let entries = QueueConfig::default().entries();
        assert_eq!(entries.len(), ConfigKey::ALL.len());
        assert_eq!(entries[0], (ConfigKey::MaxRetries, "3".to_string()));
    }
}
