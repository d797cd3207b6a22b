//! Startup configuration.
//!
//! Parsed once at startup from the environment (after `.env` is loaded) and
//! validated before any worker or cleanup task starts.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::queue::{CleanupConfig, CompletionPolicy, WorkerConfig};
use crate::{Error, Result};

/// Default database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:jobqueue.db?mode=rwc";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Directory for daily rolling log files. Console only when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            worker: WorkerConfig::default(),
            cleanup: CleanupConfig::default(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Build from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or empty keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = get("LOG_DIR") {
            config.log_dir = Some(PathBuf::from(dir));
        }

        let worker = &mut config.worker;
        set_parsed(&get, "JOBQUEUE_POLL_INTERVAL_MS", &mut worker.poll_interval_ms)?;
        set_parsed(&get, "JOBQUEUE_MAX_ATTEMPTS", &mut worker.max_attempts)?;
        set_parsed(&get, "JOBQUEUE_BATCH_SIZE", &mut worker.batch_size)?;
        set_parsed(&get, "JOBQUEUE_RETRY_DELAY_MS", &mut worker.retry_delay_ms)?;
        set_parsed(&get, "JOBQUEUE_MAX_RETRY_DELAY_MS", &mut worker.max_retry_delay_ms)?;
        set_parsed::<CompletionPolicy, _>(&get, "JOBQUEUE_COMPLETION", &mut worker.completion)?;
        set_flag(&get, "JOBQUEUE_RECOVER_ON_START", &mut worker.recover_on_start)?;

        let cleanup = &mut config.cleanup;
        set_parsed(&get, "CLEANUP_INTERVAL_MINUTES", &mut cleanup.interval_minutes)?;
        set_parsed(
            &get,
            "CLEANUP_RETENTION_COMPLETED_HOURS",
            &mut cleanup.retention_completed_hours,
        )?;
        set_parsed(
            &get,
            "CLEANUP_RETENTION_FAILED_HOURS",
            &mut cleanup.retention_failed_hours,
        )?;
        set_parsed(&get, "CLEANUP_BATCH_SIZE", &mut cleanup.batch_size)?;
        set_flag(&get, "CLEANUP_DRY_RUN", &mut cleanup.dry_run)?;
        set_parsed(&get, "CLEANUP_INITIAL_DELAY_SECS", &mut cleanup.initial_delay_secs)?;

        Ok(config)
    }

    /// Reject values that would make the queue misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(Error::config("database URL must not be empty"));
        }
        self.worker.validate()?;
        self.cleanup.validate()?;
        Ok(())
    }
}

fn set_parsed<T, G>(get: &G, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("invalid value '{}' for {}: {}", raw, key, e)))?;
    }
    Ok(())
}

fn set_flag<G>(get: &G, key: &str, target: &mut bool) -> Result<()>
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        *target = match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(Error::config(format!(
                    "invalid value '{}' for {}: expected a boolean",
                    raw, key
                )));
            }
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.worker.poll_interval_ms, 1000);
        assert_eq!(config.worker.max_attempts, 3);
        assert_eq!(config.worker.batch_size, 1);
        assert_eq!(config.worker.completion, CompletionPolicy::Delete);
        assert_eq!(config.cleanup, CleanupConfig::default());
        assert!(config.log_dir.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite:/tmp/q.db"),
            ("JOBQUEUE_POLL_INTERVAL_MS", "250"),
            ("JOBQUEUE_MAX_ATTEMPTS", "5"),
            ("JOBQUEUE_COMPLETION", "retain"),
            ("JOBQUEUE_RECOVER_ON_START", "no"),
            ("CLEANUP_RETENTION_FAILED_HOURS", "0"),
            ("CLEANUP_DRY_RUN", "true"),
            ("LOG_DIR", "logs"),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "sqlite:/tmp/q.db");
        assert_eq!(config.worker.poll_interval_ms, 250);
        assert_eq!(config.worker.max_attempts, 5);
        assert_eq!(config.worker.completion, CompletionPolicy::Retain);
        assert!(!config.worker.recover_on_start);
        assert_eq!(config.cleanup.retention_failed_hours, 0);
        assert!(config.cleanup.dry_run);
        assert_eq!(config.log_dir, Some(PathBuf::from("logs")));
    }

    #[test]
    fn test_unparseable_values_fail_fast() {
        let err = AppConfig::from_lookup(lookup(&[("JOBQUEUE_MAX_ATTEMPTS", "three")])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("JOBQUEUE_MAX_ATTEMPTS"));

        assert!(AppConfig::from_lookup(lookup(&[("CLEANUP_DRY_RUN", "maybe")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("JOBQUEUE_POLL_INTERVAL_MS", "-1")])).is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_intervals() {
        let config =
            AppConfig::from_lookup(lookup(&[("JOBQUEUE_POLL_INTERVAL_MS", "0")])).unwrap();
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = AppConfig::from_lookup(lookup(&[("CLEANUP_INTERVAL_MINUTES", "0")])).unwrap();
        assert!(config.validate().is_err());

        let config = AppConfig {
            database_url: " ".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: AppConfig =
            serde_json::from_str(r#"{"worker": {"max_attempts": 7}}"#).unwrap();
        assert_eq!(config.worker.max_attempts, 7);
        assert_eq!(config.worker.poll_interval_ms, 1000);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
    }
}
