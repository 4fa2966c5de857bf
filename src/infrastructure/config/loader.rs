use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid min_workers: {0}. Must be at least 1")]
    InvalidMinWorkers(usize),

    #[error("Invalid pool bounds: min_workers ({min}) exceeds max_workers ({max})")]
    InvalidPoolBounds { min: usize, max: usize },

    #[error("Invalid max_queue_size: 0. Must be at least 1")]
    InvalidQueueSize,

    #[error("Invalid {0}: must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("Invalid success_threshold: {0}. Must be between 0.0 and 1.0")]
    InvalidSuccessThreshold(f64),

    #[error("Invalid schedule '{name}': {reason}")]
    InvalidSchedule { name: String, reason: String },

    #[error("Duplicate schedule name: {0}")]
    DuplicateSchedule(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: &[&str] = &["json", "pretty"];
const VALID_ROTATIONS: &[&str] = &["daily", "hourly", "never"];

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the working directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .conductor/config.yaml
    /// 3. .conductor/local.yaml (optional local overrides)
    /// 4. Environment variables (CONDUCTOR_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same as [`load`](Self::load) with `.conductor/` resolved under `root`.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Config> {
        let state_dir = root.as_ref().join(".conductor");
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(state_dir.join("config.yaml")))
            .merge(Yaml::file(state_dir.join("local.yaml")))
            .merge(Env::prefixed("CONDUCTOR_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file. Environment overrides still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("CONDUCTOR_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let pool = &config.pool;
        if pool.min_workers == 0 {
            return Err(ConfigError::InvalidMinWorkers(pool.min_workers));
        }
        if pool.min_workers > pool.max_workers {
            return Err(ConfigError::InvalidPoolBounds {
                min: pool.min_workers,
                max: pool.max_workers,
            });
        }
        if pool.max_queue_size == 0 {
            return Err(ConfigError::InvalidQueueSize);
        }
        if pool.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("pool.tick_interval_ms"));
        }
        if pool.task_timeout_secs == Some(0) {
            return Err(ConfigError::ZeroInterval("pool.task_timeout_secs"));
        }
        if config.workflow.step_task_timeout_secs == 0 {
            return Err(ConfigError::ZeroInterval("workflow.step_task_timeout_secs"));
        }

        let scheduler = &config.scheduler;
        if scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("scheduler.tick_interval_ms"));
        }
        if scheduler.history_window == 0 {
            return Err(ConfigError::ZeroInterval("scheduler.history_window"));
        }
        if !(0.0..=1.0).contains(&scheduler.success_threshold) {
            return Err(ConfigError::InvalidSuccessThreshold(scheduler.success_threshold));
        }
        let mut names = HashSet::new();
        for entry in &scheduler.schedules {
            entry.validate().map_err(|e| ConfigError::InvalidSchedule {
                name: entry.name.clone(),
                reason: e.to_string(),
            })?;
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigError::DuplicateSchedule(entry.name.clone()));
            }
        }

        if config.watcher.poll_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval("watcher.poll_interval_secs"));
        }
        if config.watcher.block_timeout_secs == 0 {
            return Err(ConfigError::ZeroInterval("watcher.block_timeout_secs"));
        }

        if let Some(rules) = &config.workflow.rules {
            if let Some(rule) = rules.iter().find(|r| r.workflow.trim().is_empty()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "workflow rule for '{}' names no workflow",
                    rule.on.as_str()
                )));
            }
        }

        if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        if !VALID_LOG_FORMATS.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        if !VALID_ROTATIONS.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ScheduleEntry, TaskKind};
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pool.min_workers, 2);
        assert_eq!(config.pool.max_workers, 5);
        assert_eq!(config.scheduler.schedules.len(), 2);
        assert!((config.scheduler.success_threshold - 0.7).abs() < f64::EPSILON);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
pool:
  min_workers: 1
  max_workers: 8
  max_queue_size: 50
workflow:
  default_retry_attempts: 1
scheduler:
  success_threshold: 0.5
  schedules:
    - name: nightly
      cron: "0 2 * * *"
      kind: test
logging:
  level: debug
  format: pretty
"#;

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.pool.max_workers, 8);
        assert_eq!(config.pool.idle_timeout_secs, 300);
        assert_eq!(config.workflow.default_retry_attempts, 1);
        assert_eq!(config.scheduler.schedules.len(), 1);
        assert_eq!(config.scheduler.schedules[0].name, "nightly");
        assert_eq!(config.logging.format, "pretty");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_pool_bounds() {
        let mut config = Config::default();
        config.pool.min_workers = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMinWorkers(0))
        ));

        config.pool.min_workers = 6;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidPoolBounds { min: 6, max: 5 })
        ));

        let mut config = Config::default();
        config.pool.max_queue_size = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidQueueSize)));
    }

    #[test]
    fn test_validate_zero_intervals() {
        let mut config = Config::default();
        config.pool.tick_interval_ms = 0;
        match ConfigLoader::validate(&config) {
            Err(ConfigError::ZeroInterval(field)) => assert_eq!(field, "pool.tick_interval_ms"),
            other => panic!("Expected ZeroInterval error, got {other:?}"),
        }

        let mut config = Config::default();
        config.watcher.poll_interval_secs = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::ZeroInterval(_))));
    }

    #[test]
    fn test_validate_schedules() {
        let mut config = Config::default();
        config
            .scheduler
            .schedules
            .push(ScheduleEntry::new("broken", "every tuesday", TaskKind::Test));
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidSchedule { name, .. }) => assert_eq!(name, "broken"),
            other => panic!("Expected InvalidSchedule error, got {other:?}"),
        }

        let mut config = Config::default();
        config
            .scheduler
            .schedules
            .push(ScheduleEntry::new("hourly-smoke-tests", "*/5 * * * *", TaskKind::Test));
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::DuplicateSchedule(_))
        ));
    }

    #[test]
    fn test_validate_threshold_and_logging() {
        let mut config = Config::default();
        config.scheduler.success_threshold = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidSuccessThreshold(_))
        ));

        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "verbose"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogFormat(_))));
    }

    #[test]
    fn test_hierarchical_merging_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join(".conductor");
        std::fs::create_dir_all(&state_dir).unwrap();

        let mut base = std::fs::File::create(state_dir.join("config.yaml")).unwrap();
        writeln!(base, "pool:\n  min_workers: 1\n  max_workers: 3\nlogging:\n  level: info\n  format: json").unwrap();
        let mut local = std::fs::File::create(state_dir.join("local.yaml")).unwrap();
        writeln!(local, "pool:\n  max_workers: 4\nlogging:\n  level: debug").unwrap();

        temp_env::with_vars(
            [
                ("CONDUCTOR_POOL__MAX_QUEUE_SIZE", Some("42")),
                ("CONDUCTOR_LOGGING__LEVEL", Some("warn")),
            ],
            || {
                let config = ConfigLoader::load_from_dir(dir.path()).unwrap();
                assert_eq!(config.pool.min_workers, 1, "Base value should persist");
                assert_eq!(config.pool.max_workers, 4, "Local override should win");
                assert_eq!(config.pool.max_queue_size, 42, "Env should apply");
                assert_eq!(config.logging.level, "warn", "Env should win over files");
                assert_eq!(config.logging.format, "json");
            },
        );
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pool:\n  min_workers: 9\n  max_workers: 2").unwrap();
        file.flush().unwrap();

        let err = ConfigLoader::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("min_workers"), "{err}");

        assert!(ConfigLoader::load_from_file("/nonexistent/conductor.yaml").is_err());
    }
}
