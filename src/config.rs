//! Configuration loading and management.
//!
//! Lookup order for the config file:
//! 1. An explicit path (`--config`)
//! 2. `TASKBOARD_CONFIG`
//! 3. `./.taskboard/config.yaml`
//! 4. `~/.taskboard/config.yaml`
//!
//! Environment overrides (`TASKBOARD_DB_PATH`, `TASKBOARD_POLL_INTERVAL`)
//! apply on top of whichever file was found, or of the defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Board configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".taskboard/tasks.db")
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often `schedule watch` looks for due tasks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Timezone used for calendar arithmetic on recurring tasks.
    #[serde(default)]
    pub timezone: ScheduleTimezone,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            timezone: ScheduleTimezone::default(),
        }
    }
}

fn default_poll_interval() -> u64 {
    30
}

/// Timezone for recurrence arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleTimezone {
    /// The host's local timezone.
    #[default]
    Local,
    Utc,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the config file, load it, and apply environment overrides.
    ///
    /// An explicit path must exist; the implicit locations are optional.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match Self::candidate_paths().into_iter().find(|p| p.is_file()) {
                Some(path) => {
                    tracing::debug!(path = %path.display(), "loading config");
                    Self::load(path)?
                }
                None => Self::default(),
            },
        };

        config.apply_env();
        Ok(config)
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var("TASKBOARD_CONFIG") {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from(".taskboard/config.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".taskboard").join("config.yaml"));
        }
        paths
    }

    fn apply_env(&mut self) {
        if let Ok(db_path) = std::env::var("TASKBOARD_DB_PATH") {
            self.database.path = PathBuf::from(db_path);
        }

        if let Ok(interval) = std::env::var("TASKBOARD_POLL_INTERVAL") {
            match interval.parse() {
                Ok(seconds) => self.scheduler.poll_interval_seconds = seconds,
                Err(_) => tracing::warn!(value = %interval, "ignoring invalid TASKBOARD_POLL_INTERVAL"),
            }
        }
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.database.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let config: Config = serde_yaml::from_str("database: {}\n").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.scheduler.poll_interval_seconds, 30);
        assert_eq!(config.scheduler.timezone, ScheduleTimezone::Local);
    }

    #[test]
    fn load_reads_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database:\n  path: /tmp/board.db\nscheduler:\n  poll_interval_seconds: 5\n  timezone: utc"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.database.path, PathBuf::from("/tmp/board.db"));
        assert_eq!(config.scheduler.poll_interval_seconds, 5);
        assert_eq!(config.scheduler.timezone, ScheduleTimezone::Utc);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::resolve(Some(dir.path().join("nope.yaml").as_path())).is_err());
    }

    #[test]
    fn ensure_db_dir_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = dir.path().join("nested").join("tasks.db");

        config.ensure_db_dir().unwrap();

        assert!(dir.path().join("nested").is_dir());
    }
}
