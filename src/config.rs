//! Configuration loading and management
//!
//! Handles parsing of `config.toml` inside the tasklog data directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::collection::CollectionOptions;
use crate::error::{Error, Result};
use crate::grouped::Granularity;
use crate::task::{validate_context, Category, Millis};

/// Overrides the data directory.
pub const HOME_ENV: &str = "TASKLOG_HOME";
pub const CONFIG_FILE: &str = "config.toml";
pub const LOG_FILE: &str = "events.jsonl";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tasks: TasksConfig,

    #[serde(default)]
    pub undo: UndoConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Task creation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Put new tasks at the front of the active list
    #[serde(default)]
    pub new_tasks_at_top: bool,

    /// Context for `add` when none is given
    #[serde(default = "default_context")]
    pub default_context: String,

    /// Category for `add` when none is given
    #[serde(default = "default_category")]
    pub default_category: String,
}

fn default_context() -> String {
    "inbox".to_string()
}

fn default_category() -> String {
    "daily".to_string()
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            new_tasks_at_top: false,
            default_context: default_context(),
            default_category: default_category(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoConfig {
    /// How long an action stays undoable, e.g. "1h" or "90m"
    #[serde(default = "default_undo_max_age")]
    pub max_age: String,
}

fn default_undo_max_age() -> String {
    "1h".to_string()
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            max_age: default_undo_max_age(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Bucket size for completed and failed tasks: day, week, month or year
    #[serde(default = "default_granularity")]
    pub granularity: String,
}

fn default_granularity() -> String {
    "month".to_string()
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            granularity: default_granularity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Event log location; defaults to `events.jsonl` in the data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration if the file exists, or return defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.undo_max_age_ms()?;
        self.granularity()?;
        self.default_category()?;
        validate_context(&self.tasks.default_context)
            .map_err(|err| Error::InvalidConfig(format!("tasks.default_context: {err}")))?;
        Ok(())
    }

    pub fn undo_max_age_ms(&self) -> Result<Millis> {
        let duration = parse_duration(&self.undo.max_age)
            .map_err(|err| Error::InvalidConfig(format!("undo.max_age: {err}")))?;
        let millis = duration.num_milliseconds();
        if millis <= 0 {
            return Err(Error::InvalidConfig(
                "undo.max_age must be positive".to_string(),
            ));
        }
        Ok(millis)
    }

    pub fn granularity(&self) -> Result<Granularity> {
        self.history
            .granularity
            .parse()
            .map_err(|err| Error::InvalidConfig(format!("history.granularity: {err}")))
    }

    pub fn default_category(&self) -> Result<Category> {
        self.tasks
            .default_category
            .parse()
            .map_err(|err| Error::InvalidConfig(format!("tasks.default_category: {err}")))
    }

    pub fn collection_options(&self) -> Result<CollectionOptions> {
        Ok(CollectionOptions {
            new_tasks_at_top: self.tasks.new_tasks_at_top,
            granularity: self.granularity()?,
        })
    }

    /// Event log path, relative paths resolved against `data_dir`.
    pub fn log_path(&self, data_dir: &Path) -> PathBuf {
        match &self.storage.log_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => data_dir.join(path),
            None => data_dir.join(LOG_FILE),
        }
    }
}

/// The tasklog data directory: `$TASKLOG_HOME`, else the platform data dir.
pub fn data_dir() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    directories::ProjectDirs::from("", "", "tasklog")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| Error::InvalidConfig("cannot determine a data directory".to_string()))
}

pub fn default_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Parses `30s`, `15m`, `2h`, `1d` or `1w`. A bare number means minutes.
pub fn parse_duration(s: &str) -> Result<chrono::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidArgument("Duration cannot be empty".to_string()));
    }

    let (num_str, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => (&s[..pos], s[pos..].trim()),
        None => (s, "m"),
    };

    let num: i64 = num_str
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("Invalid duration number: {num_str}")))?;

    let duration = match unit.to_lowercase().as_str() {
        "s" | "sec" | "second" | "seconds" => chrono::Duration::seconds(num),
        "m" | "min" | "minute" | "minutes" => chrono::Duration::minutes(num),
        "h" | "hr" | "hour" | "hours" => chrono::Duration::hours(num),
        "d" | "day" | "days" => chrono::Duration::days(num),
        "w" | "week" | "weeks" => chrono::Duration::weeks(num),
        _ => {
            return Err(Error::InvalidArgument(format!(
                "Invalid duration unit '{unit}'. Expected: s, m, h, d, w"
            )));
        }
    };
    Ok(duration)
}
