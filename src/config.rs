use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from logcap.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct LogcapConfig {
    pub task: TaskConfig,
    pub limit: LimitConfig,
    pub defaults: DefaultsConfig,
    pub watchdog: WatchdogTimingConfig,
    pub report: ReportConfig,
}

/// The task to run and where its output log goes.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub command: String,
    pub args: Vec<String>,
    pub log_file: PathBuf,
}

/// Per-run cap settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct LimitConfig {
    /// Use this run's own cap instead of the process-wide default.
    pub use_own: bool,
    /// This run's own cap in MB. Zero or negative means "no limit".
    pub max_log_mb: i64,
    /// Fail the run instead of aborting it when the cap is crossed.
    pub fail_on_exceed: bool,
}

/// Process-wide defaults, used when a run has no cap of its own.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct DefaultsConfig {
    /// Default cap in MB. Zero or negative means "no limit".
    pub max_log_mb: i64,
}

/// Watchdog check cadence.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchdogTimingConfig {
    pub initial_delay_secs: u64,
    pub check_interval_secs: u64,
}

/// Optional machine-readable run report.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ReportConfig {
    pub path: Option<PathBuf>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            log_file: PathBuf::from("task.log"),
        }
    }
}

impl Default for WatchdogTimingConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 1,
            check_interval_secs: 1,
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse the config file as TOML.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config file {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load configuration from a TOML file.
pub fn load(path: &Path) -> Result<LogcapConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}
