use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Exit code for any configuration failure.
pub const EXIT_CONFIG: u8 = 1;

/// Configuration loaded once at startup from `config.json` (or a `.toml` file).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SyncConfig {
    /// Executable of the application to launch and watch.
    #[serde(alias = "obsidian-path")]
    pub app_path: String,
    pub app_args: Vec<String>,
    /// Git working tree that gets pulled before launch and synced afterwards.
    #[serde(alias = "vault-dir")]
    pub work_dir: PathBuf,
    /// chrono strftime format used for the commit timestamp.
    pub commit_date_format: String,
    /// Commit message template; `{time}` is replaced by the formatted timestamp.
    pub commit_message: String,
    /// Seconds between periodic syncs. Zero or negative disables them.
    ///
    /// Legacy files name this `sync-freq-min`; its value was always compared
    /// against elapsed seconds, so it is read as seconds too.
    #[serde(alias = "sync-freq-min")]
    pub sync_interval_secs: i64,
    pub sync_step_timeout_secs: u64,
    pub abort_on_pull_failure: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            app_path: String::new(),
            app_args: Vec::new(),
            work_dir: PathBuf::new(),
            commit_date_format: "%Y-%m-%d %H:%M:%S".to_string(),
            commit_message: "Updated on {time}".to_string(),
            sync_interval_secs: 0,
            sync_step_timeout_secs: 120,
            abort_on_pull_failure: false,
        }
    }
}

impl SyncConfig {
    /// Read and parse the config file, then validate it.
    ///
    /// Files ending in `.toml` are parsed as TOML, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: SyncConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&contents).map_err(|e| ConfigError::Toml {
                path: path.to_path_buf(),
                source: e,
            })?,
            _ => serde_json::from_str(&contents).map_err(|e| ConfigError::Json {
                path: path.to_path_buf(),
                source: e,
            })?,
        };

        tracing::debug!(path = %path.display(), "loaded config file");
        config.validate()?;
        Ok(config)
    }

    /// Check required fields and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_path.trim().is_empty() {
            return Err(ConfigError::MissingField("app-path"));
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("work-dir"));
        }
        if self.sync_step_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sync-step-timeout-secs",
                reason: "must be at least 1".to_string(),
            });
        }
        // Formatting a broken strftime string panics inside chrono's Display impl,
        // so it has to be rejected here.
        if StrftimeItems::new(&self.commit_date_format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::Invalid {
                field: "commit-date-format",
                reason: format!("invalid strftime format {:?}", self.commit_date_format),
            });
        }
        Ok(())
    }

    /// Periodic sync interval, or `None` when periodic syncing is disabled.
    pub fn sync_interval(&self) -> Option<Duration> {
        u64::try_from(self.sync_interval_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_step_timeout_secs)
    }
}

/// Errors that can occur while loading the configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// A required field is absent or empty.
    MissingField(&'static str),
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub fn exit_code(&self) -> u8 {
        EXIT_CONFIG
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config file {}: {}", path.display(), source)
            }
            ConfigError::Json { path, source } => {
                write!(f, "failed to parse {}: {}", path.display(), source)
            }
            ConfigError::Toml { path, source } => {
                write!(f, "failed to parse {}: {}", path.display(), source)
            }
            ConfigError::MissingField(field) => {
                write!(f, "no {field} specified; add it to the config file")
            }
            ConfigError::Invalid { field, reason } => write!(f, "invalid {field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Json { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::MissingField(_) | ConfigError::Invalid { .. } => None,
        }
    }
}
