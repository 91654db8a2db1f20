use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CairnConfig {
    pub storage: StorageConfig,
    pub working: WorkingConfig,
    pub context: ContextConfig,
    pub retention: RetentionConfig,
    pub learning: LearningConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the memory document. Relative paths are resolved
    /// against the project root.
    pub memory_dir: String,
    pub file_name: String,
    /// Keep a copy of an unparseable document before resetting it.
    pub backup_corrupt: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkingConfig {
    pub max_recent_operations: usize,
    pub max_command_history: usize,
    /// Zero disables the file cache.
    pub max_cached_files: usize,
    pub max_active_files: usize,
    /// Events held for persistent memory while the store is unwritable.
    /// Zero means unlimited.
    pub max_unsynced_events: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ContextConfig {
    pub frequent_files: usize,
    pub recent_operations: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_records_per_file: usize,
    pub max_file_access_records: usize,
    pub max_success_patterns: usize,
    pub max_snippets: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LearningConfig {
    /// Number of successful repeats of an operation+filetype shape before it
    /// is committed as a pattern.
    pub repetition_threshold: usize,
    pub learn_every_turns: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub audit_depth: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            memory_dir: ".cairn".into(),
            file_name: "memory.json".into(),
            backup_corrupt: true,
        }
    }
}

impl Default for WorkingConfig {
    fn default() -> Self {
        Self {
            max_recent_operations: 50,
            max_command_history: 50,
            max_cached_files: 100,
            max_active_files: 50,
            max_unsynced_events: 10_000,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            frequent_files: 5,
            recent_operations: 10,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_records_per_file: 100,
            max_file_access_records: 10_000,
            max_success_patterns: 1000,
            max_snippets: 1000,
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            repetition_threshold: 3,
            learn_every_turns: 10,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { audit_depth: 20 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// Returns `~/.cairn/`
pub fn default_cairn_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".cairn"))
}

/// Returns the default config file path: `~/.cairn/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    default_cairn_dir().map(|dir| dir.join("config.toml"))
}

impl CairnConfig {
    /// Load config from the default TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        match default_config_path() {
            Some(path) => Self::load_from(path),
            None => {
                let mut config = CairnConfig::default();
                config.apply_env_overrides();
                Ok(config)
            }
        }
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            CairnConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (CAIRN_MEMORY_DIR, CAIRN_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CAIRN_MEMORY_DIR") {
            self.storage.memory_dir = val;
        }
        if let Ok(val) = std::env::var("CAIRN_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Resolve the memory document path for a project root.
    pub fn store_path(&self, project_root: &Path) -> PathBuf {
        let dir = expand_tilde(&self.storage.memory_dir);
        let dir = if dir.is_absolute() {
            dir
        } else {
            project_root.join(dir)
        };
        dir.join(&self.storage.file_name)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
