// ABOUTME: Migration configuration: YAML file sections with defaults, merged into an explicit struct.
// ABOUTME: The resulting MigrationConfig is passed into each component; nothing reads process-wide state.

use std::path::{Path, PathBuf};

use keyshift_core::KeySchema;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_PAGE_LIMIT: usize = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 25;
pub const DEFAULT_CHECKPOINT_PATH: &str = ".keyshift_scan.ckpt.json";
pub const DEFAULT_AUDIT_PATH: &str = "migration_audit.csv";
pub const DEFAULT_STORE_PATH: &str = "keyshift.db";
pub const DEFAULT_SEQUENCE_ATTR: &str = "postedTransactionSequenceNumber";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Name of the config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "keyshift.yaml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "KEYSHIFT_CONFIG";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The `scan` section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub limit: Option<usize>,
    pub batch_size: Option<usize>,
    pub checkpoint_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MigrationSection {
    pub sequence_attr: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<String>,
}

/// Contents of a config file. Every section and key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub scan: ScanSection,
    pub audit: AuditSection,
    pub store: StoreSection,
    pub migration: MigrationSection,
    pub logging: LoggingSection,
}

impl FileConfig {
    /// Pick the config file to read: an explicit path wins, then the
    /// KEYSHIFT_CONFIG environment variable, then `keyshift.yaml` in the
    /// working directory if it exists.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = std::env::var(CONFIG_ENV).ok().filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        local.exists().then_some(local)
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse config YAML. An empty document yields the defaults.
    pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }
}

/// Paging and checkpoint settings for the table scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub page_limit: usize,
    pub batch_size: usize,
    pub checkpoint_path: PathBuf,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            page_limit: DEFAULT_PAGE_LIMIT,
            batch_size: DEFAULT_BATCH_SIZE,
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
        }
    }
}

/// Everything one migration run needs to know.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub table: String,
    pub keys: KeySchema,
    pub sequence_attr: String,
    pub audit_path: PathBuf,
    pub store_path: PathBuf,
    pub scan: ScanSettings,
    pub reset_scan: bool,
    pub log_level: String,
}

impl MigrationConfig {
    /// A config with built-in defaults for everything but the table identity.
    pub fn new(table: impl Into<String>, keys: KeySchema) -> Self {
        Self {
            table: table.into(),
            keys,
            sequence_attr: DEFAULT_SEQUENCE_ATTR.to_string(),
            audit_path: PathBuf::from(DEFAULT_AUDIT_PATH),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            scan: ScanSettings::default(),
            reset_scan: false,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }

    /// Layer the values present in a config file over the defaults.
    pub fn with_file(mut self, file: &FileConfig) -> Self {
        if let Some(limit) = file.scan.limit {
            self.scan.page_limit = limit;
        }
        if let Some(batch_size) = file.scan.batch_size {
            self.scan.batch_size = batch_size;
        }
        if let Some(path) = &file.scan.checkpoint_path {
            self.scan.checkpoint_path = path.clone();
        }
        if let Some(path) = &file.audit.path {
            self.audit_path = path.clone();
        }
        if let Some(path) = &file.store.path {
            self.store_path = path.clone();
        }
        if let Some(attr) = &file.migration.sequence_attr {
            self.sequence_attr = attr.clone();
        }
        if let Some(level) = &file.logging.level {
            self.log_level = level.to_lowercase();
        }
        self
    }

    /// Reject settings the scan or engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.trim().is_empty() {
            return Err(ConfigError::Invalid("table name is empty".into()));
        }
        if self.keys.partition_key.is_empty() || self.keys.sort_key.is_empty() {
            return Err(ConfigError::Invalid("key attribute names must not be empty".into()));
        }
        if self.keys.partition_key == self.keys.sort_key {
            return Err(ConfigError::Invalid(format!(
                "partition and sort key are both '{}'",
                self.keys.sort_key
            )));
        }
        if self.sequence_attr.is_empty()
            || self.sequence_attr == self.keys.partition_key
            || self.sequence_attr == self.keys.sort_key
        {
            return Err(ConfigError::Invalid(format!(
                "sequence attribute '{}' must be a non-key attribute",
                self.sequence_attr
            )));
        }
        if self.scan.page_limit == 0 {
            return Err(ConfigError::Invalid("scan.limit must be at least 1".into()));
        }
        if self.scan.batch_size == 0 {
            return Err(ConfigError::Invalid("scan.batch_size must be at least 1".into()));
        }
        Ok(())
    }
}
