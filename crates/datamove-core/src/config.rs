//! Configuration module for the transfer engine.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Page-blob writes must be aligned to this many bytes, so block sizes are too.
pub const BLOCK_ALIGNMENT: u64 = 512;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transfer: TransferConfig,
    pub journal: JournalConfig,
    pub permissions: PermissionsConfig,
    pub logging: LoggingConfig,
}

/// Parallelism, buffer and chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Execution slots shared by every active job's chunk operations.
    pub parallelism: usize,
    /// Jobs allowed to run at once; further jobs wait in arrival order.
    pub max_concurrent_jobs: usize,
    /// Size of a large buffer, and the upper bound of a chunk (bytes).
    pub block_size: u64,
    /// Size of a small buffer, used for chunks that fit in it (bytes).
    pub small_block_size: u64,
    /// Memory budget for large buffers (bytes).
    pub memory_budget: u64,
    /// Memory budget for small buffers (bytes).
    pub small_memory_budget: u64,
    /// Lower bound of an adaptively planned chunk (bytes).
    pub min_chunk_size: u64,
    /// Chunk count the adaptive planner aims for.
    pub target_chunk_count: u64,
}

/// Checkpoint journal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Persist checkpoints so interrupted jobs can resume after a restart.
    pub enabled: bool,
    /// Path of the SQLite journal database.
    pub path: PathBuf,
}

/// Security-descriptor cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Maximum cached permission keys.
    pub cache_capacity: usize,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/datamove/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("datamove")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Host cores times eight, the default number of execution slots.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_mul(8)
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_concurrent_jobs: 16,
            block_size: 8 * MIB,
            small_block_size: 64 * KIB,
            memory_budget: 512 * MIB,
            small_memory_budget: 16 * MIB,
            min_chunk_size: 256 * KIB,
            target_chunk_count: 512,
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("datamove")
                .join("journal.db"),
        }
    }
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"transfer.block_size"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ValidationError {
                field: field.into(),
                message,
            });
        };
        let t = &self.transfer;

        // --- transfer ---
        if t.parallelism == 0 {
            push("transfer.parallelism", "must be greater than 0".into());
        }
        if t.max_concurrent_jobs == 0 {
            push("transfer.max_concurrent_jobs", "must be greater than 0".into());
        }
        if t.block_size == 0 || t.block_size % BLOCK_ALIGNMENT != 0 {
            push(
                "transfer.block_size",
                format!("must be a positive multiple of {BLOCK_ALIGNMENT}"),
            );
        }
        if t.small_block_size == 0 || t.small_block_size % BLOCK_ALIGNMENT != 0 {
            push(
                "transfer.small_block_size",
                format!("must be a positive multiple of {BLOCK_ALIGNMENT}"),
            );
        } else if t.small_block_size > t.block_size {
            push(
                "transfer.small_block_size",
                "must not exceed transfer.block_size".into(),
            );
        }
        if t.memory_budget < t.block_size {
            push(
                "transfer.memory_budget",
                "must hold at least one block".into(),
            );
        }
        if t.small_memory_budget < t.small_block_size {
            push(
                "transfer.small_memory_budget",
                "must hold at least one small block".into(),
            );
        }
        if t.min_chunk_size == 0 {
            push("transfer.min_chunk_size", "must be greater than 0".into());
        } else if t.min_chunk_size > t.block_size {
            push(
                "transfer.min_chunk_size",
                "must not exceed transfer.block_size".into(),
            );
        }
        if t.target_chunk_count == 0 {
            push("transfer.target_chunk_count", "must be greater than 0".into());
        }

        // --- journal ---
        if self.journal.enabled && self.journal.path.as_os_str().is_empty() {
            push("journal.path", "must be set when the journal is enabled".into());
        }

        // --- permissions ---
        if self.permissions.cache_capacity == 0 {
            push("permissions.cache_capacity", "must be greater than 0".into());
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            push(
                "logging.level",
                format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            );
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Config`], starting from defaults.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from [`Config::default`].
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- transfer ---

    pub fn parallelism(mut self, slots: usize) -> Self {
        self.config.transfer.parallelism = slots;
        self
    }

    pub fn max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.config.transfer.max_concurrent_jobs = jobs;
        self
    }

    pub fn block_size(mut self, bytes: u64) -> Self {
        self.config.transfer.block_size = bytes;
        self
    }

    pub fn small_block_size(mut self, bytes: u64) -> Self {
        self.config.transfer.small_block_size = bytes;
        self
    }

    pub fn memory_budget(mut self, bytes: u64) -> Self {
        self.config.transfer.memory_budget = bytes;
        self
    }

    pub fn small_memory_budget(mut self, bytes: u64) -> Self {
        self.config.transfer.small_memory_budget = bytes;
        self
    }

    pub fn min_chunk_size(mut self, bytes: u64) -> Self {
        self.config.transfer.min_chunk_size = bytes;
        self
    }

    pub fn target_chunk_count(mut self, count: u64) -> Self {
        self.config.transfer.target_chunk_count = count;
        self
    }

    // --- journal ---

    pub fn journal_enabled(mut self, enabled: bool) -> Self {
        self.config.journal.enabled = enabled;
        self
    }

    pub fn journal_path(mut self, path: PathBuf) -> Self {
        self.config.journal.path = path;
        self
    }

    // --- permissions ---

    pub fn permission_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.permissions.cache_capacity = capacity;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
