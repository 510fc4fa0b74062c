//! Application configuration for paperpipe.
//!
//! User config lives at `~/.paperpipe/paperpipe.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PaperPipeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "paperpipe.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".paperpipe";

// ---------------------------------------------------------------------------
// Config structs (matching paperpipe.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub conversion: ConversionConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the `papers/`, `index/` and `input/` directories.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// JSON array of records produced upstream.
    #[serde(default = "default_input_json")]
    pub input_json: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            input_json: default_input_json(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_input_json() -> PathBuf {
    PathBuf::from("data/input/papers.json")
}

/// `[download]` section: binary fetch policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Per-attempt timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts after the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between attempts; multiplied by the attempt number.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay before attempt `attempt + 1` (attempts are 1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.retry_delay_secs.saturating_mul(u64::from(attempt)))
    }
}

fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    5
}
fn default_user_agent() -> String {
    concat!("paperpipe/", env!("CARGO_PKG_VERSION")).into()
}

/// `[conversion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Skip records whose PDF and markdown already exist.
    #[serde(default = "default_true")]
    pub skip_existing: bool,

    /// Optional upper bound for a single conversion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            skip_existing: true,
            timeout_secs: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Records processed at once; 1 means strictly sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file; `{timestamp}` is replaced at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

impl AppConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch.concurrency == 0 {
            return Err(PaperPipeError::config("batch.concurrency must be at least 1"));
        }
        if self.download.timeout_secs == 0 {
            return Err(PaperPipeError::config("download.timeout_secs must be at least 1"));
        }
        if self.storage.base_dir.as_os_str().is_empty() {
            return Err(PaperPipeError::config("storage.base_dir cannot be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.paperpipe/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PaperPipeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.paperpipe/paperpipe.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PaperPipeError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| PaperPipeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write a default config file to `path` (or the default location).
/// Returns the path to the created file.
pub fn init_config(path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| PaperPipeError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| PaperPipeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PaperPipeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
