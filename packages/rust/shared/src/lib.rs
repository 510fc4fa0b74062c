//! Shared types, error model, and configuration for paperpipe.
//!
//! This crate is the foundation depended on by all other paperpipe crates.
//! It provides:
//! - [`PaperPipeError`], the unified error type
//! - Domain types ([`PaperRecord`], [`PapersIndex`], [`LogEntry`], [`ProcessingStatus`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BatchConfig, ConversionConfig, DownloadConfig, LoggingConfig, StorageConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{PaperPipeError, Result};
pub use types::{
    ArtifactFiles, CONVERTER_VERSION, IndexRow, IndexStats, LogEntry, PaperRecord, PapersIndex,
    Processing, ProcessingLog, ProcessingStatus, Rating, Review, Stage, StageStatus,
    utc_timestamp, validate_paper_id,
};
