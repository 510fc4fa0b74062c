//! Pipeline orchestration for paperpipe.
//!
//! This crate ties the artifact store, the PDF downloader, and the markdown
//! converter together:
//! - [`pipeline`]: the per-record state machine ([`Processor`])
//! - [`batch`]: run a record set, retry mode, run summaries
//! - [`records`]: load the normalized input records
//! - [`stats`]: aggregate statistics for reporting

pub mod adapters;
pub mod batch;
pub mod pipeline;
pub mod records;
pub mod stats;

pub use adapters::PdfTextConverter;
pub use batch::{
    BatchDriver, ProgressReporter, RunMode, RunResults, RunSummary, SilentProgress,
    select_retry_candidates,
};
pub use pipeline::{BinaryFetcher, ProcessOptions, ProcessResult, Processor, TextConverter};
pub use records::load_records;
pub use stats::{PipelineStats, StageStats, collect_stats, format_bytes};
