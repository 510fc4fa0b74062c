//! Core domain types: paper records, the papers index, and the processing log.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PaperPipeError, Result};

/// Version string stamped into `processing.converter_version`.
pub const CONVERTER_VERSION: &str = concat!("paperpipe-markdown/", env!("CARGO_PKG_VERSION"));

/// Current UTC time as ISO-8601 with a `Z` suffix.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Check that a record id can be used as a single path component.
pub fn validate_paper_id(paper_id: &str) -> Result<()> {
    if paper_id.trim().is_empty() {
        return Err(PaperPipeError::validation("paper_id cannot be empty"));
    }
    if paper_id == "." || paper_id == ".." {
        return Err(PaperPipeError::validation(format!(
            "paper_id '{paper_id}' is not a valid directory name"
        )));
    }
    if paper_id.contains(['/', '\\', '\0']) {
        return Err(PaperPipeError::validation(format!(
            "paper_id '{paper_id}' contains a path separator"
        )));
    }
    if paper_id.chars().any(char::is_control) {
        return Err(PaperPipeError::validation(format!(
            "paper_id {paper_id:?} contains control characters"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ProcessingStatus
// ---------------------------------------------------------------------------

/// Terminal (or inferred) processing status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Never attempted.
    Pending,
    /// Both artifacts existed at attempt start; nothing was done.
    Skipped,
    /// Both artifacts and the snapshot were written.
    Completed,
    /// The binary fetch gave up.
    FailedDownload,
    /// The binary was saved but conversion produced nothing.
    FailedConversion,
    /// Validation or unclassified failure.
    Failed,
    /// Binary present without text; only inferred by an index rebuild.
    PdfDownloaded,
    /// Nothing on disk to infer from; only produced by an index rebuild.
    Unknown,
}

impl ProcessingStatus {
    /// The serialized `snake_case` name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Skipped => "skipped",
            Self::Completed => "completed",
            Self::FailedDownload => "failed_download",
            Self::FailedConversion => "failed_conversion",
            Self::Failed => "failed",
            Self::PdfDownloaded => "pdf_downloaded",
            Self::Unknown => "unknown",
        }
    }

    /// Whether retry mode should pick up a record last seen in this status.
    pub fn is_retry_eligible(&self) -> bool {
        matches!(
            self,
            Self::FailedDownload | Self::FailedConversion | Self::Pending
        )
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PaperRecord
// ---------------------------------------------------------------------------

/// A review rating as delivered upstream: `7.5`, `"6"`, or `"8: Accept"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rating {
    Number(f64),
    Text(String),
}

impl Rating {
    /// Numeric value of the rating, if one can be parsed.
    pub fn numeric(&self) -> Option<f64> {
        let value = match self {
            Self::Number(n) => *n,
            Self::Text(s) => {
                let s = s.trim();
                let head = s.split_once(':').map_or(s, |(head, _)| head).trim();
                head.parse::<f64>().ok()?
            }
        };
        value.is_finite().then_some(value)
    }
}

/// A single peer review. Only `rating` is interpreted by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Review {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<serde_json::Value>,
    /// Remaining review fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The `processing` block written by the pipeline after a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Processing {
    pub status: ProcessingStatus,
    #[serde(default)]
    pub pdf_downloaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_downloaded_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_checksum: Option<String>,
    #[serde(default)]
    pub markdown_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown_generated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_duration_seconds: Option<f64>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Locations of the three per-record artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactFiles {
    pub pdf: String,
    pub markdown: String,
    pub full_json: String,
}

/// One paper plus its review metadata, as supplied upstream.
///
/// Unknown fields (comments, meta-reviews, ...) land in `extra` and are
/// written back unchanged in the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    /// Stable storage key.
    #[serde(alias = "id")]
    pub paper_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forum_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "abstract", default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub authors: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub keywords: Vec<String>,
    /// Location of the PDF.
    #[serde(alias = "source_url", default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forum_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    /// Passthrough metadata the pipeline does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
    /// Written only by the pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing: Option<Processing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<ArtifactFiles>,
}

impl PaperRecord {
    /// Minimal record with an id and a source URL.
    pub fn new(paper_id: impl Into<String>, pdf_url: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            pdf_url: Some(pdf_url.into()),
            ..Self::default()
        }
    }

    /// The PDF URL, if present and non-blank.
    pub fn source_url(&self) -> Option<&str> {
        self.pdf_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Mean of all parseable review ratings, `None` when none parse.
    pub fn average_rating(&self) -> Option<f64> {
        let ratings: Vec<f64> = self
            .reviews
            .iter()
            .filter_map(|r| r.rating.as_ref().and_then(Rating::numeric))
            .collect();

        if ratings.is_empty() {
            None
        } else {
            Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
        }
    }

    /// Last recorded status, `Pending` if never processed.
    pub fn status(&self) -> ProcessingStatus {
        self.processing
            .as_ref()
            .map_or(ProcessingStatus::Pending, |p| p.status)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    List(Vec<String>),
    Single(String),
}

/// Accept `["a", "b"]`, `"a, b"`, or `null` for list-valued metadata.
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Option::<StringOrList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(StringOrList::List(items)) => items,
        Some(StringOrList::Single(s)) => s.split(',').map(String::from).collect(),
    };

    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

// ---------------------------------------------------------------------------
// Papers index
// ---------------------------------------------------------------------------

/// One row of `papers_index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub pdf_url: String,
    pub status: ProcessingStatus,
    #[serde(default)]
    pub has_pdf: bool,
    #[serde(default)]
    pub has_markdown: bool,
    #[serde(default)]
    pub decision: String,
}

impl IndexRow {
    /// Build a row from a record snapshot and the status being recorded.
    pub fn from_record(record: &PaperRecord, status: ProcessingStatus) -> Self {
        Self {
            title: record.title.clone().unwrap_or_default(),
            authors: record.authors.clone(),
            pdf_url: record.pdf_url.clone().unwrap_or_default(),
            status,
            has_pdf: matches!(
                status,
                ProcessingStatus::Completed | ProcessingStatus::PdfDownloaded
            ),
            has_markdown: status == ProcessingStatus::Completed,
            decision: record.decision.clone().unwrap_or_default(),
        }
    }
}

/// Aggregate counters, always recomputed from the rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total: usize,
    pub completed: usize,
    /// Rows with status `pdf_downloaded` **or** `completed`.
    pub pdf_downloaded: usize,
    pub markdown_generated: usize,
    pub failed_download: usize,
    pub failed_conversion: usize,
    pub pending: usize,
}

impl IndexStats {
    /// Count every status over `rows`.
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a IndexRow>) -> Self {
        let mut counts: BTreeMap<ProcessingStatus, usize> = BTreeMap::new();
        let mut total = 0;
        for row in rows {
            total += 1;
            *counts.entry(row.status).or_default() += 1;
        }
        let count = |status: ProcessingStatus| counts.get(&status).copied().unwrap_or(0);

        Self {
            total,
            completed: count(ProcessingStatus::Completed),
            pdf_downloaded: count(ProcessingStatus::PdfDownloaded)
                + count(ProcessingStatus::Completed),
            markdown_generated: count(ProcessingStatus::Completed),
            failed_download: count(ProcessingStatus::FailedDownload),
            failed_conversion: count(ProcessingStatus::FailedConversion),
            pending: count(ProcessingStatus::Pending),
        }
    }
}

/// The `papers_index.json` structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PapersIndex {
    #[serde(default)]
    pub total_papers: usize,
    /// Newest `markdown_generated_at` observed.
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub papers: BTreeMap<String, IndexRow>,
    #[serde(default)]
    pub stats: IndexStats,
}

impl PapersIndex {
    /// Insert or replace a row, then recompute every counter.
    pub fn upsert(&mut self, paper_id: &str, row: IndexRow) {
        self.papers.insert(paper_id.to_string(), row);
        self.recompute_stats();
    }

    /// Recompute `stats` and `total_papers` from a full scan of the rows.
    pub fn recompute_stats(&mut self) {
        self.stats = IndexStats::from_rows(self.papers.values());
        self.total_papers = self.stats.total;
    }

    /// Last known status of a record, if it has a row.
    pub fn status_of(&self, paper_id: &str) -> Option<ProcessingStatus> {
        self.papers.get(paper_id).map(|row| row.status)
    }
}

// ---------------------------------------------------------------------------
// Processing log
// ---------------------------------------------------------------------------

/// Pipeline stage named in a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PdfDownload,
    MarkdownConversion,
    /// Unclassified failure outside the two delegated stages.
    Processing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PdfDownload => "pdf_download",
            Self::MarkdownConversion => "markdown_conversion",
            Self::Processing => "processing",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failed,
    Error,
}

/// One stage attempt in `processing_log.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub paper_id: String,
    pub stage: Stage,
    pub status: StageStatus,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEntry {
    /// New entry stamped with the current time; duration is rounded to 2 decimals.
    pub fn new(paper_id: &str, stage: Stage, status: StageStatus, duration_seconds: f64) -> Self {
        Self {
            timestamp: utc_timestamp(),
            paper_id: paper_id.to_string(),
            stage,
            status,
            duration_seconds: (duration_seconds * 100.0).round() / 100.0,
            file_size_bytes: None,
            error: None,
        }
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.file_size_bytes = Some(size_bytes);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Root structure of `processing_log.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingLog {
    #[serde(default)]
    pub log_entries: Vec<LogEntry>,
}
