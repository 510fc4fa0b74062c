//! Per-record state machine: skip check → fetch → save → convert → save → finalize.
//!
//! Every outcome of [`Processor::process_one`] is returned as a
//! [`ProcessResult`]; stage failures are classified, logged, and never
//! propagated to the caller.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{Instrument, error, info, info_span, instrument, warn};

use paperpipe_markdown::add_metadata_header;
use paperpipe_shared::{
    CONVERTER_VERSION, ConversionConfig, LogEntry, PaperPipeError, PaperRecord, Processing,
    ProcessingStatus, Result, Stage, StageStatus, utc_timestamp, validate_paper_id,
};
use paperpipe_storage::Storage;

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

/// Fetches the binary artifact for a record.
///
/// Implementations run their own bounded retry and report exhaustion as
/// [`PaperPipeError::Acquisition`].
pub trait BinaryFetcher: Send + Sync {
    fn fetch(&self, url: &str, paper_id: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Turns a saved binary artifact into text.
///
/// Unreadable or unsupported input is reported as
/// [`PaperPipeError::Transformation`].
pub trait TextConverter: Send + Sync {
    fn convert(&self, path: &Path, paper_id: &str)
    -> impl Future<Output = Result<String>> + Send;
}

// ---------------------------------------------------------------------------
// Options & results
// ---------------------------------------------------------------------------

/// Behavior switches for [`Processor`].
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Return `skipped` when both artifacts already exist.
    pub skip_existing: bool,
    /// Upper bound for one conversion; `None` waits indefinitely.
    pub conversion_timeout: Option<Duration>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            skip_existing: true,
            conversion_timeout: None,
        }
    }
}

impl From<&ConversionConfig> for ProcessOptions {
    fn from(config: &ConversionConfig) -> Self {
        Self {
            skip_existing: config.skip_existing,
            conversion_timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Outcome of processing one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessResult {
    pub paper_id: String,
    pub status: ProcessingStatus,
    pub errors: Vec<String>,
    pub processing_time_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown_size_bytes: Option<u64>,
}

impl ProcessResult {
    fn new(paper_id: &str) -> Self {
        Self {
            paper_id: paper_id.to_string(),
            status: ProcessingStatus::Pending,
            errors: Vec::new(),
            processing_time_seconds: 0.0,
            pdf_size_bytes: None,
            markdown_size_bytes: None,
        }
    }

    /// A `failed` result for a record whose processing never returned.
    pub fn aborted(paper_id: &str, error: impl Into<String>) -> Self {
        let mut result = Self::new(paper_id);
        result.fail(ProcessingStatus::Failed, error);
        result
    }

    fn fail(&mut self, status: ProcessingStatus, error: impl Into<String>) {
        self.status = status;
        self.errors.push(error.into());
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Runs records through the two-stage pipeline against one [`Storage`].
pub struct Processor<F, C> {
    storage: Arc<Storage>,
    fetcher: F,
    converter: C,
    options: ProcessOptions,
}

impl<F: BinaryFetcher, C: TextConverter> Processor<F, C> {
    pub fn new(storage: Arc<Storage>, fetcher: F, converter: C, options: ProcessOptions) -> Self {
        Self {
            storage,
            fetcher,
            converter,
            options,
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Process one record to a terminal status.
    #[instrument(skip_all, fields(paper_id = %record.paper_id))]
    pub async fn process_one(&self, record: &PaperRecord) -> ProcessResult {
        let start = Instant::now();
        let mut result = ProcessResult::new(&record.paper_id);

        info!(
            title = record.title.as_deref().unwrap_or("Unknown"),
            "processing paper"
        );

        if let Err(e) = self.run_stages(record, &mut result).await {
            let message = format!("unexpected error processing {}: {e}", record.paper_id);
            error!(error = %e, "processing failed");
            result.fail(ProcessingStatus::Failed, message.as_str());

            let entry = LogEntry::new(
                &record.paper_id,
                Stage::Processing,
                StageStatus::Error,
                start.elapsed().as_secs_f64(),
            )
            .with_error(message);
            if let Err(log_err) = self.storage.log().append(entry) {
                error!(error = %log_err, "could not record failure in processing log");
            }
        }

        result.processing_time_seconds = start.elapsed().as_secs_f64();
        info!(
            status = %result.status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "paper finished"
        );
        result
    }

    /// Stages 1-7. An `Err` is an unclassified failure.
    async fn run_stages(&self, record: &PaperRecord, result: &mut ProcessResult) -> Result<()> {
        let paper_id = record.paper_id.as_str();

        // Validation comes first so an unsafe id never reaches the filesystem.
        if let Err(e) = validate_paper_id(paper_id) {
            warn!(error = %e, "rejecting record");
            result.fail(ProcessingStatus::Failed, e.to_string());
            return Ok(());
        }

        if self.options.skip_existing && self.storage.artifacts().exists(paper_id).is_complete() {
            info!("already processed, skipping");
            result.status = ProcessingStatus::Skipped;
            return Ok(());
        }

        let Some(url) = record.source_url() else {
            let e = PaperPipeError::validation(format!("no pdf_url for {paper_id}"));
            warn!(error = %e, "rejecting record");
            result.fail(ProcessingStatus::Failed, e.to_string());
            return Ok(());
        };

        // --- Acquisition ---
        let fetch_start = Instant::now();
        let fetched = self
            .fetcher
            .fetch(url, paper_id)
            .instrument(info_span!("pdf_download"))
            .await
            .and_then(|bytes| {
                if bytes.is_empty() {
                    Err(PaperPipeError::acquisition(paper_id, "empty response"))
                } else {
                    Ok(bytes)
                }
            });
        let fetch_secs = fetch_start.elapsed().as_secs_f64();

        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "pdf download failed");
                self.log_failure(
                    LogEntry::new(paper_id, Stage::PdfDownload, StageStatus::Failed, fetch_secs)
                        .with_error(message.as_str()),
                );
                result.fail(ProcessingStatus::FailedDownload, message);
                self.index_failure(record, result);
                return Ok(());
            }
        };

        let saved_pdf = self.storage.artifacts().save_binary(paper_id, &bytes)?;
        let pdf_downloaded_at = utc_timestamp();
        result.pdf_size_bytes = Some(saved_pdf.size_bytes);
        self.storage.log().append(
            LogEntry::new(paper_id, Stage::PdfDownload, StageStatus::Success, fetch_secs)
                .with_size(saved_pdf.size_bytes),
        )?;

        // --- Transformation ---
        let convert_start = Instant::now();
        let converted = self
            .convert_with_timeout(&saved_pdf.path, paper_id)
            .instrument(info_span!("markdown_conversion"))
            .await
            .and_then(|text| {
                if text.trim().is_empty() {
                    Err(PaperPipeError::transformation(paper_id, "empty conversion output"))
                } else {
                    Ok(text)
                }
            });
        let convert_secs = convert_start.elapsed().as_secs_f64();

        let text = match converted {
            Ok(text) => text,
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "markdown conversion failed");
                self.log_failure(
                    LogEntry::new(
                        paper_id,
                        Stage::MarkdownConversion,
                        StageStatus::Failed,
                        convert_secs,
                    )
                    .with_error(message.as_str()),
                );
                result.fail(ProcessingStatus::FailedConversion, message);
                self.index_failure(record, result);
                return Ok(());
            }
        };

        let markdown = add_metadata_header(&text, record);
        let saved_md = self.storage.artifacts().save_text(paper_id, &markdown)?;
        let markdown_generated_at = utc_timestamp();
        result.markdown_size_bytes = Some(saved_md.size_bytes);
        self.storage.log().append(
            LogEntry::new(
                paper_id,
                Stage::MarkdownConversion,
                StageStatus::Success,
                convert_secs,
            )
            .with_size(saved_md.size_bytes),
        )?;

        // --- Finalize ---
        let mut snapshot = record.clone();
        snapshot.processing = Some(Processing {
            status: ProcessingStatus::Completed,
            pdf_downloaded: true,
            pdf_downloaded_at: Some(pdf_downloaded_at),
            pdf_size_bytes: Some(saved_pdf.size_bytes),
            pdf_checksum: Some(saved_pdf.checksum),
            markdown_generated: true,
            markdown_generated_at: Some(markdown_generated_at),
            markdown_size_bytes: Some(saved_md.size_bytes),
            converter_version: Some(CONVERTER_VERSION.to_string()),
            conversion_duration_seconds: Some(convert_secs),
            errors: result.errors.clone(),
        });
        snapshot.files = Some(self.storage.artifacts().artifact_files(paper_id));

        self.storage.artifacts().save_snapshot(&snapshot)?;
        self.storage
            .index()
            .update_row(paper_id, &snapshot, ProcessingStatus::Completed)?;

        result.status = ProcessingStatus::Completed;
        Ok(())
    }

    async fn convert_with_timeout(&self, path: &Path, paper_id: &str) -> Result<String> {
        let conversion = self.converter.convert(path, paper_id);
        match self.options.conversion_timeout {
            Some(limit) => tokio::time::timeout(limit, conversion)
                .await
                .unwrap_or_else(|_| {
                    Err(PaperPipeError::transformation(
                        paper_id,
                        format!("timed out after {}s", limit.as_secs()),
                    ))
                }),
            None => conversion.await,
        }
    }

    /// Append a stage failure to the log. The outcome is already decided, so a
    /// log write error only warns.
    fn log_failure(&self, entry: LogEntry) {
        if let Err(e) = self.storage.log().append(entry) {
            warn!(error = %e, "could not record failure in processing log");
        }
    }

    /// Record a classified stage failure in the index so retry mode can find it.
    ///
    /// The input record's own `processing` block is stale at this point and is
    /// not forwarded.
    fn index_failure(&self, record: &PaperRecord, result: &mut ProcessResult) {
        let row_source = PaperRecord {
            processing: None,
            ..record.clone()
        };
        if let Err(e) = self
            .storage
            .index()
            .update_row(&record.paper_id, &row_source, result.status)
        {
            warn!(error = %e, "could not record failure in index");
            result.errors.push(format!("index update failed: {e}"));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use paperpipe_markdown::parse_header;
    use paperpipe_storage::sha256_checksum;

    use super::*;

    /// Scripted fetcher: returns `body` or an acquisition error.
    pub(crate) struct FakeFetcher {
        pub body: Option<Vec<u8>>,
        pub calls: AtomicUsize,
    }

    impl FakeFetcher {
        pub fn returning(body: &[u8]) -> Self {
            Self {
                body: Some(body.to_vec()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                body: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl BinaryFetcher for FakeFetcher {
        async fn fetch(&self, _url: &str, paper_id: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.body
                .clone()
                .ok_or_else(|| PaperPipeError::acquisition(paper_id, "HTTP 503"))
        }
    }

    /// Scripted converter: returns `text`, an error, or never finishes.
    pub(crate) enum FakeConverter {
        Text(String),
        Fail,
        Hang,
    }

    impl TextConverter for FakeConverter {
        async fn convert(&self, path: &Path, paper_id: &str) -> Result<String> {
            assert!(path.is_file(), "converter called before pdf was saved");
            match self {
                Self::Text(text) => Ok(text.clone()),
                Self::Fail => Err(PaperPipeError::transformation(paper_id, "unsupported")),
                Self::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
            }
        }
    }

    pub(crate) fn temp_storage() -> (PathBuf, Arc<Storage>) {
        let tmp = std::env::temp_dir().join(format!("pp-core-{}", uuid::Uuid::now_v7()));
        let storage = Storage::open(&tmp).expect("open storage");
        (tmp, Arc::new(storage))
    }

    fn processor(
        storage: &Arc<Storage>,
        fetcher: FakeFetcher,
        converter: FakeConverter,
    ) -> Processor<FakeFetcher, FakeConverter> {
        Processor::new(
            Arc::clone(storage),
            fetcher,
            converter,
            ProcessOptions::default(),
        )
    }

    fn stages(storage: &Storage) -> Vec<(Stage, StageStatus)> {
        storage
            .log()
            .load_entries()
            .expect("load log")
            .into_iter()
            .map(|e| (e.stage, e.status))
            .collect()
    }

    #[tokio::test]
    async fn completed_scenario() {
        let (tmp, storage) = temp_storage();
        let bytes = vec![7u8; 1000];
        let p = processor(
            &storage,
            FakeFetcher::returning(&bytes),
            FakeConverter::Text("body text".into()),
        );

        let record = PaperRecord::new("p1", "http://x/p1.pdf");
        let result = p.process_one(&record).await;

        assert_eq!(result.status, ProcessingStatus::Completed);
        assert!(result.errors.is_empty());
        assert_eq!(result.pdf_size_bytes, Some(1000));

        let markdown =
            std::fs::read_to_string(storage.artifacts().markdown_path("p1")).expect("read md");
        assert!(markdown.starts_with("---\n"));
        assert!(markdown.contains("\npaper_id: p1\n"));
        assert!(markdown.ends_with("---\n\nbody text"));
        assert_eq!(parse_header(&markdown)["paper_id"], "p1");

        let snapshot = storage
            .artifacts()
            .load_snapshot("p1")
            .expect("load")
            .expect("snapshot written");
        let processing = snapshot.processing.expect("processing block");
        assert_eq!(processing.status, ProcessingStatus::Completed);
        assert_eq!(processing.pdf_size_bytes, Some(1000));
        assert_eq!(processing.pdf_checksum, Some(sha256_checksum(&bytes)));
        assert!(processing.pdf_downloaded_at.is_some_and(|t| t.ends_with('Z')));
        assert!(processing.markdown_generated_at.is_some());
        assert!(snapshot.files.is_some());

        let index = storage.index().load().expect("load index");
        assert_eq!(index.status_of("p1"), Some(ProcessingStatus::Completed));
        assert_eq!(index.last_updated, processing.markdown_generated_at);
        assert_eq!(
            stages(&storage),
            vec![
                (Stage::PdfDownload, StageStatus::Success),
                (Stage::MarkdownConversion, StageStatus::Success),
            ]
        );

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn second_run_is_skipped_without_side_effects() {
        let (tmp, storage) = temp_storage();
        let p = processor(
            &storage,
            FakeFetcher::returning(b"%PDF"),
            FakeConverter::Text("body".into()),
        );
        let record = PaperRecord::new("p1", "http://x/p1.pdf");

        assert_eq!(p.process_one(&record).await.status, ProcessingStatus::Completed);
        let log_before = storage.log().load_entries().expect("log");
        let index_before = storage.index().load().expect("index");

        let second = p.process_one(&record).await;
        assert_eq!(second.status, ProcessingStatus::Skipped);
        assert_eq!(p.fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(storage.log().load_entries().expect("log"), log_before);
        assert_eq!(storage.index().load().expect("index"), index_before);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn skip_disabled_reprocesses() {
        let (tmp, storage) = temp_storage();
        let p = Processor::new(
            Arc::clone(&storage),
            FakeFetcher::returning(b"%PDF"),
            FakeConverter::Text("body".into()),
            ProcessOptions {
                skip_existing: false,
                conversion_timeout: None,
            },
        );
        let record = PaperRecord::new("p1", "http://x/p1.pdf");
        p.process_one(&record).await;
        let second = p.process_one(&record).await;
        assert_eq!(second.status, ProcessingStatus::Completed);
        assert_eq!(p.fetcher.calls.load(Ordering::SeqCst), 2);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn missing_source_url_fails_without_writes() {
        let (tmp, storage) = temp_storage();
        let p = processor(
            &storage,
            FakeFetcher::returning(b"%PDF"),
            FakeConverter::Text("body".into()),
        );

        let record = PaperRecord::new("p1", "");
        let result = p.process_one(&record).await;

        assert_eq!(result.status, ProcessingStatus::Failed);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(p.fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(!storage.artifacts().exists("p1").has_dir);
        assert!(stages(&storage).is_empty());
        assert!(storage.index().load().expect("index").papers.is_empty());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn unsafe_id_is_rejected() {
        let (tmp, storage) = temp_storage();
        let p = processor(
            &storage,
            FakeFetcher::returning(b"%PDF"),
            FakeConverter::Text("body".into()),
        );

        let result = p
            .process_one(&PaperRecord::new("../evil", "http://x/e.pdf"))
            .await;
        assert_eq!(result.status, ProcessingStatus::Failed);
        assert_eq!(p.fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(storage.artifacts().list_record_ids().expect("list").is_empty());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn failed_download_creates_no_text() {
        let (tmp, storage) = temp_storage();
        let p = processor(
            &storage,
            FakeFetcher::failing(),
            FakeConverter::Text("body".into()),
        );

        let result = p.process_one(&PaperRecord::new("p1", "http://x/p1.pdf")).await;

        assert_eq!(result.status, ProcessingStatus::FailedDownload);
        assert!(result.errors[0].contains("HTTP 503"));
        let presence = storage.artifacts().exists("p1");
        assert!(!presence.has_pdf && !presence.has_markdown && !presence.has_snapshot);
        assert_eq!(
            stages(&storage),
            vec![(Stage::PdfDownload, StageStatus::Failed)]
        );
        assert_eq!(
            storage.index().load().expect("index").status_of("p1"),
            Some(ProcessingStatus::FailedDownload)
        );

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn empty_download_is_a_failed_download() {
        let (tmp, storage) = temp_storage();
        let p = processor(
            &storage,
            FakeFetcher::returning(b""),
            FakeConverter::Text("body".into()),
        );

        let result = p.process_one(&PaperRecord::new("p1", "http://x/p1.pdf")).await;
        assert_eq!(result.status, ProcessingStatus::FailedDownload);
        assert!(!storage.artifacts().exists("p1").has_pdf);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn empty_conversion_keeps_binary() {
        let (tmp, storage) = temp_storage();
        let p = processor(
            &storage,
            FakeFetcher::returning(b"%PDF-1.4"),
            FakeConverter::Text("   \n".into()),
        );

        let result = p.process_one(&PaperRecord::new("p1", "http://x/p1.pdf")).await;

        assert_eq!(result.status, ProcessingStatus::FailedConversion);
        let presence = storage.artifacts().exists("p1");
        assert!(presence.has_pdf);
        assert!(!presence.has_markdown);
        assert!(!presence.has_snapshot);
        assert_eq!(
            stages(&storage),
            vec![
                (Stage::PdfDownload, StageStatus::Success),
                (Stage::MarkdownConversion, StageStatus::Failed),
            ]
        );
        assert_eq!(
            storage.index().load().expect("index").status_of("p1"),
            Some(ProcessingStatus::FailedConversion)
        );

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn converter_error_is_failed_conversion() {
        let (tmp, storage) = temp_storage();
        let p = processor(&storage, FakeFetcher::returning(b"%PDF"), FakeConverter::Fail);

        let result = p.process_one(&PaperRecord::new("p1", "http://x/p1.pdf")).await;
        assert_eq!(result.status, ProcessingStatus::FailedConversion);
        assert!(result.errors[0].contains("unsupported"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test(start_paused = true)]
    async fn conversion_timeout_is_failed_conversion() {
        let (tmp, storage) = temp_storage();
        let p = Processor::new(
            Arc::clone(&storage),
            FakeFetcher::returning(b"%PDF"),
            FakeConverter::Hang,
            ProcessOptions {
                skip_existing: true,
                conversion_timeout: Some(Duration::from_secs(5)),
            },
        );

        let result = p.process_one(&PaperRecord::new("p1", "http://x/p1.pdf")).await;
        assert_eq!(result.status, ProcessingStatus::FailedConversion);
        assert!(result.errors[0].contains("timed out"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn storage_failure_is_unclassified() {
        let (tmp, storage) = temp_storage();
        let p = processor(
            &storage,
            FakeFetcher::returning(b"%PDF"),
            FakeConverter::Text("body".into()),
        );

        // A file where the record directory should be makes every save fail.
        std::fs::write(storage.artifacts().paper_dir("p1"), b"in the way").expect("write");

        let result = p.process_one(&PaperRecord::new("p1", "http://x/p1.pdf")).await;
        assert_eq!(result.status, ProcessingStatus::Failed);
        assert!(result.errors[0].starts_with("unexpected error processing p1"));
        assert_eq!(
            stages(&storage),
            vec![(Stage::Processing, StageStatus::Error)]
        );

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn unwritable_log_keeps_failed_download_indexed() {
        let (tmp, storage) = temp_storage();
        let p = processor(&storage, FakeFetcher::failing(), FakeConverter::Fail);

        // A directory at the log path makes every append fail.
        std::fs::create_dir_all(storage.log().path()).expect("mkdir");

        let result = p.process_one(&PaperRecord::new("p1", "http://x/p1.pdf")).await;
        assert_eq!(result.status, ProcessingStatus::FailedDownload);
        assert_eq!(result.errors.len(), 1);

        let index = storage.index().load().expect("index");
        assert_eq!(
            index.status_of("p1"),
            Some(ProcessingStatus::FailedDownload)
        );

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn snapshot_keeps_passthrough_metadata() {
        let (tmp, storage) = temp_storage();
        let p = processor(
            &storage,
            FakeFetcher::returning(b"%PDF"),
            FakeConverter::Text("body".into()),
        );

        let record: PaperRecord = serde_json::from_value(serde_json::json!({
            "paper_id": "p1",
            "pdf_url": "http://x/p1.pdf",
            "title": "Kept",
            "meta_reviews": [{"decision": "Accept"}],
        }))
        .expect("parse record");
        p.process_one(&record).await;

        let snapshot = storage
            .artifacts()
            .load_snapshot("p1")
            .expect("load")
            .expect("present");
        assert_eq!(snapshot.title.as_deref(), Some("Kept"));
        assert!(snapshot.extra.contains_key("meta_reviews"));

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
