//! Batch driver: runs a record set through the [`Processor`] and summarizes the run.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tracing::{error, info, instrument};
use uuid::Uuid;

use paperpipe_shared::{PaperRecord, PapersIndex, ProcessingStatus, Result, utc_timestamp};
use paperpipe_storage::{Storage, write_json};

use crate::pipeline::{BinaryFetcher, ProcessResult, Processor, TextConverter};

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// Which records a run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Every input record.
    Process,
    /// Only records whose indexed status is retry-eligible.
    RetryFailed,
}

/// Paper ids grouped by terminal status, in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    pub completed: Vec<String>,
    pub failed_download: Vec<String>,
    pub failed_conversion: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

impl RunResults {
    fn push(&mut self, result: &ProcessResult) {
        let bucket = match result.status {
            ProcessingStatus::Completed => &mut self.completed,
            ProcessingStatus::FailedDownload => &mut self.failed_download,
            ProcessingStatus::FailedConversion => &mut self.failed_conversion,
            ProcessingStatus::Skipped => &mut self.skipped,
            _ => &mut self.failed,
        };
        bucket.push(result.paper_id.clone());
    }
}

/// Outcome of one batch run, persisted as `index/processing_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: RunMode,
    pub started_at: String,
    pub total_records: usize,
    pub elapsed_seconds: f64,
    pub results: RunResults,
}

impl RunSummary {
    /// Number of records that ended in `status`.
    pub fn count(&self, status: ProcessingStatus) -> usize {
        match status {
            ProcessingStatus::Completed => self.results.completed.len(),
            ProcessingStatus::FailedDownload => self.results.failed_download.len(),
            ProcessingStatus::FailedConversion => self.results.failed_conversion.len(),
            ProcessingStatus::Failed => self.results.failed.len(),
            ProcessingStatus::Skipped => self.results.skipped.len(),
            _ => 0,
        }
    }

    /// Write the summary next to the index.
    pub fn save(&self, storage: &Storage) -> Result<()> {
        write_json(&storage.summary_path(), self)
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for a batch run.
pub trait ProgressReporter: Send + Sync {
    /// Called once with the number of records that will be processed.
    fn start(&self, total: usize);
    /// Called as each record finishes; `done` counts finished records.
    fn record_done(&self, result: &ProcessResult, done: usize, total: usize);
    /// Called when the run completes.
    fn finish(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn start(&self, _total: usize) {}
    fn record_done(&self, _result: &ProcessResult, _done: usize, _total: usize) {}
    fn finish(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Retry selection
// ---------------------------------------------------------------------------

/// Keep the records whose indexed status is `failed_download`,
/// `failed_conversion`, or `pending`. Records without a row are dropped.
pub fn select_retry_candidates(records: Vec<PaperRecord>, index: &PapersIndex) -> Vec<PaperRecord> {
    records
        .into_iter()
        .filter(|record| {
            index
                .status_of(&record.paper_id)
                .is_some_and(|status| status.is_retry_eligible())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Applies a [`Processor`] to a record set, one record or a bounded pool at a time.
pub struct BatchDriver<F, C> {
    processor: Arc<Processor<F, C>>,
    concurrency: usize,
}

impl<F, C> BatchDriver<F, C>
where
    F: BinaryFetcher + 'static,
    C: TextConverter + 'static,
{
    pub fn new(processor: Arc<Processor<F, C>>, concurrency: usize) -> Self {
        Self {
            processor,
            concurrency: concurrency.max(1),
        }
    }

    /// Process `records` and summarize the run. Individual record failures
    /// never abort the batch; only reading the index in retry mode can fail.
    #[instrument(skip_all, fields(mode = ?mode, records = records.len()))]
    pub async fn run(
        &self,
        records: Vec<PaperRecord>,
        mode: RunMode,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let started_at = utc_timestamp();

        let records = match mode {
            RunMode::Process => records,
            RunMode::RetryFailed => {
                let index = self.processor.storage().index().load()?;
                let input = records.len();
                let selected = select_retry_candidates(records, &index);
                info!(input, selected = selected.len(), "selected records for retry");
                selected
            }
        };

        let total = records.len();
        info!(total, concurrency = self.concurrency, "starting batch");
        progress.start(total);

        let outcomes = if self.concurrency == 1 {
            self.run_sequential(&records, progress).await
        } else {
            self.run_concurrent(&records, progress).await
        };

        let mut results = RunResults::default();
        for outcome in &outcomes {
            results.push(outcome);
        }

        let summary = RunSummary {
            run_id: Uuid::now_v7().to_string(),
            mode,
            started_at,
            total_records: total,
            elapsed_seconds: (start.elapsed().as_secs_f64() * 100.0).round() / 100.0,
            results,
        };

        info!(
            completed = summary.count(ProcessingStatus::Completed),
            skipped = summary.count(ProcessingStatus::Skipped),
            failed_download = summary.count(ProcessingStatus::FailedDownload),
            failed_conversion = summary.count(ProcessingStatus::FailedConversion),
            failed = summary.count(ProcessingStatus::Failed),
            elapsed_secs = summary.elapsed_seconds,
            "batch complete"
        );
        progress.finish(&summary);
        Ok(summary)
    }

    async fn run_sequential(
        &self,
        records: &[PaperRecord],
        progress: &dyn ProgressReporter,
    ) -> Vec<ProcessResult> {
        let total = records.len();
        let mut outcomes = Vec::with_capacity(total);
        for record in records {
            let result = self.processor.process_one(record).await;
            progress.record_done(&result, outcomes.len() + 1, total);
            outcomes.push(result);
        }
        outcomes
    }

    /// Spawn one task per record, at most `concurrency` running at once.
    /// Results come back in completion order and are returned in input order.
    async fn run_concurrent(
        &self,
        records: &[PaperRecord],
        progress: &dyn ProgressReporter,
    ) -> Vec<ProcessResult> {
        let total = records.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, ProcessResult)>();

        for (position, record) in records.iter().cloned().enumerate() {
            let processor = Arc::clone(&self.processor);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let result = processor.process_one(&record).await;
                let _ = tx.send((position, result));
            });
        }
        drop(tx);

        let mut slots: Vec<Option<ProcessResult>> = vec![None; total];
        let mut done = 0;
        while let Some((position, result)) = rx.recv().await {
            done += 1;
            progress.record_done(&result, done, total);
            slots[position] = Some(result);
        }

        // A slot is only empty if its task panicked.
        slots
            .into_iter()
            .zip(records)
            .map(|(slot, record)| {
                slot.unwrap_or_else(|| {
                    error!(paper_id = %record.paper_id, "worker task did not report a result");
                    ProcessResult::aborted(&record.paper_id, "worker task aborted")
                })
            })
            .collect()
    }
}
