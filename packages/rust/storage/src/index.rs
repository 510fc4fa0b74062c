//! `index/papers_index.json`: one row per record plus derived counters.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use paperpipe_shared::{IndexRow, PaperRecord, PapersIndex, ProcessingStatus, Result};

use crate::artifacts::{ArtifactPresence, ArtifactStore};
use crate::{read_json, write_json};

/// Handle on the index file. Read-modify-write cycles hold `lock`.
pub struct IndexStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl IndexStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // The guarded value is `()`, so a poisoned lock carries no broken state.
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load the index; a missing file yields the zero-valued bootstrap index.
    pub fn load(&self) -> Result<PapersIndex> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    /// Overwrite the whole file.
    pub fn save(&self, index: &PapersIndex) -> Result<()> {
        let _guard = self.guard();
        write_json(&self.path, index)
    }

    /// Upsert one row and recompute every counter from the full row set.
    pub fn update_row(
        &self,
        paper_id: &str,
        record: &PaperRecord,
        status: ProcessingStatus,
    ) -> Result<()> {
        let _guard = self.guard();

        let mut index = self.load()?;
        index.upsert(paper_id, IndexRow::from_record(record, status));
        if let Some(generated_at) = record
            .processing
            .as_ref()
            .and_then(|p| p.markdown_generated_at.clone())
        {
            if index.last_updated.as_deref() < Some(generated_at.as_str()) {
                index.last_updated = Some(generated_at);
            }
        }
        write_json(&self.path, &index)?;

        tracing::debug!(
            paper_id,
            status = %status,
            total = index.stats.total,
            "index row updated"
        );
        Ok(())
    }

    /// Rebuild the index from whatever is in the artifact store.
    ///
    /// A snapshot's `processing.status` is trusted when present. Otherwise the
    /// status is inferred from file presence, which can never yield a
    /// `failed_*` status.
    pub fn rebuild_from_store(&self, store: &ArtifactStore) -> Result<PapersIndex> {
        let _guard = self.guard();

        let mut index = PapersIndex::default();
        for paper_id in store.list_record_ids()? {
            let presence = store.exists(&paper_id);
            let snapshot = match store.load_snapshot(&paper_id) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(
                        paper_id = %paper_id,
                        error = %e,
                        "unreadable snapshot, inferring from files"
                    );
                    None
                }
            };

            let status = snapshot
                .as_ref()
                .and_then(|record| record.processing.as_ref())
                .map_or_else(|| infer_status(presence), |p| p.status);

            let mut row = match &snapshot {
                Some(record) => IndexRow::from_record(record, status),
                None => {
                    let placeholder = PaperRecord {
                        title: Some(paper_id.clone()),
                        ..PaperRecord::default()
                    };
                    IndexRow::from_record(&placeholder, status)
                }
            };
            row.has_pdf = presence.has_pdf;
            row.has_markdown = presence.has_markdown;

            let generated_at = snapshot
                .as_ref()
                .and_then(|record| record.processing.as_ref())
                .and_then(|p| p.markdown_generated_at.clone());
            if generated_at > index.last_updated {
                index.last_updated = generated_at;
            }

            index.papers.insert(paper_id, row);
        }
        index.recompute_stats();
        write_json(&self.path, &index)?;

        tracing::info!(
            total = index.stats.total,
            completed = index.stats.completed,
            "index rebuilt from artifact store"
        );
        Ok(index)
    }
}

fn infer_status(presence: ArtifactPresence) -> ProcessingStatus {
    if presence.has_markdown {
        ProcessingStatus::Completed
    } else if presence.has_pdf {
        ProcessingStatus::PdfDownloaded
    } else {
        ProcessingStatus::Unknown
    }
}
