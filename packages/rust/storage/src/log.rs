//! `index/processing_log.json`: append-only audit trail of stage attempts.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use paperpipe_shared::{LogEntry, ProcessingLog, Result};

use crate::{read_json, write_json};

pub struct LogStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LogStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries in append order; empty when no log exists yet.
    pub fn load_entries(&self) -> Result<Vec<LogEntry>> {
        let log: Option<ProcessingLog> = read_json(&self.path)?;
        Ok(log.unwrap_or_default().log_entries)
    }

    /// Load the whole log, append one entry, and write it back.
    pub fn append(&self, entry: LogEntry) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut log = ProcessingLog {
            log_entries: self.load_entries()?,
        };
        tracing::trace!(
            paper_id = %entry.paper_id,
            stage = %entry.stage,
            "appending log entry"
        );
        log.log_entries.push(entry);
        write_json(&self.path, &log)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use paperpipe_shared::{Stage, StageStatus};

    use super::*;
    use crate::test_support::temp_dir;

    #[test]
    fn append_preserves_order() {
        let tmp = temp_dir("pp-log");
        let log = LogStore::new(tmp.join("processing_log.json"));
        assert!(log.load_entries().expect("load").is_empty());

        log.append(
            LogEntry::new("p1", Stage::PdfDownload, StageStatus::Success, 0.5).with_size(1000),
        )
        .expect("append");
        log.append(
            LogEntry::new("p1", Stage::MarkdownConversion, StageStatus::Failed, 1.0)
                .with_error("empty output"),
        )
        .expect("append");

        let entries = log.load_entries().expect("load");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].stage, Stage::PdfDownload);
        assert_eq!(entries[0].file_size_bytes, Some(1000));
        assert_eq!(entries[1].status, StageStatus::Failed);
        assert_eq!(entries[1].error.as_deref(), Some("empty output"));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(log.path()).expect("read"))
                .expect("parse");
        assert_eq!(raw["log_entries"].as_array().map(Vec::len), Some(2));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        let tmp = temp_dir("pp-log");
        let log = Arc::new(LogStore::new(tmp.join("processing_log.json")));

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        let entry = LogEntry::new(
                            &format!("w{worker}"),
                            Stage::Processing,
                            StageStatus::Error,
                            0.0,
                        );
                        log.append(entry).expect("append");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }

        assert_eq!(log.load_entries().expect("load").len(), 40);
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
