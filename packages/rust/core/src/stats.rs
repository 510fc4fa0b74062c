//! Aggregate statistics over the index, the processing log, and disk usage.

use std::collections::BTreeMap;

use serde::Serialize;

use paperpipe_shared::{IndexStats, LogEntry, Result, Stage, StageStatus};
use paperpipe_storage::{Storage, StorageUsage};

/// Attempt counters for one pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageStats {
    pub attempts: usize,
    pub successes: usize,
    /// Entries with status `failed` or `error`.
    pub failures: usize,
    pub total_duration_seconds: f64,
}

impl StageStats {
    /// Percentage of attempts that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64 * 100.0
        }
    }

    pub fn average_duration_seconds(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.total_duration_seconds / self.attempts as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub index: IndexStats,
    pub last_updated: Option<String>,
    pub total_log_entries: usize,
    pub stages: BTreeMap<Stage, StageStats>,
    pub usage: StorageUsage,
}

impl PipelineStats {
    /// Completed records as a percentage of all indexed records.
    pub fn completion_rate(&self) -> f64 {
        if self.index.total == 0 {
            0.0
        } else {
            self.index.completed as f64 / self.index.total as f64 * 100.0
        }
    }
}

/// Gather statistics for the pipeline rooted at `storage`.
pub fn collect_stats(storage: &Storage) -> Result<PipelineStats> {
    let index = storage.index().load()?;
    let entries = storage.log().load_entries()?;

    Ok(PipelineStats {
        index: index.stats,
        last_updated: index.last_updated,
        total_log_entries: entries.len(),
        stages: stage_stats(&entries),
        usage: storage.artifacts().usage()?,
    })
}

fn stage_stats(entries: &[LogEntry]) -> BTreeMap<Stage, StageStats> {
    let mut stages: BTreeMap<Stage, StageStats> = BTreeMap::new();
    for entry in entries {
        let stats = stages.entry(entry.stage).or_default();
        stats.attempts += 1;
        stats.total_duration_seconds += entry.duration_seconds;
        match entry.status {
            StageStatus::Success => stats.successes += 1,
            StageStatus::Failed | StageStatus::Error => stats.failures += 1,
        }
    }
    stages
}

/// Human-readable size with one decimal: `512.0 B`, `1.5 KB`, `3.2 GB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let mut size = bytes as f64;
    for unit in &UNITS[..UNITS.len() - 1] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} {}", UNITS[UNITS.len() - 1])
}
