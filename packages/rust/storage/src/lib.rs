//! Durable on-disk state for the paper pipeline.
//!
//! The [`Storage`] struct owns one base directory laid out as:
//!
//! ```text
//! <base_dir>/
//! ├── papers/<paper_id>/{paper.pdf, paper.md, paper_full.json}
//! ├── index/{papers_index.json, processing_log.json, processing_summary.json}
//! └── input/
//! ```
//!
//! **Write rules:**
//! - every file is written to a sibling temp file and renamed into place
//! - the index and the log are each guarded by their own mutex, so concurrent
//!   read-modify-write cycles are serialized
//! - filesystem errors propagate; nothing here retries

mod artifacts;
mod index;
mod log;

use std::path::{Path, PathBuf};

use paperpipe_shared::{PaperPipeError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use artifacts::{
    ArtifactPresence, ArtifactStore, SavedBinary, SavedText, StorageUsage, sha256_checksum,
};
pub use index::IndexStore;
pub use log::LogStore;

const PAPERS_DIR: &str = "papers";
const INDEX_DIR: &str = "index";
const INPUT_DIR: &str = "input";
const INDEX_FILE: &str = "papers_index.json";
const LOG_FILE: &str = "processing_log.json";
const SUMMARY_FILE: &str = "processing_summary.json";

/// Handle on one pipeline base directory.
pub struct Storage {
    base_dir: PathBuf,
    artifacts: ArtifactStore,
    index: IndexStore,
    log: LogStore,
}

impl Storage {
    /// Open (creating if needed) the directory layout under `base_dir`.
    pub fn open(base_dir: &Path) -> Result<Self> {
        for dir in [PAPERS_DIR, INDEX_DIR, INPUT_DIR] {
            let path = base_dir.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| PaperPipeError::io(&path, e))?;
        }

        let index_dir = base_dir.join(INDEX_DIR);
        tracing::debug!(base_dir = %base_dir.display(), "storage opened");

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            artifacts: ArtifactStore::new(base_dir.join(PAPERS_DIR)),
            index: IndexStore::new(index_dir.join(INDEX_FILE)),
            log: LogStore::new(index_dir.join(LOG_FILE)),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    pub fn log(&self) -> &LogStore {
        &self.log
    }

    pub fn input_dir(&self) -> PathBuf {
        self.base_dir.join(INPUT_DIR)
    }

    /// Where the CLI writes the summary of the latest batch run.
    pub fn summary_path(&self) -> PathBuf {
        self.base_dir.join(INDEX_DIR).join(SUMMARY_FILE)
    }

    /// Rebuild the index by scanning the artifact store.
    pub fn rebuild_index(&self) -> Result<paperpipe_shared::PapersIndex> {
        self.index.rebuild_from_store(&self.artifacts)
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Write `bytes` to `path` via a temp file + rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PaperPipeError::Storage(format!("invalid file path: {}", path.display())))?;
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, bytes).map_err(|e| PaperPipeError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| PaperPipeError::io(path, e))?;
    Ok(())
}

/// Write a pretty-printed JSON file atomically.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    write_atomic(path, json.as_bytes())?;
    tracing::debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

/// Read a JSON file, returning `None` when it does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PaperPipeError::io(path, e)),
    };

    serde_json::from_str(&content).map(Some).map_err(|e| {
        PaperPipeError::Serialization(format!("invalid JSON in {}: {e}", path.display()))
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_dir;

    #[test]
    fn open_creates_layout() {
        let tmp = temp_dir("pp-storage");
        let storage = Storage::open(&tmp).expect("open storage");

        assert!(tmp.join("papers").is_dir());
        assert!(tmp.join("index").is_dir());
        assert!(storage.input_dir().is_dir());
        assert_eq!(storage.summary_path(), tmp.join("index/processing_summary.json"));

        // Reopening an existing layout is fine.
        Storage::open(&tmp).expect("reopen storage");

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn write_json_leaves_no_temp_files() {
        let tmp = temp_dir("pp-storage");
        let path = tmp.join("data.json");

        write_json(&path, &serde_json::json!({"a": 1})).expect("write json");
        let read: Option<serde_json::Value> = read_json(&path).expect("read json");
        assert_eq!(read.expect("present")["a"], 1);

        for entry in std::fs::read_dir(&tmp).expect("read dir") {
            let name = entry.expect("entry").file_name().to_string_lossy().to_string();
            assert!(!name.starts_with('.'), "temp file left behind: {name}");
        }

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn read_json_missing_is_none_and_garbage_is_error() {
        let tmp = temp_dir("pp-storage");
        let missing: Option<serde_json::Value> =
            read_json(&tmp.join("nope.json")).expect("missing ok");
        assert!(missing.is_none());

        std::fs::write(tmp.join("bad.json"), "{not json").expect("write");
        let bad: Result<Option<serde_json::Value>> = read_json(&tmp.join("bad.json"));
        assert!(matches!(bad, Err(PaperPipeError::Serialization(_))));

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
