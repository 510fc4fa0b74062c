//! Per-record artifact directories under `papers/`.

use std::path::{Path, PathBuf};

use paperpipe_shared::{ArtifactFiles, PaperPipeError, PaperRecord, Result, validate_paper_id};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{read_json, write_atomic, write_json};

const PDF_FILE: &str = "paper.pdf";
const MARKDOWN_FILE: &str = "paper.md";
const SNAPSHOT_FILE: &str = "paper_full.json";

/// What is on disk for one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArtifactPresence {
    pub has_dir: bool,
    pub has_pdf: bool,
    pub has_markdown: bool,
    pub has_snapshot: bool,
}

impl ArtifactPresence {
    /// Both the binary and the text artifact exist.
    pub fn is_complete(&self) -> bool {
        self.has_pdf && self.has_markdown
    }
}

/// Result of writing a binary artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedBinary {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// `sha256:<hex>` over the exact bytes written.
    pub checksum: String,
}

/// Result of writing a text artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedText {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Disk usage across all record directories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub record_dirs: usize,
    pub pdf_bytes: u64,
    pub markdown_bytes: u64,
}

/// Hex SHA-256 prefixed with the algorithm name.
pub fn sha256_checksum(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

/// Maps a record id to `papers/<id>/` and its three files.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paper_dir(&self, paper_id: &str) -> PathBuf {
        self.root.join(paper_id)
    }

    pub fn pdf_path(&self, paper_id: &str) -> PathBuf {
        self.paper_dir(paper_id).join(PDF_FILE)
    }

    pub fn markdown_path(&self, paper_id: &str) -> PathBuf {
        self.paper_dir(paper_id).join(MARKDOWN_FILE)
    }

    pub fn snapshot_path(&self, paper_id: &str) -> PathBuf {
        self.paper_dir(paper_id).join(SNAPSHOT_FILE)
    }

    /// The `files` block recorded in a snapshot.
    pub fn artifact_files(&self, paper_id: &str) -> ArtifactFiles {
        ArtifactFiles {
            pdf: self.pdf_path(paper_id).display().to_string(),
            markdown: self.markdown_path(paper_id).display().to_string(),
            full_json: self.snapshot_path(paper_id).display().to_string(),
        }
    }

    /// Probe the filesystem. Never fails; a missing directory means all false.
    pub fn exists(&self, paper_id: &str) -> ArtifactPresence {
        let dir = self.paper_dir(paper_id);
        if !dir.is_dir() {
            return ArtifactPresence::default();
        }
        ArtifactPresence {
            has_dir: true,
            has_pdf: dir.join(PDF_FILE).is_file(),
            has_markdown: dir.join(MARKDOWN_FILE).is_file(),
            has_snapshot: dir.join(SNAPSHOT_FILE).is_file(),
        }
    }

    fn ensure_dir(&self, paper_id: &str) -> Result<PathBuf> {
        validate_paper_id(paper_id)?;
        let dir = self.paper_dir(paper_id);
        std::fs::create_dir_all(&dir).map_err(|e| PaperPipeError::io(&dir, e))?;
        Ok(dir)
    }

    /// Write the binary artifact, overwriting any previous one.
    pub fn save_binary(&self, paper_id: &str, bytes: &[u8]) -> Result<SavedBinary> {
        let path = self.ensure_dir(paper_id)?.join(PDF_FILE);
        write_atomic(&path, bytes)?;

        let saved = SavedBinary {
            size_bytes: bytes.len() as u64,
            checksum: sha256_checksum(bytes),
            path,
        };
        tracing::debug!(paper_id, size_bytes = saved.size_bytes, "saved pdf");
        Ok(saved)
    }

    /// Write the text artifact; the size is the UTF-8 byte length.
    pub fn save_text(&self, paper_id: &str, content: &str) -> Result<SavedText> {
        let path = self.ensure_dir(paper_id)?.join(MARKDOWN_FILE);
        write_atomic(&path, content.as_bytes())?;

        tracing::debug!(paper_id, size_bytes = content.len(), "saved markdown");
        Ok(SavedText {
            path,
            size_bytes: content.len() as u64,
        })
    }

    /// Serialize the full record (including `processing`) to the snapshot file.
    pub fn save_snapshot(&self, record: &PaperRecord) -> Result<PathBuf> {
        let path = self.ensure_dir(&record.paper_id)?.join(SNAPSHOT_FILE);
        write_json(&path, record)?;
        Ok(path)
    }

    pub fn load_snapshot(&self, paper_id: &str) -> Result<Option<PaperRecord>> {
        validate_paper_id(paper_id)?;
        read_json(&self.snapshot_path(paper_id))
    }

    /// Sorted names of every record directory.
    pub fn list_record_ids(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PaperPipeError::io(&self.root, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PaperPipeError::io(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn usage(&self) -> Result<StorageUsage> {
        let mut usage = StorageUsage::default();
        for paper_id in self.list_record_ids()? {
            usage.record_dirs += 1;
            usage.pdf_bytes += file_size(&self.pdf_path(&paper_id));
            usage.markdown_bytes += file_size(&self.markdown_path(&paper_id));
        }
        Ok(usage)
    }
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_dir;

    fn store() -> (PathBuf, ArtifactStore) {
        let tmp = temp_dir("pp-artifacts");
        let store = ArtifactStore::new(tmp.join("papers"));
        (tmp, store)
    }

    #[test]
    fn exists_without_directory_is_all_false() {
        let (tmp, store) = store();
        assert_eq!(store.exists("missing"), ArtifactPresence::default());
        assert!(!store.exists("missing").is_complete());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn checksum_matches_bytes_on_disk() {
        let (tmp, store) = store();
        let bytes: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        let saved = store.save_binary("p1", &bytes).expect("save binary");
        assert_eq!(saved.size_bytes, 1000);
        assert!(saved.checksum.starts_with("sha256:"));
        assert_eq!(saved.checksum.len(), "sha256:".len() + 64);

        let on_disk = std::fs::read(store.pdf_path("p1")).expect("read back");
        assert_eq!(sha256_checksum(&on_disk), saved.checksum);

        let presence = store.exists("p1");
        assert!(presence.has_dir && presence.has_pdf);
        assert!(!presence.has_markdown && !presence.is_complete());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn empty_input_has_stable_checksum() {
        assert_eq!(
            sha256_checksum(&[]),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn binary_is_overwritten() {
        let (tmp, store) = store();
        store.save_binary("p1", b"first version").expect("first");
        let second = store.save_binary("p1", b"v2").expect("second");
        assert_eq!(second.size_bytes, 2);
        assert_eq!(std::fs::read(store.pdf_path("p1")).expect("read"), b"v2");
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn text_size_counts_bytes_not_chars() {
        let (tmp, store) = store();
        let saved = store.save_text("p1", "héllo").expect("save text");
        assert_eq!(saved.size_bytes, 6);
        assert!(store.exists("p1").has_markdown);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn snapshot_roundtrip() {
        let (tmp, store) = store();
        assert!(store.load_snapshot("p1").expect("load").is_none());

        let mut record = PaperRecord::new("p1", "http://x/p1.pdf");
        record.title = Some("Title".into());
        record.files = Some(store.artifact_files("p1"));
        store.save_snapshot(&record).expect("save snapshot");

        let loaded = store.load_snapshot("p1").expect("load").expect("present");
        assert_eq!(loaded, record);
        assert!(store.exists("p1").has_snapshot);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn unsafe_ids_are_rejected() {
        let (tmp, store) = store();
        let err = store.save_binary("../escape", b"x").unwrap_err();
        assert!(matches!(err, PaperPipeError::Validation { .. }));
        assert!(store.save_text("", "x").is_err());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn list_and_usage() {
        let (tmp, store) = store();
        assert!(store.list_record_ids().expect("list").is_empty());

        store.save_binary("b", &[0u8; 10]).expect("save");
        store.save_text("b", "12345").expect("save");
        store.save_binary("a", &[0u8; 3]).expect("save");

        assert_eq!(store.list_record_ids().expect("list"), vec!["a", "b"]);
        let usage = store.usage().expect("usage");
        assert_eq!(usage.record_dirs, 2);
        assert_eq!(usage.pdf_bytes, 13);
        assert_eq!(usage.markdown_bytes, 5);

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
