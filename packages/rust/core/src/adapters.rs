//! Production collaborators: the HTTP downloader and the PDF converter.

use std::path::Path;

use paperpipe_fetcher::PdfDownloader;
use paperpipe_shared::{PaperPipeError, Result};

use crate::pipeline::{BinaryFetcher, TextConverter};

impl BinaryFetcher for PdfDownloader {
    async fn fetch(&self, url: &str, paper_id: &str) -> Result<Vec<u8>> {
        self.download(url, paper_id).await
    }
}

/// Converts PDFs with `paperpipe-markdown` on tokio's blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextConverter;

impl TextConverter for PdfTextConverter {
    async fn convert(&self, path: &Path, paper_id: &str) -> Result<String> {
        let path = path.to_path_buf();
        let id = paper_id.to_string();

        tokio::task::spawn_blocking(move || paperpipe_markdown::convert_pdf_file(&path, &id))
            .await
            .map_err(|e| {
                PaperPipeError::transformation(paper_id, format!("converter task failed: {e}"))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn converter_reports_unreadable_pdf() {
        let dir = std::env::temp_dir().join(format!("pp-adapter-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("paper.pdf");
        std::fs::write(&path, b"definitely not a pdf").expect("write");

        let err = PdfTextConverter.convert(&path, "p1").await.unwrap_err();
        assert!(matches!(err, PaperPipeError::Transformation { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
