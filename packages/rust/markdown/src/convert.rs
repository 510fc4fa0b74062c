//! PDF-to-text conversion via `pdf-extract`.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use paperpipe_shared::{PaperPipeError, Result};

use crate::cleanup;

/// Extract and clean the text of the PDF at `path`.
///
/// Unreadable, unsupported, or text-less documents come back as
/// [`PaperPipeError::Transformation`].
#[instrument(skip_all, fields(paper_id = %paper_id, path = %path.display()))]
pub fn convert_pdf_file(path: &Path, paper_id: &str) -> Result<String> {
    let data = std::fs::read(path).map_err(|e| {
        PaperPipeError::transformation(paper_id, format!("cannot read {}: {e}", path.display()))
    })?;
    convert_pdf_bytes(&data, paper_id)
}

/// Extract and clean the text of an in-memory PDF.
pub fn convert_pdf_bytes(data: &[u8], paper_id: &str) -> Result<String> {
    let start = Instant::now();

    if data.is_empty() {
        return Err(PaperPipeError::transformation(paper_id, "empty PDF file"));
    }

    // The extractor panics on some malformed documents.
    let raw = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(data))
        .map_err(|_| {
            warn!(paper_id, "pdf extractor panicked");
            PaperPipeError::transformation(paper_id, "PDF text extraction panicked")
        })?
        .map_err(|e| {
            PaperPipeError::transformation(paper_id, format!("PDF text extraction failed: {e}"))
        })?;
    debug!(paper_id, raw_len = raw.len(), "text extracted");

    let text = cleanup::run_pipeline(&raw);
    if text.is_empty() {
        return Err(PaperPipeError::transformation(
            paper_id,
            "no extractable text in PDF",
        ));
    }

    info!(
        paper_id,
        chars = text.chars().count(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "converted PDF to markdown"
    );
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_rejected() {
        let err = convert_pdf_bytes(b"", "p1").unwrap_err();
        assert!(matches!(err, PaperPipeError::Transformation { .. }));
    }

    #[test]
    fn garbage_input_is_a_transformation_error() {
        let err = convert_pdf_bytes(b"not a pdf", "p1").unwrap_err();
        assert!(matches!(err, PaperPipeError::Transformation { .. }));
        assert!(err.to_string().contains("p1"));
    }

    #[test]
    fn missing_file_is_a_transformation_error() {
        let path = std::env::temp_dir()
            .join(format!("pp-convert-{}", uuid::Uuid::now_v7()))
            .join("paper.pdf");
        let err = convert_pdf_file(&path, "p1").unwrap_err();
        assert!(matches!(err, PaperPipeError::Transformation { .. }));
        assert!(err.to_string().contains("cannot read"));
    }
}
