//! Loading the normalized record set produced upstream.

use std::collections::HashSet;
use std::path::Path;

use tracing::{info, warn};

use paperpipe_shared::{PaperPipeError, PaperRecord, Result};

/// Read a JSON array of records from `path`.
pub fn load_records(path: &Path) -> Result<Vec<PaperRecord>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PaperPipeError::config(format!(
                "input file not found: {}",
                path.display()
            )));
        }
        Err(e) => return Err(PaperPipeError::io(path, e)),
    };

    let records: Vec<PaperRecord> = serde_json::from_str(&content).map_err(|e| {
        PaperPipeError::validation(format!("invalid records in {}: {e}", path.display()))
    })?;

    let mut seen = HashSet::new();
    for record in &records {
        if !seen.insert(record.paper_id.as_str()) {
            warn!(paper_id = %record.paper_id, "duplicate paper_id in input");
        }
    }

    info!(count = records.len(), path = %path.display(), "loaded records");
    Ok(records)
}
