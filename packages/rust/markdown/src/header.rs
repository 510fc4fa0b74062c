//! Metadata header prepended to converted markdown.
//!
//! ```text
//! ---
//! title: "Attention Is All You Need"
//! authors: ["Ashish Vaswani","Noam Shazeer"]
//! paper_id: abc123
//! ...
//! num_reviews: 4
//! average_rating: 7.3
//! ---
//!
//! <body>
//! ```
//!
//! Free text is JSON-quoted and lists use JSON array syntax, so
//! [`parse_header`] recovers exactly what [`build_header`] wrote.

use serde_json::{Map, Number, Value};

use paperpipe_shared::PaperRecord;

const DELIMITER: &str = "---";
const UNKNOWN_TITLE: &str = "Unknown Title";

/// Render the header block for `record`, including the closing delimiter.
pub fn build_header(record: &PaperRecord) -> String {
    let title = record.title.as_deref().unwrap_or(UNKNOWN_TITLE);

    let mut lines = vec![
        DELIMITER.to_string(),
        field("title", &quoted(title)),
        field("authors", &list(&record.authors)),
        field("paper_id", &bare(&record.paper_id)),
        field("forum_id", &bare(record.forum_id.as_deref().unwrap_or_default())),
        field(
            "abstract",
            &quoted(record.abstract_text.as_deref().unwrap_or_default()),
        ),
        field("keywords", &list(&record.keywords)),
        field("pdf_url", &bare(record.pdf_url.as_deref().unwrap_or_default())),
        field(
            "forum_url",
            &bare(record.forum_url.as_deref().unwrap_or_default()),
        ),
        field(
            "decision",
            &quoted(record.decision.as_deref().unwrap_or_default()),
        ),
    ];

    if !record.reviews.is_empty() {
        lines.push(field("num_reviews", &record.reviews.len().to_string()));
        if let Some(avg) = record.average_rating() {
            lines.push(field("average_rating", &format!("{avg:.1}")));
        }
    }

    lines.push(DELIMITER.to_string());
    lines.join("\n")
}

/// Prepend the header and a blank line to `body`.
pub fn add_metadata_header(body: &str, record: &PaperRecord) -> String {
    format!("{}\n\n{body}", build_header(record))
}

/// Parse the header block at the top of `markdown` into a key/value map.
///
/// Returns an empty map when the text does not start with a header.
pub fn parse_header(markdown: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    let mut lines = markdown.lines();

    if lines.next() != Some(DELIMITER) {
        return metadata;
    }

    for line in lines {
        if line == DELIMITER {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            metadata.insert(key.trim().to_string(), parse_value(value.trim()));
        }
    }
    metadata
}

fn field(key: &str, value: &str) -> String {
    if value.is_empty() {
        format!("{key}:")
    } else {
        format!("{key}: {value}")
    }
}

fn quoted(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

/// Ids and URLs stay unquoted unless the raw text would not read back as-is.
fn bare(text: &str) -> String {
    let ambiguous = text.chars().any(char::is_control)
        || text.starts_with(['"', '['])
        || text.trim() != text;
    if ambiguous { quoted(text) } else { text.to_string() }
}

fn list(items: &[String]) -> String {
    Value::from(items.to_vec()).to_string()
}

fn parse_value(raw: &str) -> Value {
    if raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2 {
        return serde_json::from_str::<String>(raw)
            .map(Value::String)
            .unwrap_or_else(|_| Value::String(raw[1..raw.len() - 1].to_string()));
    }
    if raw.starts_with('[') && raw.ends_with(']') {
        return serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.into()));
    }
    parse_number(raw).unwrap_or_else(|| Value::String(raw.to_string()))
}

fn parse_number(raw: &str) -> Option<Value> {
    if raw.contains('.') {
        let value = raw.parse::<f64>().ok()?;
        Number::from_f64(value).map(Value::Number)
    } else {
        raw.parse::<i64>().ok().map(Value::from)
    }
}
