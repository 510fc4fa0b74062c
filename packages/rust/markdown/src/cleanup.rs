//! Cleanup pipeline for text extracted from PDFs.
//!
//! Each pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;

/// Form feed, emitted by the extractor between pages.
const PAGE_BREAK: char = '\u{000C}';

/// Run the full cleanup pipeline on raw extracted text.
pub(crate) fn run_pipeline(text: &str) -> String {
    let mut result = normalize_line_endings(text);

    result = split_pages(&result);
    result = strip_control_chars(&result);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);

    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: Line endings
// ---------------------------------------------------------------------------

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Page breaks
// ---------------------------------------------------------------------------

/// Replace form feeds with a blank line between pages and drop empty pages.
fn split_pages(text: &str) -> String {
    text.split(PAGE_BREAK)
        .map(str::trim)
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ---------------------------------------------------------------------------
// Pass 3: Control characters
// ---------------------------------------------------------------------------

/// Drop control characters other than newline and tab.
fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

// ---------------------------------------------------------------------------
// Pass 4: Trailing whitespace
// ---------------------------------------------------------------------------

fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 5: Blank lines
// ---------------------------------------------------------------------------

/// Collapse any run of blank lines into a single blank line.
fn clean_blank_lines(text: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(text, "\n\n").to_string()
}
