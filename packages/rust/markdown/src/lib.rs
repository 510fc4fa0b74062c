//! PDF-to-markdown conversion and the metadata header format.
//!
//! Text is extracted with `pdf-extract`, then a series of cleanup passes
//! normalizes page breaks, control characters, and whitespace. The
//! [`header`] module renders and parses the `---` delimited metadata block
//! that precedes every converted document.

mod cleanup;
pub mod convert;
pub mod header;

pub use convert::{convert_pdf_bytes, convert_pdf_file};
pub use header::{add_metadata_header, build_header, parse_header};
