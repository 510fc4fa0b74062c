//! Binary acquisition for the paper pipeline.
//!
//! [`PdfDownloader`] fetches a PDF over HTTP with a bounded number of
//! attempts and a linear backoff between them. Ordinary network failures are
//! returned as [`paperpipe_shared::PaperPipeError::Acquisition`], never panics.

pub mod downloader;

pub use downloader::PdfDownloader;
