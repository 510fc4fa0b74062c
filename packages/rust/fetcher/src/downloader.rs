//! HTTP PDF downloader with bounded retry and linear backoff.

use std::time::Instant;

use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

use paperpipe_shared::{DownloadConfig, PaperPipeError, Result};

/// Why a single attempt failed.
#[derive(Debug)]
enum AttemptError {
    /// Transport error or non-2xx status; worth another attempt.
    Retryable(String),
    /// The server answered but there is nothing to keep.
    Terminal(String),
}

/// Downloads PDFs over HTTP(S).
pub struct PdfDownloader {
    config: DownloadConfig,
    client: Client,
}

impl PdfDownloader {
    /// Build a downloader with the configured user agent and per-attempt timeout.
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(config.timeout())
            .build()
            .map_err(|e| PaperPipeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Fetch `url`, making up to `1 + max_retries` attempts.
    ///
    /// Every failure comes back as [`PaperPipeError::Acquisition`].
    #[instrument(skip_all, fields(paper_id = %paper_id, url = %url))]
    pub async fn download(&self, url: &str, paper_id: &str) -> Result<Vec<u8>> {
        let parsed = Url::parse(url.trim())
            .map_err(|e| PaperPipeError::acquisition(paper_id, format!("invalid URL {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PaperPipeError::acquisition(
                paper_id,
                format!("unsupported URL scheme: {}", parsed.scheme()),
            ));
        }

        let attempts = self.config.max_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let start = Instant::now();
            match self.fetch_once(&parsed).await {
                Ok(bytes) => {
                    info!(
                        attempt,
                        size_bytes = bytes.len(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "pdf downloaded"
                    );
                    return Ok(bytes);
                }
                Err(AttemptError::Terminal(reason)) => {
                    warn!(attempt, %reason, "download failed, not retrying");
                    return Err(PaperPipeError::acquisition(paper_id, reason));
                }
                Err(AttemptError::Retryable(reason)) => {
                    warn!(attempt, attempts, %reason, "download attempt failed");
                    last_error = reason;

                    if attempt < attempts {
                        let delay = self.config.backoff(attempt);
                        debug!(delay_secs = delay.as_secs(), "retrying after backoff");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(PaperPipeError::acquisition(
            paper_id,
            format!("gave up after {attempts} attempts: {last_error}"),
        ))
    }

    async fn fetch_once(&self, url: &Url) -> std::result::Result<Vec<u8>, AttemptError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Retryable(format!("HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.is_empty() && !content_type.to_ascii_lowercase().contains("pdf") {
            warn!(content_type, "response does not look like a PDF");
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AttemptError::Retryable(format!("body read failed: {e}")))?;

        if bytes.is_empty() {
            return Err(AttemptError::Terminal("empty response body".into()));
        }
        Ok(bytes.to_vec())
    }
}
