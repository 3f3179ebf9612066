//! HTTP downloads for release archives and signatures.
//!
//! Archives are buffered in memory: the same bytes are checksummed,
//! signature-verified, and extracted, with nothing written to disk until
//! verification has passed.
//!
//! Transient failures (connection errors, 5xx) are retried with exponential
//! backoff; client errors such as 404 fail immediately so the installer can
//! move on to the next candidate URL.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures_util::StreamExt;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::index::USER_AGENT;

/// Maximum number of attempts per URL.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay between retries in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Failure of a single download attempt.
#[derive(Debug)]
struct AttemptError {
    error: anyhow::Error,
    retryable: bool,
}

impl AttemptError {
    fn transient(error: anyhow::Error) -> Self {
        Self {
            error,
            retryable: true,
        }
    }

    fn permanent(error: anyhow::Error) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

/// HTTP client for archive and signature downloads.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    timeout: Duration,
    max_attempts: u32,
    base_delay: Duration,
}

impl Downloader {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            timeout,
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::from_millis(BASE_RETRY_DELAY_MS),
        })
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay = base_delay;
        self
    }

    /// Downloads `url` into memory.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error once retries are exhausted, or the
    /// first non-retryable error.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = calculate_retry_delay(self.base_delay, attempt);
                tracing::debug!(
                    url,
                    attempt = attempt + 1,
                    max = self.max_attempts,
                    "retrying download"
                );
                tokio::time::sleep(delay).await;
            }

            match self.fetch_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(AttemptError { error, retryable }) => {
                    if !retryable {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("Download failed after {} attempts", self.max_attempts)
        }))
    }

    /// Downloads `url` as UTF-8 text.
    ///
    /// # Errors
    ///
    /// As [`fetch_bytes`](Self::fetch_bytes), plus invalid UTF-8.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let bytes = self.fetch_bytes(url).await?;
        String::from_utf8(bytes).with_context(|| format!("{url} is not valid UTF-8"))
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, AttemptError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Failed to connect to {url}"))
            .map_err(AttemptError::transient)?;

        let status = response.status();
        if !status.is_success() {
            let error = anyhow::anyhow!("HTTP error {status}: {url}");
            return Err(if status.is_server_error() {
                AttemptError::transient(error)
            } else {
                AttemptError::permanent(error)
            });
        }

        let mut buffer = response
            .content_length()
            .and_then(|len| usize::try_from(len).ok())
            .map_or_else(Vec::new, Vec::with_capacity);

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .with_context(|| format!("Failed to read chunk from {url}"))
                .map_err(AttemptError::transient)?;
            buffer.extend_from_slice(&chunk);
        }

        Ok(buffer)
    }
}

/// Calculates the retry delay with exponential backoff and jitter.
///
/// The delay doubles with each attempt with +/- 25% jitter.
fn calculate_retry_delay(base: Duration, attempt: u32) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let delay = base_ms.saturating_mul(2u64.saturating_pow(attempt - 1));
    let jitter_range = delay / 4;
    let jitter = rand::rng().random_range(0..=jitter_range * 2);
    Duration::from_millis(delay - jitter_range + jitter)
}

/// Computes the SHA-256 of `bytes` as lowercase hex.
#[must_use]
pub fn compute_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Verifies that `bytes` hash to `expected`.
///
/// # Errors
///
/// Returns an error describing both digests on mismatch.
pub fn verify_checksum(bytes: &[u8], expected: &str) -> Result<()> {
    let computed = compute_sha256(bytes);
    if computed != expected.trim().to_lowercase() {
        bail!("checksum mismatch: expected {expected}, got {computed}");
    }
    Ok(())
}
