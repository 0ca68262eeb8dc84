//! Network-related error types
//!
//! These are the transient failures of a fetch attempt: retried against the
//! same source while under its retry ceiling, then failed over.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("connection timeout to {url}")]
    Timeout { url: String },

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("sustained throughput below floor on {url}: {bytes_per_sec} B/s")]
    LowSpeed { url: String, bytes_per_sec: u64 },

    #[error("redirect limit exceeded after {limit} redirects")]
    TooManyRedirects { limit: u32 },

    #[error("server ignored range request at offset {offset}")]
    RangeNotSupported { offset: u64 },
}

impl NetworkError {
    /// All network errors are transient except malformed URLs, which no
    /// amount of retrying will fix.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidUrl(_))
    }
}
