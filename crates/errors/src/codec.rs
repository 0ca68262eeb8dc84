//! Codec error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("malformed compressed stream: {0}")]
    Malformed(String),

    #[error("compression failed: {0}")]
    CompressFailed(String),

    #[error("decompressed data is not valid UTF-8")]
    NotUtf8,
}
