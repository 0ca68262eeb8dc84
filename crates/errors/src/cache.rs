//! Peer-cache error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("no cached payload for {identity}")]
    NotFound { identity: String },

    #[error("cached payload for {identity} was evicted")]
    Evicted { identity: String },

    #[error("cache I/O failed at {path}: {message}")]
    IoFailed { path: String, message: String },
}
