#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Error types for the upd payload delivery core
//!
//! This crate provides fine-grained error types organized by domain.
//! All error types implement Clone where possible for easier handling.

use thiserror::Error;

pub mod cache;
pub mod codec;
pub mod integrity;
pub mod network;
pub mod persist;

// Re-export all error types at the root
pub use cache::CacheError;
pub use codec::CodecError;
pub use integrity::IntegrityError;
pub use network::NetworkError;
pub use persist::PersistError;

/// Generic error type for cross-crate boundaries
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("persist error: {0}")]
    Persist(#[from] PersistError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
        path: Option<std::path::PathBuf>,
    },
}

impl Error {
    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an Io error with an associated path
    pub fn io_with_path(err: &std::io::Error, path: impl Into<std::path::PathBuf>) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    /// Whether retrying the same source may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(e) if e.is_transient())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_carries_path() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::io_with_path(&io, "/var/cache/upd/payload");
        match err {
            Error::Io { kind, path, .. } => {
                assert_eq!(kind, std::io::ErrorKind::NotFound);
                assert_eq!(path.unwrap().to_str().unwrap(), "/var/cache/upd/payload");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn transient_classification() {
        let stall: Error = NetworkError::LowSpeed {
            url: "http://server/payload".into(),
            bytes_per_sec: 0,
        }
        .into();
        assert!(stall.is_transient());

        let mismatch: Error = IntegrityError::DigestMismatch {
            expected: "aa".into(),
            actual: "bb".into(),
        }
        .into();
        assert!(!mismatch.is_transient());
    }
}
