//! Progress-store error types
//!
//! A structurally invalid persisted record is not surfaced through these: it
//! reads back as absent and forces a clean restart. These variants cover the
//! store itself failing.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PersistError {
    #[error("invalid key name: {0}")]
    InvalidKey(String),

    #[error("failed to read {key}: {message}")]
    ReadFailed { key: String, message: String },

    #[error("failed to write {key}: {message}")]
    WriteFailed { key: String, message: String },

    #[error("value for {key} is not valid {expected}")]
    TypeMismatch { key: String, expected: String },

    #[error("store directory unusable: {path}: {message}")]
    StoreUnusable { path: String, message: String },
}
