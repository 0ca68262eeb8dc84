//! Integrity error types
//!
//! Fatal for the attempt: the partial hash state is unusable and the payload
//! restarts from offset zero, possibly on a different source.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum IntegrityError {
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("chunk at offset {offset} arrived out of order (verifier at {verified})")]
    ReorderedChunk { offset: u64, verified: u64 },

    #[error("verifier already finalized")]
    AlreadyFinalized,
}
