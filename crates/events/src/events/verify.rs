//! Verification and checkpoint events

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VerifyEvent {
    /// Progress checkpoint committed to the durable store
    CheckpointCommitted { offset: u64 },

    /// Persisted progress was structurally invalid and was discarded
    ProgressDiscarded { reason: String },

    /// Final digest matched the expected hash
    DigestVerified { hash: String },

    /// Final digest did not match; attempt is fatal
    DigestMismatch { expected: String, actual: String },
}
