//! Namespaced keys for the durable progress store
//!
//! One scalar or blob per key. The resume-critical fields live together
//! under [`UPDATE_STATE`] so a checkpoint commits as one atomic write.

use upd_types::DownloadSource;

/// Composite resume state: operation index, data offset/length, hash
/// contexts, signature blob. Written atomically as a whole.
pub const UPDATE_STATE: &str = "update-state";

pub const PAYLOAD_ATTEMPT_NUMBER: &str = "payload-attempt-number";
pub const FULL_PAYLOAD_ATTEMPT_NUMBER: &str = "full-payload-attempt-number";
pub const CURRENT_URL_INDEX: &str = "current-url-index";
pub const CURRENT_URL_FAILURE_COUNT: &str = "current-url-failure-count";
pub const CURRENT_BYTES_DOWNLOADED: &str = "current-bytes-downloaded";
pub const UPDATE_TIMESTAMP_START: &str = "update-timestamp-start";

pub const BACKOFF_EXPIRY_TIME: &str = "backoff-expiry-time";
pub const PEER_FIRST_ATTEMPT_TIMESTAMP: &str = "peer-first-attempt-timestamp";
pub const PEER_NUM_ATTEMPTS: &str = "peer-num-attempts";

pub const UPDATE_FIRST_SEEN_AT: &str = "update-first-seen-at";
pub const UPDATE_CHECK_COUNT: &str = "update-check-count";

/// Cumulative bytes fetched from one source kind, across payloads
#[must_use]
pub fn total_bytes_downloaded(source: DownloadSource) -> String {
    format!("total-bytes-downloaded-{}", source.key_fragment())
}

/// Keys preserved across a powerwash. Everything else is cleared, so
/// callers must never assume resume state survives one.
pub const POWERWASH_SAFE: &[&str] = &[
    BACKOFF_EXPIRY_TIME,
    PEER_FIRST_ATTEMPT_TIMESTAMP,
    PEER_NUM_ATTEMPTS,
    UPDATE_FIRST_SEEN_AT,
    UPDATE_CHECK_COUNT,
];

/// Contents of the powerwash marker artifact consumed by the reset
/// collaborator on next boot.
pub const POWERWASH_COMMAND: &str = "safe fast keepimg";
