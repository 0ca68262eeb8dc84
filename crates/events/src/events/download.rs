//! Download-specific events

use serde::{Deserialize, Serialize};
use std::time::Duration;
use upd_types::DownloadSource;

/// Download events emitted by the orchestrator and fetchers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DownloadEvent {
    /// Attempt started against a selected source
    Started {
        url: String,
        source: DownloadSource,
        total_size: u64,
        resume_offset: u64,
    },

    /// Progress update
    Progress {
        url: String,
        bytes_downloaded: u64,
        total_bytes: u64,
    },

    /// Resuming from a persisted checkpoint
    Resuming {
        url: String,
        resume_offset: u64,
        attempt: u32,
    },

    /// Retrying the same source after a transient failure
    Retrying {
        url: String,
        source: DownloadSource,
        failure_count: u32,
        max_failures: u32,
    },

    /// Failing over from one source to the next candidate
    SourceFailover {
        from: DownloadSource,
        to: DownloadSource,
    },

    /// All sources are gated by backoff; nearest expiry attached
    PolicyBlocked { wait: Duration },

    /// Attempt failed
    Failed {
        url: String,
        source: DownloadSource,
        error: String,
        bytes_downloaded: u64,
        recoverable: bool,
    },

    /// Payload fully downloaded and verified
    Completed {
        url: String,
        size: u64,
        hash: String,
        sources_used: u32,
        elapsed: Duration,
    },
}
