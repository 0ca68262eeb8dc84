//! Domain-driven event definitions

mod cache;
mod download;
mod general;
mod verify;

pub use cache::CacheEvent;
pub use download::DownloadEvent;
pub use general::GeneralEvent;
pub use verify::VerifyEvent;

use serde::{Deserialize, Serialize};

/// Top-level event envelope, grouped by functional domain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event")]
pub enum AppEvent {
    Download(DownloadEvent),
    Verify(VerifyEvent),
    Cache(CacheEvent),
    General(GeneralEvent),
}

impl AppEvent {
    /// Mirror the event into `tracing` at an appropriate level.
    pub fn trace(&self) {
        match self {
            Self::General(GeneralEvent::Error { message }) => {
                tracing::error!(target: "upd", "{message}");
            }
            Self::General(GeneralEvent::Warning { message }) => {
                tracing::warn!(target: "upd", "{message}");
            }
            Self::Download(DownloadEvent::Failed { url, error, .. }) => {
                tracing::warn!(target: "upd", url, error, "download attempt failed");
            }
            Self::Download(DownloadEvent::Completed { url, size, .. }) => {
                tracing::info!(target: "upd", url, size, "download completed");
            }
            other => {
                tracing::debug!(target: "upd", event = ?other);
            }
        }
    }
}
