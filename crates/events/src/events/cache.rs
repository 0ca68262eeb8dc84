//! Peer-cache events

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CacheEvent {
    /// Verified payload admitted for peer sharing
    Admitted { identity: String, size: u64 },

    /// Entry removed by the count/age eviction rule
    Evicted { identity: String, reason: String },

    /// Entry served to a peer
    Served { identity: String, size: u64 },
}
