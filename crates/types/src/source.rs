//! Download source kinds and candidate source descriptors

use serde::{Deserialize, Serialize};

/// A download source is any combination of protocol and server using which
/// we may download the payload.
///
/// Each kind carries a distinct bit value so the set of sources used for one
/// payload can be recorded as a single integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadSource {
    /// Primary HTTPS CDN. Bit value 0001.
    HttpsServer,
    /// Plain HTTP mirror. Bit value 0010.
    HttpServer,
    /// Another device on the same LAN. Bit value 0100.
    PeerShare,
}

impl DownloadSource {
    /// All kinds, in failover-accounting order.
    pub const ALL: [Self; 3] = [Self::HttpsServer, Self::HttpServer, Self::PeerShare];

    /// Bit value for set-style accounting.
    #[must_use]
    pub fn bit(self) -> u32 {
        match self {
            Self::HttpsServer => 0b0001,
            Self::HttpServer => 0b0010,
            Self::PeerShare => 0b0100,
        }
    }

    /// Stable key fragment used when persisting per-source counters.
    #[must_use]
    pub fn key_fragment(self) -> &'static str {
        match self {
            Self::HttpsServer => "https-server",
            Self::HttpServer => "http-server",
            Self::PeerShare => "peer-share",
        }
    }

    /// Whether this source is another device on the local network.
    #[must_use]
    pub fn is_peer(self) -> bool {
        matches!(self, Self::PeerShare)
    }
}

impl std::fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HttpsServer => write!(f, "HttpsServer"),
            Self::HttpServer => write!(f, "HttpServer"),
            Self::PeerShare => write!(f, "PeerShare"),
        }
    }
}

/// Set of source kinds used for one payload, recorded as combined bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSet(u32);

impl SourceSet {
    #[must_use]
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, source: DownloadSource) {
        self.0 |= source.bit();
    }

    #[must_use]
    pub fn contains(self, source: DownloadSource) -> bool {
        self.0 & source.bit() != 0
    }

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }
}

/// One candidate source for a payload, tried in `priority` order
/// (lower is tried first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSource {
    pub kind: DownloadSource,
    pub url: String,
    pub priority: usize,
}

impl PayloadSource {
    #[must_use]
    pub fn new(kind: DownloadSource, url: impl Into<String>, priority: usize) -> Self {
        Self {
            kind,
            url: url.into(),
            priority,
        }
    }
}
