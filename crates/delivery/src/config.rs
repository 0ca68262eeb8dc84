//! Configuration structures for payload delivery
//!
//! The per-source-kind fetch parameters encode very different performance
//! assumptions: remote HTTP(S) transfers tolerate terrible connectivity and
//! make as much forward progress as possible, while peer transfers are on
//! the same LAN and fail fast.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use upd_errors::Error;
use upd_hash::Hash;
use upd_types::{DownloadSource, PayloadType};

/// Connect timeout for HTTP(S) servers; high because some devices have very
/// poor connectivity and HTTPS needs a multi-roundtrip setup
const CONNECT_TIMEOUT_SECS: u64 = 30;
/// Connect timeout for peers on the same LAN
const PEER_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Minimum sustained speed for HTTP(S); set low to keep limping along
const LOW_SPEED_LIMIT_BPS: u64 = 1;
/// Minimum sustained speed for peers; high since bandwidth is LAN-local
const PEER_LOW_SPEED_LIMIT_BPS: u64 = 25_000;

/// Window over which the speed floor is evaluated
const LOW_SPEED_WINDOW_SECS: u64 = 90;
/// Longer window for non-production builds where payload generation is slow
const DEV_MODE_LOW_SPEED_WINDOW_SECS: u64 = 180;
/// Short window for peers; fail fast
const PEER_LOW_SPEED_WINDOW_SECS: u64 = 60;

/// Redirects past this count fail the attempt
const MAX_REDIRECTS: u32 = 10;

/// Consecutive-failure ceiling per HTTP(S) source before failover
const MAX_RETRY_COUNT: u32 = 20;
/// Lower ceiling while first-boot setup is incomplete
const MAX_RETRY_COUNT_OOBE_INCOMPLETE: u32 = 3;
/// Lower ceiling for peers
const PEER_MAX_RETRY_COUNT: u32 = 5;

/// What the negotiation collaborator promised about the payload
#[derive(Debug, Clone)]
pub struct ExpectedPayload {
    pub hash: Hash,
    /// Total transferred size in bytes; the expected hash covers exactly
    /// these bytes
    pub size: u64,
    pub signature: Option<Vec<u8>>,
    pub payload_type: PayloadType,
    /// Whether the transferred bytes are a compressed blob to expand after
    /// verification, before handing off to the applier
    pub compressed: bool,
}

/// Per-source-kind fetch parameters
#[derive(Debug, Clone)]
pub struct FetchParams {
    pub connect_timeout: Duration,
    pub low_speed_limit_bps: u64,
    pub low_speed_window: Duration,
    pub max_redirects: u32,
    pub max_retry_count: u32,
}

impl FetchParams {
    /// Parameter row for a source kind under the given delivery config
    #[must_use]
    pub fn for_source(kind: DownloadSource, config: &DeliveryConfig) -> Self {
        if kind.is_peer() {
            Self {
                connect_timeout: Duration::from_secs(PEER_CONNECT_TIMEOUT_SECS),
                low_speed_limit_bps: PEER_LOW_SPEED_LIMIT_BPS,
                low_speed_window: Duration::from_secs(PEER_LOW_SPEED_WINDOW_SECS),
                max_redirects: MAX_REDIRECTS,
                max_retry_count: PEER_MAX_RETRY_COUNT,
            }
        } else {
            Self {
                connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
                low_speed_limit_bps: LOW_SPEED_LIMIT_BPS,
                low_speed_window: Duration::from_secs(if config.dev_mode {
                    DEV_MODE_LOW_SPEED_WINDOW_SECS
                } else {
                    LOW_SPEED_WINDOW_SECS
                }),
                max_redirects: MAX_REDIRECTS,
                max_retry_count: if config.oobe_complete {
                    MAX_RETRY_COUNT
                } else {
                    MAX_RETRY_COUNT_OOBE_INCOMPLETE
                },
            }
        }
    }
}

/// Same-source retry pacing (distinct from the whole-payload backoff gate)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial delay before the second try on one source
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Delay ceiling
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor per consecutive failure
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_jitter_factor() -> f64 {
    0.1
}

/// Delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Non-production build; loosens the low-speed window
    #[serde(default)]
    pub dev_mode: bool,
    /// First-boot setup finished; when false the HTTP(S) retry ceiling drops
    #[serde(default = "default_true")]
    pub oobe_complete: bool,
    /// Commit a progress checkpoint at least every this many verified bytes
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_bytes: u64,
    /// Offer verified payloads to LAN peers via the cache manager
    #[serde(default = "default_true")]
    pub share_verified_payloads: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            oobe_complete: true,
            checkpoint_interval_bytes: default_checkpoint_interval(),
            share_verified_payloads: true,
            retry: RetryConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_checkpoint_interval() -> u64 {
    256 * 1024
}

impl DeliveryConfig {
    /// Load from a TOML file; missing fields take their defaults
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;
        toml::from_str(&raw).map_err(|e| Error::internal(format!("invalid config: {e}")))
    }
}

/// Result of a completed, verified delivery
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub hash: Hash,
    pub size: u64,
    pub sources_used: upd_types::SourceSet,
    pub elapsed: Duration,
}
