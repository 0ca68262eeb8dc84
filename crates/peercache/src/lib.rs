#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Bounded local cache of shareable payload files
//!
//! Verified payloads are stored content-addressed so other devices on the
//! LAN can fetch them instead of going to the CDN. The cache keeps at most
//! [`MAX_FILES_TO_KEEP`] files and nothing older than [`MAX_FILE_AGE_DAYS`]
//! days, except entries mid-transfer to a peer, which are eviction-exempt
//! until the transfer guard drops.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs;
use upd_errors::{CacheError, Error};
use upd_events::{AppEvent, CacheEvent, EventEmitter, EventSender};
use upd_hash::Hash;

/// Maximum number of payload files to keep
pub const MAX_FILES_TO_KEEP: usize = 3;

/// Maximum age of a kept payload file
pub const MAX_FILE_AGE_DAYS: i64 = 5;

const FILE_SUFFIX: &str = ".payload";

/// One cached, shareable payload file
#[derive(Debug, Clone)]
pub struct PeerFileRecord {
    pub identity: Hash,
    pub path: PathBuf,
    pub created: DateTime<Utc>,
    pub size: u64,
}

type ActiveTransfers = Arc<Mutex<HashMap<Hash, usize>>>;

/// Guard marking an in-progress transfer to a peer; the entry stays
/// eviction-exempt until this drops
#[derive(Debug)]
pub struct PeerTransfer {
    identity: Hash,
    active: ActiveTransfers,
}

impl Drop for PeerTransfer {
    fn drop(&mut self) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = active.get_mut(&self.identity) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.identity);
            }
        }
    }
}

/// Bounded content-addressed cache manager
#[derive(Debug, Clone)]
pub struct PeerCacheManager {
    root: PathBuf,
    active: ActiveTransfers,
    tx: Option<EventSender>,
}

impl EventEmitter for PeerCacheManager {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

impl PeerCacheManager {
    /// Open (creating if needed) a cache rooted at `root`
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>, tx: Option<EventSender>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            Error::from(CacheError::IoFailed {
                path: root.display().to_string(),
                message: e.to_string(),
            })
        })?;
        Ok(Self {
            root,
            active: Arc::new(Mutex::new(HashMap::new())),
            tx,
        })
    }

    fn file_path(&self, identity: &Hash) -> PathBuf {
        self.root.join(format!("{}{FILE_SUFFIX}", identity.to_hex()))
    }

    fn is_transferring(&self, identity: &Hash) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(identity)
    }

    /// Whether a payload is currently cached
    pub async fn has(&self, identity: &Hash) -> bool {
        fs::try_exists(self.file_path(identity)).await.unwrap_or(false)
    }

    /// Store a verified payload for sharing. Admitting the same identity
    /// twice is a no-op. Runs an eviction pass afterwards.
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub async fn admit(&self, identity: &Hash, bytes: &[u8], now: DateTime<Utc>) -> Result<(), Error> {
        let path = self.file_path(identity);
        if !self.has(identity).await {
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, bytes)
                .await
                .map_err(|e| Error::io_with_path(&e, &tmp))?;
            fs::rename(&tmp, &path)
                .await
                .map_err(|e| Error::io_with_path(&e, &path))?;
            self.emit(AppEvent::Cache(CacheEvent::Admitted {
                identity: identity.to_hex(),
                size: bytes.len() as u64,
            }));
        }
        self.evict(now).await
    }

    /// Serve a cached payload to a peer. The returned guard keeps the entry
    /// eviction-exempt while the transfer is in progress.
    ///
    /// # Errors
    /// Fails if the identity is absent or was evicted.
    pub async fn serve(&self, identity: &Hash) -> Result<(Vec<u8>, PeerTransfer), Error> {
        let path = self.file_path(identity);
        let bytes = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::from(CacheError::NotFound {
                    identity: identity.to_hex(),
                })
            } else {
                Error::from(CacheError::IoFailed {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
        })?;

        *self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(*identity)
            .or_insert(0) += 1;

        self.emit(AppEvent::Cache(CacheEvent::Served {
            identity: identity.to_hex(),
            size: bytes.len() as u64,
        }));

        Ok((
            bytes,
            PeerTransfer {
                identity: *identity,
                active: Arc::clone(&self.active),
            },
        ))
    }

    /// List cached payload records, oldest first
    ///
    /// # Errors
    /// Returns an error if the cache directory cannot be scanned.
    pub async fn list(&self) -> Result<Vec<PeerFileRecord>, Error> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.root).await.map_err(|e| {
            Error::from(CacheError::IoFailed {
                path: self.root.display().to_string(),
                message: e.to_string(),
            })
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(Error::from)? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(hex) = name.strip_suffix(FILE_SUFFIX) else {
                continue;
            };
            let Ok(identity) = Hash::from_hex(hex) else {
                continue;
            };
            let metadata = entry.metadata().await.map_err(Error::from)?;
            let created = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            records.push(PeerFileRecord {
                identity,
                path,
                created,
                size: metadata.len(),
            });
        }
        records.sort_by_key(|r| r.created);
        Ok(records)
    }

    /// Remove entries beyond the count ceiling (oldest first) and entries
    /// past the age limit, skipping in-progress transfers
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub async fn evict(&self, now: DateTime<Utc>) -> Result<(), Error> {
        let records = self.list().await?;
        let max_age = Duration::days(MAX_FILE_AGE_DAYS);

        let mut kept = 0usize;
        let total = records.len();
        // records are oldest-first; an entry survives if it is young enough
        // and enough newer entries have already been dropped
        for (index, record) in records.iter().enumerate() {
            if self.is_transferring(&record.identity) {
                kept += 1;
                continue;
            }
            let too_old = now - record.created > max_age;
            let newer_remaining = total - index - 1;
            let over_count = kept + newer_remaining + 1 > MAX_FILES_TO_KEEP;
            if too_old || over_count {
                self.remove_record(record, if too_old { "age" } else { "count" })
                    .await?;
            } else {
                kept += 1;
            }
        }
        Ok(())
    }

    /// Explicitly remove an entry; absent entries are a no-op
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub async fn remove(&self, identity: &Hash) -> Result<(), Error> {
        let path = self.file_path(identity);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io_with_path(&e, &path)),
        }
    }

    async fn remove_record(&self, record: &PeerFileRecord, reason: &str) -> Result<(), Error> {
        match fs::remove_file(&record.path).await {
            Ok(()) => {
                self.emit(AppEvent::Cache(CacheEvent::Evicted {
                    identity: record.identity.to_hex(),
                    reason: reason.to_string(),
                }));
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io_with_path(&e, &record.path)),
        }
    }
}
