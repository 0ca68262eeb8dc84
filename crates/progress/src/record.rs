//! Persisted download/verification progress
//!
//! The resume-critical fields (operation index, data offset/length, hash
//! contexts, signature blob) form one document committed in a single atomic
//! key write, so a concurrent reader never sees fields from two different
//! checkpoints. Attempt counters and byte totals are plain per-key scalars.

use crate::keys;
use crate::store::ProgressStore;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use upd_errors::Error;
use upd_hash::HashState;
use upd_types::DownloadSource;

/// The atomically-committed resume state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeState {
    pub next_operation: u64,
    pub next_data_offset: u64,
    pub next_data_length: u64,
    /// Running digest over all payload bytes seen so far
    pub hash_context: Option<HashState>,
    /// Separate running digest over signed content, for the final
    /// signature check by the downstream applier
    pub signed_hash_context: Option<HashState>,
    pub signature_blob: Option<Vec<u8>>,
}

impl ResumeState {
    /// A state is structurally valid when a nonzero offset is matched by a
    /// hash context covering exactly that many bytes. Anything else must be
    /// treated as "never started".
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.next_data_offset == 0 {
            return true;
        }
        match &self.hash_context {
            Some(ctx) => !ctx.is_finalized() && ctx.bytes_consumed() == self.next_data_offset,
            None => false,
        }
    }
}

/// Full progress record for one payload
#[derive(Debug, Clone, Default)]
pub struct ProgressRecord {
    pub resume: ResumeState,
    pub payload_attempt_number: u32,
    pub full_payload_attempt_number: u32,
    pub current_url_index: usize,
    pub current_url_failure_count: u32,
    pub current_bytes_downloaded: u64,
    pub total_bytes_downloaded: HashMap<DownloadSource, u64>,
    pub update_timestamp_start: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    /// Load the record, or `None` when nothing durable exists or the
    /// persisted state fails its structural invariant. Corruption forces a
    /// clean restart; it is never surfaced as an error.
    ///
    /// # Errors
    /// Returns an error only when the store itself fails.
    pub async fn load(store: &ProgressStore) -> Result<Option<Self>, Error> {
        let Some(raw) = store.get_string(keys::UPDATE_STATE).await? else {
            return Ok(None);
        };
        let Ok(resume) = serde_json::from_str::<ResumeState>(&raw) else {
            return Ok(None);
        };
        if !resume.is_valid() {
            return Ok(None);
        }

        let mut record = Self {
            resume,
            ..Self::default()
        };
        record.payload_attempt_number = read_u32(store, keys::PAYLOAD_ATTEMPT_NUMBER).await?;
        record.full_payload_attempt_number =
            read_u32(store, keys::FULL_PAYLOAD_ATTEMPT_NUMBER).await?;
        record.current_url_index =
            usize::try_from(read_u64(store, keys::CURRENT_URL_INDEX).await?).unwrap_or(0);
        record.current_url_failure_count =
            read_u32(store, keys::CURRENT_URL_FAILURE_COUNT).await?;
        record.current_bytes_downloaded = read_u64(store, keys::CURRENT_BYTES_DOWNLOADED).await?;
        for source in DownloadSource::ALL {
            let total = read_u64(store, &keys::total_bytes_downloaded(source)).await?;
            if total > 0 {
                record.total_bytes_downloaded.insert(source, total);
            }
        }
        record.update_timestamp_start = match store
            .get_i64(keys::UPDATE_TIMESTAMP_START)
            .await
            .unwrap_or(None)
        {
            Some(secs) => Utc.timestamp_opt(secs, 0).single(),
            None => None,
        };

        Ok(Some(record))
    }

    /// Commit the record. The resume document is one atomic write; scalar
    /// counters follow individually.
    ///
    /// # Errors
    /// Returns an error on store I/O failure or if the resume state violates
    /// its own invariant (a bug in the caller, not a recoverable condition).
    pub async fn save(&self, store: &ProgressStore) -> Result<(), Error> {
        if !self.resume.is_valid() {
            return Err(Error::internal(
                "refusing to persist resume state with mismatched hash context",
            ));
        }
        let raw = serde_json::to_string(&self.resume)?;
        store.set_string(keys::UPDATE_STATE, &raw).await?;

        store
            .set_i64(
                keys::PAYLOAD_ATTEMPT_NUMBER,
                i64::from(self.payload_attempt_number),
            )
            .await?;
        store
            .set_i64(
                keys::FULL_PAYLOAD_ATTEMPT_NUMBER,
                i64::from(self.full_payload_attempt_number),
            )
            .await?;
        store
            .set_i64(
                keys::CURRENT_URL_INDEX,
                i64::try_from(self.current_url_index).unwrap_or(i64::MAX),
            )
            .await?;
        store
            .set_i64(
                keys::CURRENT_URL_FAILURE_COUNT,
                i64::from(self.current_url_failure_count),
            )
            .await?;
        store
            .set_i64(
                keys::CURRENT_BYTES_DOWNLOADED,
                to_i64(self.current_bytes_downloaded),
            )
            .await?;
        for (source, total) in &self.total_bytes_downloaded {
            store
                .set_i64(&keys::total_bytes_downloaded(*source), to_i64(*total))
                .await?;
        }
        if let Some(start) = self.update_timestamp_start {
            store
                .set_i64(keys::UPDATE_TIMESTAMP_START, start.timestamp())
                .await?;
        }
        Ok(())
    }

    /// Destroy the record after the payload is applied or permanently
    /// abandoned. Cumulative per-source totals survive for reporting.
    ///
    /// # Errors
    /// Returns an error on store I/O failure.
    pub async fn clear(store: &ProgressStore) -> Result<(), Error> {
        for key in [
            keys::UPDATE_STATE,
            keys::PAYLOAD_ATTEMPT_NUMBER,
            keys::FULL_PAYLOAD_ATTEMPT_NUMBER,
            keys::CURRENT_URL_INDEX,
            keys::CURRENT_URL_FAILURE_COUNT,
            keys::CURRENT_BYTES_DOWNLOADED,
            keys::UPDATE_TIMESTAMP_START,
        ] {
            store.remove(key).await?;
        }
        Ok(())
    }

    /// Merge this attempt's per-source counter into the cumulative totals
    pub fn add_source_bytes(&mut self, source: DownloadSource, bytes: u64) {
        *self.total_bytes_downloaded.entry(source).or_insert(0) += bytes;
    }
}

/// Record one negotiation round against the current payload: stamp the
/// first-seen time on the first sighting, then bump the check counter.
/// Both keys are powerwash-safe; this is the negotiation collaborator's
/// call, not the downloader's.
///
/// # Errors
/// Returns an error on store I/O failure.
pub async fn record_update_check(
    store: &ProgressStore,
    now: DateTime<Utc>,
) -> Result<i64, Error> {
    if store.get_i64(keys::UPDATE_FIRST_SEEN_AT).await?.is_none() {
        store
            .set_i64(keys::UPDATE_FIRST_SEEN_AT, now.timestamp())
            .await?;
    }
    let count = store
        .get_i64(keys::UPDATE_CHECK_COUNT)
        .await?
        .unwrap_or(0)
        .saturating_add(1);
    store.set_i64(keys::UPDATE_CHECK_COUNT, count).await?;
    Ok(count)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

async fn read_u32(store: &ProgressStore, key: &str) -> Result<u32, Error> {
    Ok(u32::try_from(read_u64(store, key).await?).unwrap_or(u32::MAX))
}

async fn read_u64(store: &ProgressStore, key: &str) -> Result<u64, Error> {
    // A malformed scalar degrades to zero rather than poisoning the record
    match store.get_i64(key).await {
        Ok(Some(value)) => Ok(u64::try_from(value).unwrap_or(0)),
        Ok(None) | Err(Error::Persist(_)) => Ok(0),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use upd_hash::Verifier;

    fn context_for(bytes: &[u8]) -> HashState {
        let mut verifier = Verifier::new();
        verifier.update(bytes).unwrap();
        verifier.snapshot()
    }

    #[tokio::test]
    async fn empty_store_reads_as_absent() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();
        assert!(ProgressRecord::load(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn round_trip() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();

        let payload = vec![7u8; 300];
        let mut record = ProgressRecord {
            payload_attempt_number: 2,
            current_url_index: 1,
            current_bytes_downloaded: 300,
            ..ProgressRecord::default()
        };
        record.resume.next_data_offset = 300;
        record.resume.hash_context = Some(context_for(&payload));
        record.add_source_bytes(DownloadSource::HttpsServer, 300);
        record.save(&store).await.unwrap();

        let loaded = ProgressRecord::load(&store).await.unwrap().unwrap();
        assert_eq!(loaded.resume.next_data_offset, 300);
        assert_eq!(loaded.payload_attempt_number, 2);
        assert_eq!(loaded.current_url_index, 1);
        assert_eq!(
            loaded.total_bytes_downloaded.get(&DownloadSource::HttpsServer),
            Some(&300)
        );
        assert_eq!(loaded.resume.hash_context.unwrap(), context_for(&payload));
    }

    #[tokio::test]
    async fn offset_without_context_reads_as_absent() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();

        let bogus = ResumeState {
            next_data_offset: 128,
            ..ResumeState::default()
        };
        store
            .set_string(keys::UPDATE_STATE, &serde_json::to_string(&bogus).unwrap())
            .await
            .unwrap();

        assert!(ProgressRecord::load(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn context_length_mismatch_reads_as_absent() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();

        let bogus = ResumeState {
            next_data_offset: 128,
            hash_context: Some(context_for(&[0u8; 64])),
            ..ResumeState::default()
        };
        store
            .set_string(keys::UPDATE_STATE, &serde_json::to_string(&bogus).unwrap())
            .await
            .unwrap();

        assert!(ProgressRecord::load(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn torn_document_reads_as_absent() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();
        store
            .set_string(keys::UPDATE_STATE, "{\"next_data_offset\": 12")
            .await
            .unwrap();
        assert!(ProgressRecord::load(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_rejects_invalid_resume_state() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();
        let mut record = ProgressRecord::default();
        record.resume.next_data_offset = 10; // no matching context
        assert!(record.save(&store).await.is_err());
    }

    #[tokio::test]
    async fn update_check_counter_and_first_seen() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();

        let first = Utc.timestamp_opt(1_000_000, 0).single().unwrap();
        let later = Utc.timestamp_opt(2_000_000, 0).single().unwrap();
        assert_eq!(record_update_check(&store, first).await.unwrap(), 1);
        assert_eq!(record_update_check(&store, later).await.unwrap(), 2);

        // First sighting is stamped once and never moves
        assert_eq!(
            store.get_i64(keys::UPDATE_FIRST_SEEN_AT).await.unwrap(),
            Some(first.timestamp())
        );
        assert_eq!(store.get_i64(keys::UPDATE_CHECK_COUNT).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn clear_keeps_cumulative_totals() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();

        let mut record = ProgressRecord::default();
        record.add_source_bytes(DownloadSource::HttpServer, 42);
        record.save(&store).await.unwrap();

        ProgressRecord::clear(&store).await.unwrap();
        assert!(ProgressRecord::load(&store).await.unwrap().is_none());
        let key = keys::total_bytes_downloaded(DownloadSource::HttpServer);
        assert_eq!(store.get_i64(&key).await.unwrap(), Some(42));
    }
}
