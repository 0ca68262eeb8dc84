//! Download orchestration: source selection, failover, resumption
//!
//! Exactly one fetch attempt is in flight per payload; failover is
//! sequential, never a race. The orchestrator threads an explicit context
//! (progress record, backoff state, source list) through each attempt and
//! writes it back through the store - no ambient globals.

use crate::client::FetchClient;
use crate::config::{DeliveryConfig, DeliveryResult, ExpectedPayload, FetchParams};
use crate::retry::retry_delay;
use crate::speed::SpeedGuard;
use crate::transfer::Transfer;
use chrono::Utc;
use futures::StreamExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use upd_backoff::BackoffPolicy;
use upd_errors::{Error, NetworkError};
use upd_events::{AppEvent, DownloadEvent, EventEmitter, EventSender, VerifyEvent};
use upd_hash::Hash;
use upd_peercache::PeerCacheManager;
use upd_progress::{ProgressRecord, ProgressStore, ResumeState};
use upd_types::{DownloadSource, PayloadSource, SourceSet};

/// Where the state machine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Idle,
    Selecting,
    Fetching,
    Verifying,
    Completed,
    FailedTransient,
    FailedFatal,
}

/// Snapshot of delivery progress for a status-reporting collaborator
#[derive(Debug, Clone)]
pub struct DeliveryStatus {
    pub state: DeliveryState,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
}

impl Default for DeliveryStatus {
    fn default() -> Self {
        Self {
            state: DeliveryState::Idle,
            bytes_downloaded: 0,
            total_bytes: 0,
        }
    }
}

/// Outcome of one `deliver` call that did not error
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Payload is on disk, size and digest verified
    Completed(DeliveryResult),
    /// Every open source is gated by backoff; wait at least this long.
    /// Not a failure.
    Blocked { wait: Duration },
}

/// Cooperative cancellation handle for an in-flight delivery
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// The capability seam for driving payload attempts; test harnesses
/// implement this directly instead of standing up a real orchestrator
#[allow(async_fn_in_trait)]
pub trait AttemptDriver {
    /// Current progress snapshot
    fn status(&self) -> DeliveryStatus;

    /// Run one delivery to completion, block, or failure
    async fn start(
        &mut self,
        expected: &ExpectedPayload,
        sources: &[PayloadSource],
        dest: &Path,
    ) -> Result<DeliveryOutcome, Error>;

    /// Drop all durable progress and backoff state for the payload
    async fn reset(&mut self) -> Result<(), Error>;
}

/// Drives source selection, failover, retry, and resumption
pub struct DownloadOrchestrator {
    config: DeliveryConfig,
    store: ProgressStore,
    peer_cache: Option<PeerCacheManager>,
    tx: Option<EventSender>,
    cancel: watch::Receiver<bool>,
    status: watch::Sender<DeliveryStatus>,
}

impl EventEmitter for DownloadOrchestrator {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

impl DownloadOrchestrator {
    #[must_use]
    pub fn new(
        config: DeliveryConfig,
        store: ProgressStore,
        peer_cache: Option<PeerCacheManager>,
        tx: Option<EventSender>,
    ) -> (Self, CancelHandle) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (status_tx, _) = watch::channel(DeliveryStatus::default());
        (
            Self {
                config,
                store,
                peer_cache,
                tx,
                cancel: cancel_rx,
                status: status_tx,
            },
            CancelHandle { tx: cancel_tx },
        )
    }

    /// Subscribe to live status updates
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<DeliveryStatus> {
        self.status.subscribe()
    }

    fn set_state(&self, state: DeliveryState) {
        self.status.send_modify(|s| s.state = state);
    }

    fn set_progress(&self, bytes: u64, total: u64) {
        self.status.send_modify(|s| {
            s.bytes_downloaded = bytes;
            s.total_bytes = total;
        });
    }

    /// Produce a verified, complete payload at `dest` from one of the
    /// candidate sources, resuming from persisted progress.
    ///
    /// # Errors
    /// Returns `Error::Cancelled` on cooperative cancellation, an integrity
    /// or codec error when the payload is unusable on every remaining
    /// source, or the last transient error once all sources are exhausted
    /// (after advancing the backoff gate).
    pub async fn deliver(
        &mut self,
        expected: &ExpectedPayload,
        sources: &[PayloadSource],
        dest: &Path,
    ) -> Result<DeliveryOutcome, Error> {
        let started = Instant::now();
        let mut backoff = BackoffPolicy::load(&self.store).await?;

        if let Some(wait) = backoff.time_until_allowed(Utc::now()) {
            let wait = wait.to_std().unwrap_or_default();
            self.emit(AppEvent::Download(DownloadEvent::PolicyBlocked { wait }));
            return Ok(DeliveryOutcome::Blocked { wait });
        }

        let mut record = ProgressRecord::load(&self.store).await?.unwrap_or_default();
        if record.update_timestamp_start.is_none() {
            record.update_timestamp_start = Some(Utc::now());
        }

        let mut ordered: Vec<&PayloadSource> = sources.iter().collect();
        ordered.sort_by_key(|s| s.priority);
        if record.current_url_index >= ordered.len() {
            record.current_url_index = 0;
        }

        let mut sources_used = SourceSet::empty();
        let mut last_error: Option<Error> = None;

        self.set_state(DeliveryState::Selecting);
        'sources: loop {
            let Some(source) = ordered.get(record.current_url_index).copied() else {
                // Every candidate exhausted: whole-payload failure
                backoff.record_failure(Utc::now());
                record.payload_attempt_number = backoff.state().payload_attempt_number;
                backoff.save(&self.store).await?;
                record.save(&self.store).await?;
                let err = last_error.unwrap_or_else(|| {
                    NetworkError::DownloadFailed("no usable source".to_string()).into()
                });
                self.set_state(if err.is_transient() {
                    DeliveryState::FailedTransient
                } else {
                    DeliveryState::FailedFatal
                });
                return Err(err);
            };

            if source.kind.is_peer() && !backoff.peer_attempt_allowed(Utc::now()) {
                self.emit_debug(format!(
                    "peer sharing quota exhausted, skipping {}",
                    source.url
                ));
                record.current_url_index += 1;
                record.current_url_failure_count = 0;
                continue 'sources;
            }

            let params = FetchParams::for_source(source.kind, &self.config);

            loop {
                if source.kind.is_peer() {
                    backoff.record_peer_attempt(Utc::now());
                    backoff.save(&self.store).await?;
                }
                sources_used.insert(source.kind);

                match self
                    .attempt(source, &params, expected, dest, &mut record)
                    .await
                {
                    Ok(hash) => {
                        return self
                            .complete(expected, dest, record, backoff, hash, sources_used, started, &source.url)
                            .await;
                    }
                    Err(Error::Cancelled) => {
                        // The last committed checkpoint stands
                        record.save(&self.store).await?;
                        self.set_state(DeliveryState::Idle);
                        return Err(Error::Cancelled);
                    }
                    Err(e) if e.is_transient() => {
                        // A server that ignores Range cannot resume; retry
                        // it from offset zero
                        if matches!(
                            e,
                            Error::Network(NetworkError::RangeNotSupported { .. })
                        ) {
                            record.resume = ResumeState::default();
                            record.current_bytes_downloaded = 0;
                        }
                        record.current_url_failure_count += 1;
                        self.emit(AppEvent::Download(DownloadEvent::Failed {
                            url: source.url.clone(),
                            source: source.kind,
                            error: e.to_string(),
                            bytes_downloaded: record.current_bytes_downloaded,
                            recoverable: true,
                        }));
                        record.save(&self.store).await?;
                        last_error = Some(e);

                        if record.current_url_failure_count >= params.max_retry_count {
                            self.failover(&mut record, &ordered);
                            continue 'sources;
                        }
                        self.emit(AppEvent::Download(DownloadEvent::Retrying {
                            url: source.url.clone(),
                            source: source.kind,
                            failure_count: record.current_url_failure_count,
                            max_failures: params.max_retry_count,
                        }));
                        tokio::time::sleep(retry_delay(
                            &self.config.retry,
                            record.current_url_failure_count,
                        ))
                        .await;
                    }
                    Err(e) => {
                        // Fatal for these bytes: discard the partial hash
                        // state and restart from zero elsewhere
                        self.set_state(DeliveryState::FailedFatal);
                        self.emit(AppEvent::Download(DownloadEvent::Failed {
                            url: source.url.clone(),
                            source: source.kind,
                            error: e.to_string(),
                            bytes_downloaded: record.current_bytes_downloaded,
                            recoverable: false,
                        }));
                        record.resume = ResumeState::default();
                        record.current_bytes_downloaded = 0;
                        self.failover(&mut record, &ordered);
                        record.save(&self.store).await?;
                        last_error = Some(e);
                        continue 'sources;
                    }
                }
            }
        }
    }

    fn failover(&self, record: &mut ProgressRecord, ordered: &[&PayloadSource]) {
        let from = ordered.get(record.current_url_index).map(|s| s.kind);
        record.current_url_index += 1;
        record.current_url_failure_count = 0;
        if let (Some(from), Some(next)) = (from, ordered.get(record.current_url_index)) {
            self.emit(AppEvent::Download(DownloadEvent::SourceFailover {
                from,
                to: next.kind,
            }));
        }
        self.set_state(DeliveryState::Selecting);
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete(
        &mut self,
        expected: &ExpectedPayload,
        dest: &Path,
        mut record: ProgressRecord,
        mut backoff: BackoffPolicy,
        hash: Hash,
        sources_used: SourceSet,
        started: Instant,
        url: &str,
    ) -> Result<DeliveryOutcome, Error> {
        self.emit(AppEvent::Verify(VerifyEvent::DigestVerified {
            hash: hash.to_hex(),
        }));

        if expected.compressed {
            if let Err(e) = self.expand_in_place(dest).await {
                // The transferred bytes verified but cannot be used; keep
                // the cumulative totals, drop everything resumable
                record.resume = ResumeState::default();
                record.current_bytes_downloaded = 0;
                record.save(&self.store).await?;
                ProgressRecord::clear(&self.store).await?;
                self.set_state(DeliveryState::FailedFatal);
                return Err(e);
            }
        }

        // Sharing is opportunistic; a cache failure never fails a payload
        // that already verified
        if self.config.share_verified_payloads {
            if let Some(cache) = &self.peer_cache {
                match tokio::fs::read(dest).await {
                    Ok(bytes) => {
                        if let Err(e) = cache.admit(&expected.hash, &bytes, Utc::now()).await {
                            self.emit_warning(format!("payload not shared to peers: {e}"));
                        }
                    }
                    Err(e) => {
                        self.emit_warning(format!("payload not shared to peers: {e}"));
                    }
                }
            }
        }

        // Cumulative totals survive; per-payload state is done
        record.save(&self.store).await?;
        ProgressRecord::clear(&self.store).await?;
        backoff.reset();
        backoff.save(&self.store).await?;

        self.set_state(DeliveryState::Completed);
        self.emit(AppEvent::Download(DownloadEvent::Completed {
            url: url.to_string(),
            size: expected.size,
            hash: hash.to_hex(),
            sources_used: sources_used.bits(),
            elapsed: started.elapsed(),
        }));

        Ok(DeliveryOutcome::Completed(DeliveryResult {
            hash,
            size: expected.size,
            sources_used,
            elapsed: started.elapsed(),
        }))
    }

    /// Decompress the verified blob, replacing the transferred bytes with
    /// the expanded payload the applier consumes
    async fn expand_in_place(&self, dest: &Path) -> Result<(), Error> {
        let compressed = tokio::fs::read(dest)
            .await
            .map_err(|e| Error::io_with_path(&e, dest))?;
        let expanded = upd_codec::decompress(&compressed)?;
        tokio::fs::write(dest, &expanded)
            .await
            .map_err(|e| Error::io_with_path(&e, dest))?;
        Ok(())
    }

    /// One fetch attempt against one source, resuming from the persisted
    /// offset. Returns the verified digest.
    async fn attempt(
        &mut self,
        source: &PayloadSource,
        params: &FetchParams,
        expected: &ExpectedPayload,
        dest: &Path,
        record: &mut ProgressRecord,
    ) -> Result<Hash, Error> {
        let wanted_offset = record.resume.next_data_offset;
        let mut transfer = Transfer::open(dest, record, expected.signature.is_some()).await?;
        record.resume.signature_blob = expected.signature.clone();

        let resume_offset = transfer.offset();
        if wanted_offset > 0 && resume_offset == 0 {
            self.emit(AppEvent::Verify(VerifyEvent::ProgressDiscarded {
                reason: "persisted offset not backed by the destination file".to_string(),
            }));
        }
        if resume_offset > 0 {
            self.emit(AppEvent::Download(DownloadEvent::Resuming {
                url: source.url.clone(),
                resume_offset,
                attempt: record.current_url_failure_count + 1,
            }));
        }
        self.set_state(DeliveryState::Fetching);
        self.emit(AppEvent::Download(DownloadEvent::Started {
            url: source.url.clone(),
            source: source.kind,
            total_size: expected.size,
            resume_offset,
        }));

        // A payload we already hold in the local share cache short-circuits
        // the LAN fetch entirely
        if source.kind.is_peer() {
            if let Some(cache) = &self.peer_cache {
                if cache.has(&expected.hash).await {
                    let (bytes, _guard) = cache.serve(&expected.hash).await?;
                    self.stream_chunks(
                        local_chunks(&bytes, resume_offset),
                        &mut transfer,
                        record,
                        params,
                        expected,
                        source.kind,
                        &source.url,
                    )
                    .await?;
                    self.set_state(DeliveryState::Verifying);
                    return transfer.finalize(expected).await;
                }
            }
        }

        let client = FetchClient::new(params)?;
        let response = client.get_range(&source.url, resume_offset).await?;
        let url = source.url.clone();
        let stream = response.bytes_stream().map(move |item| {
            item.map(|b| b.to_vec()).map_err(|e| {
                if e.is_timeout() {
                    Error::from(NetworkError::Timeout { url: url.clone() })
                } else {
                    Error::from(NetworkError::DownloadFailed(e.to_string()))
                }
            })
        });

        self.stream_chunks(
            stream,
            &mut transfer,
            record,
            params,
            expected,
            source.kind,
            &source.url,
        )
        .await?;

        self.set_state(DeliveryState::Verifying);
        transfer.finalize(expected).await.map_err(|e| {
            if let Error::Integrity(upd_errors::IntegrityError::DigestMismatch {
                expected: want,
                actual,
            }) = &e
            {
                self.emit(AppEvent::Verify(VerifyEvent::DigestMismatch {
                    expected: want.clone(),
                    actual: actual.clone(),
                }));
            }
            e
        })
    }

    /// Drive the chunk loop: cancellation, ordering, the low-speed guard,
    /// and bounded-cadence checkpoints
    #[allow(clippy::too_many_arguments)]
    async fn stream_chunks<S>(
        &self,
        stream: S,
        transfer: &mut Transfer,
        record: &mut ProgressRecord,
        params: &FetchParams,
        expected: &ExpectedPayload,
        source: DownloadSource,
        url: &str,
    ) -> Result<(), Error>
    where
        S: futures::Stream<Item = Result<Vec<u8>, Error>>,
    {
        futures::pin_mut!(stream);
        let mut guard = SpeedGuard::new(
            params.low_speed_limit_bps,
            params.low_speed_window,
            Instant::now(),
        );
        let mut last_progress = Instant::now();
        let mut cancel = self.cancel.clone();
        // A dropped CancelHandle means nobody can cancel anymore
        let mut cancel_live = true;

        loop {
            let item = tokio::select! {
                // The watch Ref returned by wait_for is !Send, so discard it
                // inside the branch future rather than holding it across the
                // commit await below
                changed = async {
                    cancel.wait_for(|cancelled| *cancelled).await.map(|_| ())
                }, if cancel_live => {
                    if changed.is_err() {
                        cancel_live = false;
                        continue;
                    }
                    transfer.commit(record, &self.store).await?;
                    return Err(Error::Cancelled);
                }
                item = stream.next() => item,
            };
            let Some(item) = item else { break };
            let chunk = item?;

            let offset = transfer.offset();
            if offset + chunk.len() as u64 > expected.size {
                return Err(upd_errors::IntegrityError::SizeMismatch {
                    expected: expected.size,
                    actual: offset + chunk.len() as u64,
                }
                .into());
            }
            transfer.feed(offset, &chunk).await?;
            // Tallied per chunk so bytes pulled from a source that later
            // fails still count against it
            record.add_source_bytes(source, chunk.len() as u64);

            if let Some(rate) = guard.record(chunk.len() as u64, Instant::now()) {
                transfer.commit(record, &self.store).await?;
                return Err(NetworkError::LowSpeed {
                    url: url.to_string(),
                    bytes_per_sec: rate,
                }
                .into());
            }

            if transfer.checkpoint_due(self.config.checkpoint_interval_bytes) {
                transfer.commit(record, &self.store).await?;
                self.emit(AppEvent::Verify(VerifyEvent::CheckpointCommitted {
                    offset: transfer.offset(),
                }));
            }

            if last_progress.elapsed() >= Duration::from_millis(100) {
                last_progress = Instant::now();
                self.emit(AppEvent::Download(DownloadEvent::Progress {
                    url: url.to_string(),
                    bytes_downloaded: transfer.offset(),
                    total_bytes: expected.size,
                }));
            }
            self.set_progress(transfer.offset(), expected.size);
        }

        // Stream ended: commit what we have before judging completeness
        transfer.commit(record, &self.store).await?;
        Ok(())
    }
}

impl AttemptDriver for DownloadOrchestrator {
    fn status(&self) -> DeliveryStatus {
        self.status.borrow().clone()
    }

    async fn start(
        &mut self,
        expected: &ExpectedPayload,
        sources: &[PayloadSource],
        dest: &Path,
    ) -> Result<DeliveryOutcome, Error> {
        self.deliver(expected, sources, dest).await
    }

    async fn reset(&mut self) -> Result<(), Error> {
        ProgressRecord::clear(&self.store).await?;
        let mut backoff = BackoffPolicy::load(&self.store).await?;
        backoff.reset();
        backoff.save(&self.store).await?;
        self.status.send_replace(DeliveryStatus::default());
        Ok(())
    }
}

/// Chunked in-order stream over locally cached bytes
fn local_chunks(
    bytes: &[u8],
    from_offset: u64,
) -> impl futures::Stream<Item = Result<Vec<u8>, Error>> + '_ {
    let start = usize::try_from(from_offset).unwrap_or(bytes.len());
    let tail = bytes.get(start..).unwrap_or(&[]);
    futures::stream::iter(tail.chunks(64 * 1024).map(|c| Ok(c.to_vec())))
}
