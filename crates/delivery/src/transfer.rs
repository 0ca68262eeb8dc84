//! Ordered verification and checkpointing for one transfer
//!
//! Bytes flow through here in strictly increasing offset order; digest
//! engines are not commutative, so an out-of-order or duplicate chunk is a
//! protocol bug that must fail the attempt rather than silently corrupt the
//! digest. A checkpoint commits the file bytes before the record that
//! points at them, so a persisted offset never runs ahead of durable data.

use crate::config::ExpectedPayload;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use upd_errors::{Error, IntegrityError};
use upd_hash::{Hash, Verifier};
use upd_progress::{ProgressRecord, ProgressStore};

pub(crate) struct Transfer {
    file: File,
    verifier: Verifier,
    signed_verifier: Option<Verifier>,
    offset: u64,
    since_checkpoint: u64,
}

impl Transfer {
    /// Reconcile the destination file with the persisted record and build
    /// the transfer state.
    ///
    /// A record offset the file cannot back (missing or shorter file) means
    /// the durable state is unusable: the resume fields are cleared and the
    /// transfer restarts from zero. A longer file is truncated back to the
    /// checkpointed offset - bytes past the last commit were never hashed.
    pub(crate) async fn open(
        dest: &Path,
        record: &mut ProgressRecord,
        track_signed: bool,
    ) -> Result<Self, Error> {
        let resume_offset = record.resume.next_data_offset;
        let file_len = match tokio::fs::metadata(dest).await {
            Ok(metadata) => metadata.len(),
            Err(_) => 0,
        };

        if resume_offset > 0 && file_len >= resume_offset {
            let mut file = OpenOptions::new()
                .write(true)
                .open(dest)
                .await
                .map_err(|e| Error::io_with_path(&e, dest))?;
            file.set_len(resume_offset)
                .await
                .map_err(|e| Error::io_with_path(&e, dest))?;
            file.seek(SeekFrom::Start(resume_offset))
                .await
                .map_err(|e| Error::io_with_path(&e, dest))?;

            let verifier = match record.resume.hash_context.clone() {
                Some(ctx) => Verifier::restore(ctx),
                // Unreachable for a record that passed its load invariant,
                // but never resume without a context
                None => {
                    record.resume = upd_progress::ResumeState::default();
                    return Box::pin(Self::open(dest, record, track_signed)).await;
                }
            };
            let signed_verifier = if track_signed {
                Some(match record.resume.signed_hash_context.clone() {
                    Some(ctx) => Verifier::restore(ctx),
                    None => Verifier::new(),
                })
            } else {
                None
            };

            return Ok(Self {
                file,
                verifier,
                signed_verifier,
                offset: resume_offset,
                since_checkpoint: 0,
            });
        }

        // Fresh start: discard stale resume fields and any partial file
        record.resume = upd_progress::ResumeState::default();
        let file = File::create(dest)
            .await
            .map_err(|e| Error::io_with_path(&e, dest))?;
        Ok(Self {
            file,
            verifier: Verifier::new(),
            signed_verifier: track_signed.then(Verifier::new),
            offset: 0,
            since_checkpoint: 0,
        })
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// Append a chunk expected at exactly `chunk_offset`
    pub(crate) async fn feed(&mut self, chunk_offset: u64, chunk: &[u8]) -> Result<(), Error> {
        if chunk_offset != self.offset {
            return Err(IntegrityError::ReorderedChunk {
                offset: chunk_offset,
                verified: self.offset,
            }
            .into());
        }
        self.verifier.update(chunk)?;
        if let Some(signed) = &mut self.signed_verifier {
            signed.update(chunk)?;
        }
        self.file.write_all(chunk).await?;
        self.offset += chunk.len() as u64;
        self.since_checkpoint += chunk.len() as u64;
        Ok(())
    }

    pub(crate) fn checkpoint_due(&self, interval: u64) -> bool {
        self.since_checkpoint >= interval
    }

    /// Commit a checkpoint: flush file bytes, then atomically persist the
    /// matching offset and hash snapshots
    pub(crate) async fn commit(
        &mut self,
        record: &mut ProgressRecord,
        store: &ProgressStore,
    ) -> Result<(), Error> {
        self.file.flush().await?;
        self.file.sync_data().await?;

        record.resume.next_data_offset = self.offset;
        record.resume.hash_context = Some(self.verifier.snapshot());
        record.resume.signed_hash_context =
            self.signed_verifier.as_ref().map(Verifier::snapshot);
        record.current_bytes_downloaded = self.offset;
        record.save(store).await?;

        self.since_checkpoint = 0;
        Ok(())
    }

    /// Close out the transfer: enforce expected size, finalize the digest,
    /// compare against the expected hash
    pub(crate) async fn finalize(mut self, expected: &ExpectedPayload) -> Result<Hash, Error> {
        self.file.flush().await?;
        self.file.sync_data().await?;

        if self.offset != expected.size {
            return Err(IntegrityError::SizeMismatch {
                expected: expected.size,
                actual: self.offset,
            }
            .into());
        }

        let actual = self.verifier.finalize()?;
        if actual != expected.hash {
            return Err(IntegrityError::DigestMismatch {
                expected: expected.hash.to_hex(),
                actual: actual.to_hex(),
            }
            .into());
        }
        Ok(actual)
    }
}
