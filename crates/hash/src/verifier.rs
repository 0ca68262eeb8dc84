//! Streaming SHA-256 verifier with serializable internal state
//!
//! Built directly on `sha2::compress256` with an explicit state block so the
//! mid-stream context can be persisted. The high-level `sha2::Sha256` type
//! keeps its state private, which rules it out for cross-reboot resumption.

use crate::Hash;
use serde::{Deserialize, Serialize};
use sha2::compress256;
use sha2::digest::{generic_array::GenericArray, typenum::U64};
use std::path::Path;
use tokio::io::AsyncReadExt;
use upd_errors::{Error, IntegrityError};

/// SHA-256 initial state words (FIPS 180-4)
const INIT_STATE: [u32; 8] = [
    0x6a09_e667,
    0xbb67_ae85,
    0x3c6e_f372,
    0xa54f_f53a,
    0x510e_527f,
    0x9b05_688c,
    0x1f83_d9ab,
    0x5be0_cd19,
];

const BLOCK_LEN: usize = 64;

/// Read buffer size for file feeding
const CHUNK_SIZE: usize = 64 * 1024;

/// Serializable snapshot of a verifier's internal state.
///
/// Two snapshots are equal iff the byte sequences consumed to reach them are
/// equal. The snapshot is valid input for [`Verifier::restore`] across
/// process and device restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashState {
    state: [u32; 8],
    total_len: u64,
    pending: Vec<u8>,
    digest: Option<Hash>,
}

impl HashState {
    /// Number of bytes consumed to reach this state
    #[must_use]
    pub fn bytes_consumed(&self) -> u64 {
        self.total_len
    }

    /// Whether the stream this state belongs to was finalized
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.digest.is_some()
    }

    /// Serialize for durable storage
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Reconstruct from durable storage
    ///
    /// # Errors
    /// Returns an error if the bytes are not a structurally valid snapshot.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let state: Self = serde_json::from_slice(bytes)?;
        // Finalized states carry no pending bytes to cross-check.
        if state.digest.is_none()
            && (state.pending.len() >= BLOCK_LEN
                || state.total_len % BLOCK_LEN as u64 != state.pending.len() as u64)
        {
            return Err(Error::internal("hash context is internally inconsistent"));
        }
        Ok(state)
    }
}

/// Streaming digest engine with snapshot/restore
///
/// Bytes must be fed in stream order. `finalize` may be called at most once
/// per logical stream; dropping an unfinalized verifier is fine.
#[derive(Debug, Clone)]
pub struct Verifier {
    state: [u32; 8],
    total_len: u64,
    buffer: [u8; BLOCK_LEN],
    buffered: usize,
    digest: Option<Hash>,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Verifier {
    /// Create a verifier at the start of a stream
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: INIT_STATE,
            total_len: 0,
            buffer: [0u8; BLOCK_LEN],
            buffered: 0,
            digest: None,
        }
    }

    /// Reconstruct a verifier that behaves identically to one that consumed
    /// every byte fed before the snapshot was taken
    #[must_use]
    pub fn restore(snapshot: HashState) -> Self {
        let mut buffer = [0u8; BLOCK_LEN];
        buffer[..snapshot.pending.len()].copy_from_slice(&snapshot.pending);
        Self {
            state: snapshot.state,
            total_len: snapshot.total_len,
            buffer,
            buffered: snapshot.pending.len(),
            digest: snapshot.digest,
        }
    }

    /// Snapshot the current internal state
    #[must_use]
    pub fn snapshot(&self) -> HashState {
        HashState {
            state: self.state,
            total_len: self.total_len,
            pending: self.buffer[..self.buffered].to_vec(),
            digest: self.digest,
        }
    }

    /// Total bytes consumed so far
    #[must_use]
    pub fn bytes_consumed(&self) -> u64 {
        self.total_len
    }

    /// The digest, once finalized
    #[must_use]
    pub fn hash(&self) -> Option<&Hash> {
        self.digest.as_ref()
    }

    /// Extend the running digest by exactly `data`, in call order
    ///
    /// # Errors
    /// Returns an error if the verifier was already finalized.
    pub fn update(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.digest.is_some() {
            return Err(IntegrityError::AlreadyFinalized.into());
        }
        self.ingest(data);
        Ok(())
    }

    /// Finalize the stream, yielding its digest
    ///
    /// # Errors
    /// Returns an error if called more than once for this stream.
    pub fn finalize(&mut self) -> Result<Hash, Error> {
        if self.digest.is_some() {
            return Err(IntegrityError::AlreadyFinalized.into());
        }
        let hash = self.finish();
        self.digest = Some(hash);
        Ok(hash)
    }

    /// Feed up to `max_len` bytes from a file (the whole file when `None`),
    /// returning the number of bytes consumed
    ///
    /// # Errors
    /// Returns an error carrying the path if the file cannot be read, or if
    /// the verifier was already finalized.
    pub async fn update_file(&mut self, path: &Path, max_len: Option<u64>) -> Result<u64, Error> {
        if self.digest.is_some() {
            return Err(IntegrityError::AlreadyFinalized.into());
        }
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut remaining = max_len.unwrap_or(u64::MAX);
        let mut consumed = 0u64;

        while remaining > 0 {
            let want = usize::try_from(remaining.min(buffer.len() as u64)).unwrap_or(buffer.len());
            let n = file
                .read(&mut buffer[..want])
                .await
                .map_err(|e| Error::io_with_path(&e, path))?;
            if n == 0 {
                break;
            }
            self.ingest(&buffer[..n]);
            consumed += n as u64;
            remaining -= n as u64;
        }

        Ok(consumed)
    }

    /// One-shot digest of a byte slice
    #[must_use]
    pub(crate) fn digest_of(data: &[u8]) -> Hash {
        let mut verifier = Self::new();
        verifier.ingest(data);
        verifier.finish()
    }

    fn ingest(&mut self, mut data: &[u8]) {
        self.total_len += data.len() as u64;

        if self.buffered > 0 {
            let take = (BLOCK_LEN - self.buffered).min(data.len());
            self.buffer[self.buffered..self.buffered + take].copy_from_slice(&data[..take]);
            self.buffered += take;
            data = &data[take..];
            // Block still short: everything landed in the buffer and must
            // stay there
            if self.buffered < BLOCK_LEN {
                return;
            }
            let block = GenericArray::<u8, U64>::clone_from_slice(&self.buffer);
            compress256(&mut self.state, std::slice::from_ref(&block));
            self.buffered = 0;
        }

        let mut chunks = data.chunks_exact(BLOCK_LEN);
        for chunk in &mut chunks {
            let block = GenericArray::<u8, U64>::clone_from_slice(chunk);
            compress256(&mut self.state, std::slice::from_ref(&block));
        }

        let rest = chunks.remainder();
        self.buffer[..rest.len()].copy_from_slice(rest);
        self.buffered = rest.len();
    }

    fn finish(&mut self) -> Hash {
        // FIPS 180-4 padding: 0x80, zeros, 64-bit big-endian bit length
        let bit_len = self.total_len.wrapping_mul(8);
        let mut tail = Vec::with_capacity(2 * BLOCK_LEN);
        tail.extend_from_slice(&self.buffer[..self.buffered]);
        tail.push(0x80);
        while tail.len() % BLOCK_LEN != BLOCK_LEN - 8 {
            tail.push(0);
        }
        tail.extend_from_slice(&bit_len.to_be_bytes());

        for chunk in tail.chunks_exact(BLOCK_LEN) {
            let block = GenericArray::<u8, U64>::clone_from_slice(chunk);
            compress256(&mut self.state, std::slice::from_ref(&block));
        }
        self.buffered = 0;

        let mut out = [0u8; 32];
        for (i, word) in self.state.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
        Hash::from_bytes(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // $ echo -n hi | openssl dgst -sha256 -binary | openssl base64
    const HI_BASE64: &str = "j0NDRmSPa5bfid2pAcUXaxCm2Dlh3TwayItZstwyeqQ=";
    const HI_RAW: [u8; 32] = [
        0x8f, 0x43, 0x43, 0x46, 0x64, 0x8f, 0x6b, 0x96, 0xdf, 0x89, 0xdd, 0xa9, 0x01, 0xc5, 0x17,
        0x6b, 0x10, 0xa6, 0xd8, 0x39, 0x61, 0xdd, 0x3c, 0x1a, 0xc8, 0x8b, 0x59, 0xb2, 0xdc, 0x32,
        0x7a, 0xa4,
    ];

    #[test]
    fn simple() {
        let mut v = Verifier::new();
        v.update(b"hi").unwrap();
        let hash = v.finalize().unwrap();
        assert_eq!(hash.to_base64(), HI_BASE64);
        assert_eq!(hash.as_bytes(), &HI_RAW);
    }

    #[test]
    fn multi_update() {
        let mut v = Verifier::new();
        v.update(b"h").unwrap();
        v.update(b"i").unwrap();
        let hash = v.finalize().unwrap();
        assert_eq!(hash.to_base64(), HI_BASE64);
        assert_eq!(hash.as_bytes(), &HI_RAW);
    }

    #[test]
    fn sub_block_feeds_match_one_shot() {
        // Feeds of 5 bytes keep landing in a partially-filled block buffer
        let data: Vec<u8> = (0u32..300).map(|i| (i % 251) as u8).collect();
        let mut v = Verifier::new();
        for piece in data.chunks(5) {
            v.update(piece).unwrap();
        }
        assert_eq!(v.finalize().unwrap(), Verifier::digest_of(&data));
    }

    #[test]
    fn snapshot_restore_mid_stream() {
        let mut v = Verifier::new();
        v.update(b"h").unwrap();
        let snapshot = v.snapshot();
        v.finalize().unwrap();

        let mut resumed = Verifier::restore(snapshot);
        resumed.update(b"i").unwrap();
        let hash = resumed.finalize().unwrap();
        assert_eq!(hash.to_base64(), HI_BASE64);
    }

    #[test]
    fn snapshot_survives_serialization() {
        let data = vec![0xabu8; 1000];
        let mut v = Verifier::new();
        v.update(&data[..700]).unwrap();
        let stored = v.snapshot().to_vec().unwrap();

        let restored = HashState::from_slice(&stored).unwrap();
        assert_eq!(restored.bytes_consumed(), 700);
        let mut resumed = Verifier::restore(restored);
        resumed.update(&data[700..]).unwrap();
        assert_eq!(resumed.finalize().unwrap(), Hash::from_data(&data));
    }

    #[test]
    fn empty_stream_digest() {
        let mut v = Verifier::new();
        let hash = v.finalize().unwrap();
        // $ echo -n | openssl dgst -sha256
        assert_eq!(
            hash.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn finalize_twice_fails() {
        let mut v = Verifier::new();
        v.update(b"hi").unwrap();
        v.finalize().unwrap();
        assert!(v.finalize().is_err());
        assert!(v.update(b"more").is_err());
    }

    #[test]
    fn big_stream() {
        // Hash constant generated by running this on a linux shell:
        // $ C=0
        // $ while [ $C -lt 1000000 ]; do
        //     echo -n $C
        //     let C=C+1
        //   done | openssl dgst -sha256 -binary | openssl base64
        let mut v = Verifier::new();
        for i in 0..1_000_000 {
            v.update(i.to_string().as_bytes()).unwrap();
        }
        let hash = v.finalize().unwrap();
        assert_eq!(hash.to_base64(), "NZf8k6SPBkYMvhaX8YgzuMgbkLP1XZ+neM8K5wcSsf8=");
    }

    #[test]
    fn corrupt_snapshot_rejected() {
        assert!(HashState::from_slice(b"not json").is_err());

        // Structurally valid JSON whose pending length contradicts the count
        let mut v = Verifier::new();
        v.update(&[0u8; 100]).unwrap();
        let mut snapshot = v.snapshot();
        snapshot.total_len = 7;
        let bytes = snapshot.to_vec().unwrap();
        assert!(HashState::from_slice(&bytes).is_err());
    }

    #[tokio::test]
    async fn update_file_bounded_and_unbounded() {
        use std::io::Write as _;
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        temp.write_all(b"hi").unwrap();

        for max_len in [None, Some(2), Some(10)] {
            let mut v = Verifier::new();
            assert_eq!(v.update_file(temp.path(), max_len).await.unwrap(), 2);
            assert_eq!(v.finalize().unwrap().to_base64(), HI_BASE64);
        }
    }

    #[tokio::test]
    async fn update_file_missing_path() {
        let mut v = Verifier::new();
        let err = v
            .update_file(Path::new("/nonexistent/data"), None)
            .await
            .unwrap_err();
        match err {
            upd_errors::Error::Io { path, .. } => {
                assert_eq!(path.unwrap().to_str().unwrap(), "/nonexistent/data");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
