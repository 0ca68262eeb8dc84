#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Streaming compression for payload sub-blobs
//!
//! zlib-wrapped DEFLATE via `flate2`. Compression is not guaranteed to
//! shrink input: high-entropy data may grow slightly from format overhead,
//! which is not an error.

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;
use upd_errors::{CodecError, Error};

/// Compress a byte slice
///
/// The empty sequence compresses to the empty sequence.
///
/// # Errors
/// Returns an error if the encoder fails, which indicates an internal
/// I/O problem rather than bad input.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, Error> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut encoder = ZlibEncoder::new(data, Compression::default());
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::CompressFailed(e.to_string()))?;
    Ok(out)
}

/// Decompress a byte slice
///
/// The empty sequence decompresses to the empty sequence. A malformed
/// stream fails with [`CodecError::Malformed`], never garbage output.
///
/// # Errors
/// Returns an error if the input is not a valid zlib stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, Error> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Malformed(e.to_string()))?;
    Ok(out)
}

/// Compress a string
///
/// # Errors
/// Returns an error if the encoder fails.
pub fn compress_str(text: &str) -> Result<Vec<u8>, Error> {
    compress(text.as_bytes())
}

/// Decompress into a string
///
/// # Errors
/// Returns an error if the input is malformed or the content is not UTF-8.
pub fn decompress_to_string(data: &[u8]) -> Result<String, Error> {
    let bytes = decompress(data)?;
    String::from_utf8(bytes).map_err(|_| CodecError::NotUtf8.into())
}
