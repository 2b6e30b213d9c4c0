use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{ProtocolError, Result};

/// Largest inflated packet the protocol allows (2^23)
pub const MAX_DECOMPRESSION_SIZE: usize = 8 * 1024 * 1024;

/// Default zlib level
pub const DEFAULT_LEVEL: u32 = 6;

/// Deflate `data` into a zlib stream
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if the encoder fails
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|_| ProtocolError::CompressionFailure)?;
    encoder.finish().map_err(|_| ProtocolError::CompressionFailure)
}

/// Inflate a zlib stream, refusing to produce more than `limit` bytes
///
/// The read is capped at `limit + 1` bytes so a decompression bomb is detected
/// without ever materialising it.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if:
/// - the stream is not valid zlib
/// - the output exceeds `limit`
pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|_| ProtocolError::DecompressionFailure)?;

    if out.len() > limit {
        return Err(ProtocolError::DecompressionFailure);
    }
    Ok(out)
}

/// Compress data only when it is longer than the threshold, otherwise return it unchanged.
/// Returns the output bytes and a flag indicating whether compression was applied.
pub fn maybe_compress(data: &[u8], threshold: usize, level: u32) -> Result<(Vec<u8>, bool)> {
    if data.len() <= threshold {
        Ok((data.to_vec(), false))
    } else {
        Ok((compress(data, level)?, true))
    }
}
