//! Raw-deflate handling for fetched comment blobs.

use std::borrow::Cow;

use flate2::{Decompress, FlushDecompress, Status};
use tracing::trace;

use crate::error::{DanmakuError, Result};

/// First byte of the textual (XML) comment format.
pub const TEXT_MARKER: u8 = b'<';

/// Whether the bytes begin with the textual format's marker, after an
/// optional UTF-8 BOM.
///
/// Leading whitespace is not skipped: binary segments start with the field
/// tag `0x0a`, and a following length byte of `0x3c` would read as `"\n<"`.
pub fn has_text_marker(data: &[u8]) -> bool {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    data.first() == Some(&TEXT_MARKER)
}

/// Decompress a raw deflate stream (no zlib header).
///
/// Only a stream that reaches its end marker is accepted, so truncated or
/// non-deflate input is an error rather than a partial result.
pub fn inflate_raw(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = Decompress::new(false);
    let mut decompressed = Vec::with_capacity(data.len().saturating_mul(4).max(64));
    loop {
        if decompressed.len() == decompressed.capacity() {
            decompressed.reserve(decompressed.capacity());
        }
        let consumed = decoder.total_in() as usize;
        let produced = decoder.total_out();
        let status = decoder
            .decompress_vec(&data[consumed..], &mut decompressed, FlushDecompress::Finish)
            .map_err(|e| DanmakuError::decode(format!("Failed to inflate blob: {}", e)))?;
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                let stalled = decoder.total_in() as usize == consumed
                    && decoder.total_out() == produced;
                let out_of_input = decoder.total_in() as usize >= data.len();
                if decompressed.len() < decompressed.capacity() && (stalled || out_of_input) {
                    return Err(DanmakuError::decode("Truncated deflate stream"));
                }
            }
        }
    }
    if decompressed.is_empty() && !data.is_empty() {
        return Err(DanmakuError::decode("Inflated blob is empty"));
    }
    Ok(decompressed)
}

/// Inflate `data` unless it already looks like the textual format.
///
/// Never fails: when decompression does not succeed the original bytes are
/// returned untouched.
pub fn inflate_if_needed(data: &[u8]) -> Cow<'_, [u8]> {
    if data.is_empty() || has_text_marker(data) {
        return Cow::Borrowed(data);
    }
    match inflate_raw(data) {
        Ok(inflated) => Cow::Owned(inflated),
        Err(e) => {
            trace!(error = %e, len = data.len(), "Blob is not deflated, using raw bytes");
            Cow::Borrowed(data)
        }
    }
}

#[cfg(test)]
pub(crate) fn deflate_raw(data: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::Write;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
