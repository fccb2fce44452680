//! Up-front check that an object is a TIFF at all.
//!
//! Anything that does not start with a TIFF or BigTIFF header is rejected as
//! [`FormatError::UnsupportedFormat`] before the IFD chain is walked, so a
//! stray PNG or a truncated upload fails with a clear message.

use crate::error::FormatError;
use crate::io::RangeReader;

use super::tiff::{ByteOrder, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};

/// Read and validate the TIFF header of `reader`.
pub async fn detect_tiff<R: RangeReader>(reader: &R) -> Result<TiffHeader, FormatError> {
    let size = reader.size();
    if size < TIFF_HEADER_SIZE as u64 {
        return Err(FormatError::UnsupportedFormat {
            reason: format!("{} is too small to be a TIFF ({} bytes)", reader.identifier(), size),
        });
    }

    let len = (size as usize).min(BIGTIFF_HEADER_SIZE);
    let bytes = reader.read_exact_at(0, len).await?;
    if !is_tiff_header(&bytes) {
        return Err(FormatError::UnsupportedFormat {
            reason: format!("{} is not a TIFF file", reader.identifier()),
        });
    }

    Ok(TiffHeader::parse(&bytes, size)?)
}

/// Check if bytes start with a TIFF or BigTIFF header.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    if bytes.len() < TIFF_HEADER_SIZE {
        return false;
    }

    let byte_order = match &bytes[0..2] {
        b"II" => ByteOrder::LittleEndian,
        b"MM" => ByteOrder::BigEndian,
        _ => return false,
    };

    let version = byte_order.read_u16(&bytes[2..4]);
    version == 42 || version == 43
}
