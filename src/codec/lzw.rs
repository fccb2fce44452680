//! TIFF LZW decompression.
//!
//! Codes are packed MSB-first and start at 9 bits. The code width grows one
//! entry early (at 511, 1023 and 2047) as every TIFF writer since libtiff 5
//! does, and never exceeds 12 bits.

use weezl::decode::Decoder;
use weezl::BitOrder;

use crate::error::TileError;

/// Decompress a TIFF LZW stream.
///
/// `size_hint` is the expected output length, used only to pre-allocate.
/// A stream that ends without an EOI code is accepted; codes that reference
/// entries not yet defined are corrupt data.
pub fn lzw_decode(input: &[u8], size_hint: usize) -> Result<Vec<u8>, TileError> {
    let mut decoder = Decoder::with_tiff_size_switch(BitOrder::Msb, 8);
    let mut out = Vec::with_capacity(size_hint);

    // Not `decode_all`: that one rejects streams missing their EOI
    let result = decoder.into_vec(&mut out).decode(input);
    result
        .status
        .map_err(|e| TileError::corrupt(format!("LZW: {}", e)))?;

    Ok(out)
}
