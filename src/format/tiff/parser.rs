//! TIFF header and IFD parsing.
//!
//! COGs are ordinary TIFF or BigTIFF files whose IFDs and tile index arrays
//! sit at the front of the file, so the header and every IFD can be parsed
//! from a handful of small range reads.
//!
//! ## Classic TIFF header (8 bytes)
//! ```text
//! 0-1  byte order ("II" little-endian, "MM" big-endian)
//! 2-3  version 42
//! 4-7  offset of first IFD
//! ```
//!
//! ## BigTIFF header (16 bytes)
//! ```text
//! 0-1  byte order
//! 2-3  version 43
//! 4-5  offset byte size (always 8)
//! 6-7  reserved
//! 8-15 offset of first IFD
//! ```
//!
//! ## IFD
//! ```text
//! entry count        u16 (TIFF) / u64 (BigTIFF)
//! entries            12 bytes (TIFF) / 20 bytes (BigTIFF) each
//! next IFD offset    u32 (TIFF) / u64 (BigTIFF)
//! ```

use std::collections::HashMap;

use serde::Serialize;

use crate::error::TiffError;
use crate::io::{read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le};

use super::tags::{FieldType, TiffTag};

// =============================================================================
// Constants
// =============================================================================

const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;
const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) of a TIFF file.
///
/// Applies to IFD values and to uncompressed sample bytes alike, so the
/// decoder carries it through to sample reinterpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ByteOrder {
    /// "II"
    LittleEndian,
    /// "MM"
    BigEndian,
}

impl ByteOrder {
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::LittleEndian => read_u16_le(bytes),
            ByteOrder::BigEndian => read_u16_be(bytes),
        }
    }

    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => read_u32_le(bytes),
            ByteOrder::BigEndian => read_u32_be(bytes),
        }
    }

    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => read_u64_le(bytes),
            ByteOrder::BigEndian => read_u64_be(bytes),
        }
    }

    #[inline]
    pub fn read_f32(self, bytes: &[u8]) -> f32 {
        f32::from_bits(self.read_u32(bytes))
    }

    #[inline]
    pub fn read_f64(self, bytes: &[u8]) -> f64 {
        f64::from_bits(self.read_u64(bytes))
    }

    /// Write a u16 into the first two bytes of `out`.
    #[inline]
    pub fn write_u16(self, value: u16, out: &mut [u8]) {
        let bytes = match self {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        out[..2].copy_from_slice(&bytes);
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Whether this is a BigTIFF file (64-bit offsets)
    pub is_bigtiff: bool,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a header from the first bytes of a file.
    ///
    /// Pass at least 16 bytes when available so BigTIFF headers parse in one
    /// go. `file_size` bounds the first IFD offset.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let (is_bigtiff, first_ifd_offset) = match byte_order.read_u16(&bytes[2..4]) {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            version => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// 12 bytes for TIFF, 20 for BigTIFF.
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Size of the entry count at the start of an IFD.
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Size of the next-IFD offset at the end of an IFD, which is also the
    /// size of an entry's value/offset field.
    #[inline]
    pub const fn value_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }
}

// =============================================================================
// IfdEntry
// =============================================================================

/// One 12 or 20 byte entry of an IFD.
///
/// Values that fit the value/offset field are kept inline; anything larger
/// is fetched later through `ValueReader`.
#[derive(Debug, Clone, PartialEq)]
pub struct IfdEntry {
    pub tag_id: u16,

    /// `None` when the type code is one this parser does not know
    pub field_type: Option<FieldType>,

    pub field_type_raw: u16,

    pub count: u64,

    /// Raw value/offset field (4 or 8 bytes, file byte order)
    pub value_offset_bytes: Vec<u8>,

    pub is_inline: bool,
}

impl IfdEntry {
    fn parse(bytes: &[u8], header: &TiffHeader) -> Self {
        let bo = header.byte_order;
        let tag_id = bo.read_u16(&bytes[0..2]);
        let field_type_raw = bo.read_u16(&bytes[2..4]);
        let field_type = FieldType::from_u16(field_type_raw);

        let (count, value_start) = if header.is_bigtiff {
            (bo.read_u64(&bytes[4..12]), 12)
        } else {
            (bo.read_u32(&bytes[4..8]) as u64, 8)
        };
        let value_offset_bytes = bytes[value_start..value_start + header.value_offset_size()].to_vec();

        let is_inline = field_type
            .map(|ft| ft.fits_inline(count, header.is_bigtiff))
            .unwrap_or(false);

        IfdEntry {
            tag_id,
            field_type,
            field_type_raw,
            count,
            value_offset_bytes,
            is_inline,
        }
    }

    /// Total byte size of the value, or `None` for unknown field types.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type
            .and_then(|ft| (ft.size_in_bytes() as u64).checked_mul(self.count))
    }

    /// Interpret the value/offset field as a file offset.
    pub fn value_offset(&self, byte_order: ByteOrder) -> u64 {
        if self.value_offset_bytes.len() >= 8 {
            byte_order.read_u64(&self.value_offset_bytes)
        } else {
            byte_order.read_u32(&self.value_offset_bytes) as u64
        }
    }

    /// A single inline Byte, Short or Long value.
    pub fn inline_u32(&self, byte_order: ByteOrder) -> Option<u32> {
        if !self.is_inline || self.count != 1 {
            return None;
        }
        match self.field_type? {
            FieldType::Byte | FieldType::Undefined => Some(self.value_offset_bytes[0] as u32),
            FieldType::Short => Some(byte_order.read_u16(&self.value_offset_bytes) as u32),
            FieldType::Long => Some(byte_order.read_u32(&self.value_offset_bytes)),
            _ => None,
        }
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed Image File Directory.
#[derive(Debug, Clone, Default)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,

    /// Index into `entries` by tag id
    entries_by_tag: HashMap<u16, usize>,

    /// Offset of the next IFD, 0 at the end of the chain
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// An IFD with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Bytes occupied by an IFD with `entry_count` entries.
    pub fn calculate_size(entry_count: u64, header: &TiffHeader) -> usize {
        header.ifd_count_size()
            + entry_count as usize * header.ifd_entry_size()
            + header.value_offset_size()
    }

    /// Parse an IFD from bytes starting at its entry count.
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let bo = header.byte_order;
        let count_size = header.ifd_count_size();
        if bytes.len() < count_size {
            return Err(TiffError::FileTooSmall {
                required: count_size as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_count = if header.is_bigtiff {
            bo.read_u64(bytes)
        } else {
            bo.read_u16(bytes) as u64
        };

        let required = Self::calculate_size(entry_count, header);
        if bytes.len() < required {
            return Err(TiffError::FileTooSmall {
                required: required as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_size = header.ifd_entry_size();
        let mut entries = Vec::with_capacity(entry_count as usize);
        let mut entries_by_tag = HashMap::with_capacity(entry_count as usize);
        for i in 0..entry_count as usize {
            let start = count_size + i * entry_size;
            let entry = IfdEntry::parse(&bytes[start..start + entry_size], header);
            entries_by_tag.insert(entry.tag_id, entries.len());
            entries.push(entry);
        }

        let next_start = count_size + entry_count as usize * entry_size;
        let next_ifd_offset = if header.is_bigtiff {
            bo.read_u64(&bytes[next_start..])
        } else {
            bo.read_u32(&bytes[next_start..]) as u64
        };

        Ok(Ifd {
            entries,
            entries_by_tag,
            next_ifd_offset,
        })
    }

    pub fn get_entry(&self, tag_id: u16) -> Option<&IfdEntry> {
        self.entries_by_tag.get(&tag_id).map(|&i| &self.entries[i])
    }

    pub fn get_entry_by_tag(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.get_entry(tag.as_u16())
    }

    /// A single inline integer value for `tag`.
    pub fn get_u32(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(tag)?.inline_u32(byte_order)
    }

    pub fn image_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::ImageWidth, byte_order)
    }

    pub fn image_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::ImageLength, byte_order)
    }

    pub fn tile_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::TileWidth, byte_order)
    }

    pub fn tile_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::TileLength, byte_order)
    }

    /// Compression code, defaulting to 1 (none) when absent.
    pub fn compression(&self, byte_order: ByteOrder) -> u16 {
        self.get_u32(TiffTag::Compression, byte_order).unwrap_or(1) as u16
    }

    /// Whether the directory describes a tiled image.
    pub fn is_tiled(&self) -> bool {
        self.get_entry_by_tag(TiffTag::TileWidth).is_some()
            && self.get_entry_by_tag(TiffTag::TileOffsets).is_some()
    }

    /// Whether the directory is a transparency mask (NewSubfileType bit 2).
    pub fn is_mask(&self, byte_order: ByteOrder) -> bool {
        self.get_u32(TiffTag::NewSubfileType, byte_order)
            .map(|v| v & 4 != 0)
            .unwrap_or(false)
    }
}

// =============================================================================
// Tests
// =============================================================================
