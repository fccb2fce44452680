//! TIFF tag value reading.
//!
//! Small values live inline in the IFD entry; arrays (tile offsets, GeoTIFF
//! doubles, GDAL strings) live elsewhere in the file. Each array is fetched
//! with a single range read.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry, TiffHeader};
use super::tags::{FieldType, TiffTag};

fn tag_name(entry: &IfdEntry) -> &'static str {
    TiffTag::from_u16(entry.tag_id)
        .map(TiffTag::name)
        .unwrap_or("unknown")
}

fn wrong_type(entry: &IfdEntry, expected: &str, got: FieldType) -> TiffError {
    TiffError::InvalidTagValue {
        tag: tag_name(entry),
        message: format!("expected {}, got {:?}", expected, got),
    }
}

// =============================================================================
// ValueReader
// =============================================================================

/// Reads tag values through a RangeReader, honoring the file's byte order.
pub struct ValueReader<'a, R: RangeReader> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Raw value bytes, from the entry itself or from the file.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            return Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ));
        }

        let offset = entry.value_offset(self.header.byte_order);
        Ok(self.reader.read_exact_at(offset, size as usize).await?)
    }

    /// Integer array (Byte, Short, Long, Long8 or Ifd8) widened to u64.
    ///
    /// TileOffsets and TileByteCounts go through here.
    pub async fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        if entry.count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry).await?;
        let bo = self.header.byte_order;
        let size = field_type.size_in_bytes();
        let chunks = bytes.chunks_exact(size);

        let values = match field_type {
            FieldType::Byte | FieldType::Undefined => chunks.map(|c| c[0] as u64).collect(),
            FieldType::Short => chunks.map(|c| bo.read_u16(c) as u64).collect(),
            FieldType::Long => chunks.map(|c| bo.read_u32(c) as u64).collect(),
            FieldType::Long8 | FieldType::Ifd8 => chunks.map(|c| bo.read_u64(c)).collect(),
            other => return Err(wrong_type(entry, "an unsigned integer array", other)),
        };

        Ok(values)
    }

    /// Integer array narrowed to u32; values above `u32::MAX` are rejected.
    pub async fn read_u32_array(&self, entry: &IfdEntry) -> Result<Vec<u32>, TiffError> {
        self.read_u64_array(entry)
            .await?
            .into_iter()
            .map(|v| {
                u32::try_from(v).map_err(|_| TiffError::InvalidTagValue {
                    tag: tag_name(entry),
                    message: format!("value {} does not fit in 32 bits", v),
                })
            })
            .collect()
    }

    /// First value of an integer array, for per-sample tags like
    /// BitsPerSample where every sample is expected to agree.
    pub async fn read_first_u32(&self, entry: &IfdEntry) -> Result<u32, TiffError> {
        if let Some(value) = entry.inline_u32(self.header.byte_order) {
            return Ok(value);
        }
        self.read_u32_array(entry)
            .await?
            .first()
            .copied()
            .ok_or_else(|| TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: "empty array".to_string(),
            })
    }

    /// Floating point array (Float or Double) widened to f64.
    ///
    /// GeoTIFF model tags are Double.
    pub async fn read_f64_array(&self, entry: &IfdEntry) -> Result<Vec<f64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        if entry.count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry).await?;
        let bo = self.header.byte_order;

        let values = match field_type {
            FieldType::Double => bytes.chunks_exact(8).map(|c| bo.read_f64(c)).collect(),
            FieldType::Float => bytes
                .chunks_exact(4)
                .map(|c| bo.read_f32(c) as f64)
                .collect(),
            other => return Err(wrong_type(entry, "Float or Double", other)),
        };

        Ok(values)
    }

    /// ASCII value up to the first NUL.
    pub async fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        if field_type != FieldType::Ascii {
            return Err(wrong_type(entry, "Ascii", field_type));
        }

        let bytes = self.read_bytes(entry).await?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}
