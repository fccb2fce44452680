//! LERC2 decoding (blob versions 2 to 4).
//!
//! A blob is a header, a run-length encoded validity mask and the valid
//! pixel values, either stored raw in one sweep or quantized per micro block:
//!
//! ```text
//! "Lerc2 " | version | [checksum, v3+] | height | width | [depth, v4+]
//!          | valid count | micro block size | blob size | data type
//!          | max z error | z min | z max
//! mask     | byte count | RLE bytes
//! [v4+]    | per-depth minimums | per-depth maximums
//! data     | one-sweep flag | raw values or micro blocks
//! ```
//!
//! Every multi-byte value is little-endian. The Huffman encoding used for
//! lossless 8-bit images is not supported.

use crate::error::TileError;

const FILE_KEY: &[u8] = b"Lerc2 ";
const MIN_VERSION: i32 = 2;
const MAX_VERSION: i32 = 4;
const RLE_END: i16 = -32768;
const LERC_COMPRESSION: u16 = 34887;

/// LERC element types, numbered as in the blob header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Char = 0,
    Byte = 1,
    Short = 2,
    UShort = 3,
    Int = 4,
    UInt = 5,
    Float = 6,
    Double = 7,
}

impl DataType {
    fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => DataType::Char,
            1 => DataType::Byte,
            2 => DataType::Short,
            3 => DataType::UShort,
            4 => DataType::Int,
            5 => DataType::UInt,
            6 => DataType::Float,
            7 => DataType::Double,
            _ => return None,
        })
    }

    pub fn size(self) -> usize {
        match self {
            DataType::Char | DataType::Byte => 1,
            DataType::Short | DataType::UShort => 2,
            DataType::Int | DataType::UInt | DataType::Float => 4,
            DataType::Double => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    /// Type actually used to store a block offset, from bits 6-7 of the
    /// block flag. Offsets are narrowed when they fit a smaller type.
    fn reduced(self, code: u8) -> Option<DataType> {
        let dt = self as i32;
        let tc = code as i32;
        let used = match self {
            DataType::Short | DataType::Int => dt - tc,
            DataType::UShort | DataType::UInt => dt - 2 * tc,
            DataType::Float => match tc {
                0 => dt,
                1 => DataType::Short as i32,
                _ => DataType::Char as i32,
            },
            DataType::Double if tc == 0 => dt,
            DataType::Double => dt - 2 * tc + 1,
            _ => dt,
        };
        DataType::from_i32(used)
    }
}

/// Parsed blob header.
#[derive(Debug, Clone, PartialEq)]
pub struct LercHeader {
    pub version: i32,
    pub checksum: u32,
    pub height: u32,
    pub width: u32,
    pub depth: u32,
    pub valid_pixels: u32,
    pub micro_block_size: u32,
    pub blob_size: u32,
    pub data_type: DataType,
    pub max_z_error: f64,
    pub z_min: f64,
    pub z_max: f64,
}

/// A decoded LERC raster: `width * height * depth` values, pixel interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct LercImage {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub data_type: DataType,
    pub values: Vec<f64>,
    /// Per-pixel validity
    pub valid: Vec<bool>,
}

fn corrupt(message: impl Into<String>) -> TileError {
    TileError::corrupt(format!("LERC: {}", message.into()))
}

// =============================================================================
// Byte cursor
// =============================================================================

struct Cursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], TileError> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                corrupt(format!(
                    "blob truncated at byte {} (needed {} more)",
                    self.position, len
                ))
            })?;
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, TileError> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> Result<i16, TileError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32, TileError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u32(&mut self) -> Result<u32, TileError> {
        Ok(self.i32()? as u32)
    }

    fn f64(&mut self) -> Result<f64, TileError> {
        let b = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(b);
        Ok(f64::from_le_bytes(bytes))
    }

    /// One value of `data_type`, widened to f64.
    fn value(&mut self, data_type: DataType) -> Result<f64, TileError> {
        let b = self.take(data_type.size())?;
        Ok(match data_type {
            DataType::Char => b[0] as i8 as f64,
            DataType::Byte => b[0] as f64,
            DataType::Short => i16::from_le_bytes([b[0], b[1]]) as f64,
            DataType::UShort => u16::from_le_bytes([b[0], b[1]]) as f64,
            DataType::Int => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            DataType::UInt => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            DataType::Float => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            DataType::Double => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(b);
                f64::from_le_bytes(bytes)
            }
        })
    }

    /// Unsigned integer stored in 1, 2 or 4 bytes.
    fn uint(&mut self, bytes: usize) -> Result<u32, TileError> {
        let b = self.take(bytes)?;
        Ok(match bytes {
            1 => b[0] as u32,
            2 => u16::from_le_bytes([b[0], b[1]]) as u32,
            _ => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        })
    }
}

// =============================================================================
// Header and mask
// =============================================================================

/// Fletcher-32 checksum as used by LERC2 v3+.
pub fn fletcher32(bytes: &[u8]) -> u32 {
    let mut sum1: u32 = 0xffff;
    let mut sum2: u32 = 0xffff;

    let even = bytes.len() & !1;
    // 359 words keep both sums below 2^32 between reductions
    for block in bytes[..even].chunks(718) {
        for word in block.chunks_exact(2) {
            sum1 += (word[0] as u32) << 8;
            sum1 += word[1] as u32;
            sum2 += sum1;
        }
        sum1 = (sum1 & 0xffff) + (sum1 >> 16);
        sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    }

    if bytes.len() & 1 == 1 {
        sum1 += (bytes[even] as u32) << 8;
        sum2 += sum1;
    }

    sum1 = (sum1 & 0xffff) + (sum1 >> 16);
    sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    (sum2 << 16) | sum1
}

/// Read and validate the blob header.
pub fn read_header(blob: &[u8]) -> Result<LercHeader, TileError> {
    let mut cursor = Cursor::new(blob);
    if cursor.take(FILE_KEY.len())? != FILE_KEY {
        return Err(corrupt("missing Lerc2 file key"));
    }

    let version = cursor.i32()?;
    if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
        return Err(TileError::UnsupportedCodec {
            compression: LERC_COMPRESSION,
            name: format!("Lerc2 v{}", version),
        });
    }
    let checksum = if version >= 3 { cursor.u32()? } else { 0 };

    let height = cursor.i32()?;
    let width = cursor.i32()?;
    let depth = if version >= 4 { cursor.i32()? } else { 1 };
    let valid_pixels = cursor.i32()?;
    let micro_block_size = cursor.i32()?;
    let blob_size = cursor.i32()?;
    let data_type = cursor.i32()?;
    let max_z_error = cursor.f64()?;
    let z_min = cursor.f64()?;
    let z_max = cursor.f64()?;

    if height <= 0 || width <= 0 || depth <= 0 || micro_block_size <= 0 {
        return Err(corrupt(format!(
            "invalid dimensions {}x{}x{} (micro block {})",
            width, height, depth, micro_block_size
        )));
    }
    if valid_pixels < 0 || valid_pixels as i64 > width as i64 * height as i64 {
        return Err(corrupt(format!("invalid valid pixel count {}", valid_pixels)));
    }
    if blob_size < cursor.position as i32 || blob_size as usize > blob.len() {
        return Err(corrupt(format!(
            "blob size {} does not fit the {} byte buffer",
            blob_size,
            blob.len()
        )));
    }
    let data_type = DataType::from_i32(data_type)
        .ok_or_else(|| corrupt(format!("unknown data type {}", data_type)))?;

    let header = LercHeader {
        version,
        checksum,
        height: height as u32,
        width: width as u32,
        depth: depth as u32,
        valid_pixels: valid_pixels as u32,
        micro_block_size: micro_block_size as u32,
        blob_size: blob_size as u32,
        data_type,
        max_z_error,
        z_min,
        z_max,
    };

    if version >= 3 {
        // Checksum covers everything after the checksum field
        let start = FILE_KEY.len() + 8;
        let computed = fletcher32(&blob[start..header.blob_size as usize]);
        if computed != checksum {
            return Err(corrupt(format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                checksum, computed
            )));
        }
    }

    Ok(header)
}

fn header_len(version: i32) -> usize {
    let ints = if version >= 4 { 7 } else { 6 };
    FILE_KEY.len() + 4 + if version >= 3 { 4 } else { 0 } + ints * 4 + 3 * 8
}

/// Decode the run-length encoded mask bytes.
fn decode_rle(cursor: &mut Cursor<'_>, out_len: usize) -> Result<Vec<u8>, TileError> {
    let mut out = Vec::with_capacity(out_len);
    loop {
        let count = cursor.i16()?;
        if count == RLE_END {
            break;
        }
        let n = count.unsigned_abs() as usize;
        if out.len() + n > out_len {
            return Err(corrupt("mask runs overflow the mask size"));
        }
        if count > 0 {
            out.extend_from_slice(cursor.take(n)?);
        } else {
            let byte = cursor.u8()?;
            out.resize(out.len() + n, byte);
        }
    }
    if out.len() != out_len {
        return Err(corrupt(format!(
            "mask has {} bytes, expected {}",
            out.len(),
            out_len
        )));
    }
    Ok(out)
}

fn read_mask(cursor: &mut Cursor<'_>, header: &LercHeader) -> Result<Vec<bool>, TileError> {
    let pixels = header.width as usize * header.height as usize;
    let byte_count = cursor.i32()?;

    if header.valid_pixels == 0 {
        return Ok(vec![false; pixels]);
    }
    if header.valid_pixels as usize == pixels {
        return Ok(vec![true; pixels]);
    }
    if byte_count <= 0 {
        return Err(corrupt("partial mask without mask bytes"));
    }

    let bits = decode_rle(cursor, pixels.div_ceil(8))?;
    Ok((0..pixels)
        .map(|k| bits[k >> 3] & (0x80 >> (k & 7)) != 0)
        .collect())
}

// =============================================================================
// Bit stuffing
// =============================================================================

/// Unpack `count` values of `bits` width from an LSB-first stream (v3+).
fn unstuff_lsb(cursor: &mut Cursor<'_>, count: usize, bits: u32) -> Result<Vec<u32>, TileError> {
    let byte_len = (count * bits as usize).div_ceil(8);
    let data = cursor.take(byte_len)?;

    let mut out = Vec::with_capacity(count);
    let mut position = 0usize;
    for _ in 0..count {
        let mut value: u64 = 0;
        let mut filled = 0u32;
        while filled < bits {
            let byte = data[position / 8] as u64;
            let offset = (position % 8) as u32;
            let take = (8 - offset).min(bits - filled);
            value |= ((byte >> offset) & ((1 << take) - 1)) << filled;
            filled += take;
            position += take as usize;
        }
        out.push(value as u32);
    }
    Ok(out)
}

/// Unpack `count` values of `bits` width stored MSB-first in little-endian
/// u32 words, the layout used before v3. The trailing word is stored without
/// its unused low bytes.
fn unstuff_words(cursor: &mut Cursor<'_>, count: usize, bits: u32) -> Result<Vec<u32>, TileError> {
    let total_bits = count * bits as usize;
    let word_count = total_bits.div_ceil(32);
    let tail_bytes = (total_bits % 32).div_ceil(8);
    let missing = if tail_bytes > 0 { 4 - tail_bytes } else { 0 };
    let data = cursor.take(word_count * 4 - missing)?;

    let mut words = Vec::with_capacity(word_count);
    for (i, chunk) in data.chunks(4).enumerate() {
        let mut bytes = [0u8; 4];
        bytes[..chunk.len()].copy_from_slice(chunk);
        let mut word = u32::from_le_bytes(bytes);
        if i == word_count - 1 {
            word <<= 8 * missing as u32;
        }
        words.push(word);
    }

    let mut out = Vec::with_capacity(count);
    let mut position = 0usize;
    for _ in 0..count {
        let mut value: u64 = 0;
        let mut filled = 0u32;
        while filled < bits {
            let word = words[position / 32];
            let offset = (position % 32) as u32;
            let take = (32 - offset).min(bits - filled);
            let chunk = (word << offset) >> (32 - take);
            value = (value << take) | chunk as u64;
            filled += take;
            position += take as usize;
        }
        out.push(value as u32);
    }
    Ok(out)
}

fn unstuff(
    cursor: &mut Cursor<'_>,
    count: usize,
    bits: u32,
    version: i32,
) -> Result<Vec<u32>, TileError> {
    if bits == 0 || count == 0 {
        return Ok(vec![0; count]);
    }
    if bits > 32 {
        return Err(corrupt(format!("{} bit values", bits)));
    }
    if version >= 3 {
        unstuff_lsb(cursor, count, bits)
    } else {
        unstuff_words(cursor, count, bits)
    }
}

/// Decode one bit-stuffed array of at most `max_count` values.
fn read_stuffed(
    cursor: &mut Cursor<'_>,
    max_count: usize,
    version: i32,
) -> Result<Vec<u32>, TileError> {
    let flags = cursor.u8()?;
    let count_bytes = match flags >> 6 {
        0 => 4,
        1 => 2,
        _ => 1,
    };
    let use_lut = flags & 0x20 != 0;
    let bits = (flags & 0x1f) as u32;

    let count = cursor.uint(count_bytes)? as usize;
    if count > max_count {
        return Err(corrupt(format!(
            "{} stuffed values for a {} pixel block",
            count, max_count
        )));
    }

    if !use_lut {
        return unstuff(cursor, count, bits, version);
    }

    if bits == 0 {
        return Err(corrupt("lookup table with zero bit width"));
    }
    let lut_len = (cursor.u8()? as usize)
        .checked_sub(1)
        .ok_or_else(|| corrupt("empty lookup table"))?;
    let mut lut = vec![0u32];
    lut.extend(unstuff(cursor, lut_len, bits, version)?);

    let index_bits = usize::BITS - lut_len.leading_zeros();
    if index_bits == 0 {
        return Err(corrupt("lookup table with no entries"));
    }
    unstuff(cursor, count, index_bits, version)?
        .into_iter()
        .map(|i| {
            lut.get(i as usize)
                .copied()
                .ok_or_else(|| corrupt(format!("lookup index {} out of range", i)))
        })
        .collect()
}

// =============================================================================
// Decoding
// =============================================================================

struct Decoder<'a> {
    header: &'a LercHeader,
    valid: &'a [bool],
    values: Vec<f64>,
    z_max: Vec<f64>,
}

impl Decoder<'_> {
    fn index(&self, row: usize, col: usize, dim: usize) -> usize {
        (row * self.header.width as usize + col) * self.header.depth as usize + dim
    }

    fn fill_constant(&mut self, per_dim: &[f64]) {
        let depth = self.header.depth as usize;
        for (k, _) in self.valid.iter().enumerate().filter(|(_, v)| **v) {
            for (dim, value) in per_dim.iter().enumerate().take(depth) {
                self.values[k * depth + dim] = *value;
            }
        }
    }

    fn read_one_sweep(&mut self, cursor: &mut Cursor<'_>) -> Result<(), TileError> {
        let depth = self.header.depth as usize;
        for k in 0..self.valid.len() {
            if self.valid[k] {
                for dim in 0..depth {
                    self.values[k * depth + dim] = cursor.value(self.header.data_type)?;
                }
            }
        }
        Ok(())
    }

    fn read_blocks(&mut self, cursor: &mut Cursor<'_>) -> Result<(), TileError> {
        let block = self.header.micro_block_size as usize;
        let (width, height) = (self.header.width as usize, self.header.height as usize);

        for row0 in (0..height).step_by(block) {
            let row1 = (row0 + block).min(height);
            for col0 in (0..width).step_by(block) {
                let col1 = (col0 + block).min(width);
                for dim in 0..self.header.depth as usize {
                    self.read_block(cursor, row0..row1, col0..col1, dim)?;
                }
            }
        }
        Ok(())
    }

    fn read_block(
        &mut self,
        cursor: &mut Cursor<'_>,
        rows: std::ops::Range<usize>,
        cols: std::ops::Range<usize>,
        dim: usize,
    ) -> Result<(), TileError> {
        let width = self.header.width as usize;
        let flags = cursor.u8()?;
        let check = ((flags >> 2) & 0x0f) as usize;
        if check != (cols.start >> 3) & 0x0f {
            return Err(corrupt(format!(
                "block at ({}, {}) fails its integrity check",
                cols.start, rows.start
            )));
        }

        let positions: Vec<(usize, usize)> = rows
            .clone()
            .flat_map(|r| cols.clone().map(move |c| (r, c)))
            .collect();

        match flags & 0x03 {
            // zero block
            2 => {
                for &(r, c) in &positions {
                    if self.valid[r * width + c] {
                        let i = self.index(r, c, dim);
                        self.values[i] = 0.0;
                    }
                }
            }
            // raw values
            0 => {
                for &(r, c) in &positions {
                    if self.valid[r * width + c] {
                        let i = self.index(r, c, dim);
                        self.values[i] = cursor.value(self.header.data_type)?;
                    }
                }
            }
            mode => {
                let offset_type = self
                    .header
                    .data_type
                    .reduced(flags >> 6)
                    .ok_or_else(|| corrupt("invalid offset type code"))?;
                let offset = cursor.value(offset_type)?;

                if mode == 3 {
                    for &(r, c) in &positions {
                        if self.valid[r * width + c] {
                            let i = self.index(r, c, dim);
                            self.values[i] = offset;
                        }
                    }
                    return Ok(());
                }

                let quantized = read_stuffed(cursor, positions.len(), self.header.version)?;
                let step = 2.0 * self.header.max_z_error;
                let z_max = self.z_max[dim];
                let dequantize = |q: u32| (offset + q as f64 * step).min(z_max);

                if quantized.len() == positions.len() {
                    for (&(r, c), q) in positions.iter().zip(quantized) {
                        let i = self.index(r, c, dim);
                        self.values[i] = dequantize(q);
                    }
                } else {
                    let mut next = quantized.into_iter();
                    for &(r, c) in &positions {
                        if self.valid[r * width + c] {
                            let q = next
                                .next()
                                .ok_or_else(|| corrupt("fewer stuffed values than valid pixels"))?;
                            let i = self.index(r, c, dim);
                            self.values[i] = dequantize(q);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Decode a LERC2 blob. Invalid pixels receive `fill`.
pub fn decode(blob: &[u8], fill: f64) -> Result<LercImage, TileError> {
    let header = read_header(blob)?;
    let blob = &blob[..header.blob_size as usize];
    let mut cursor = Cursor::new(blob);
    cursor.take(header_len(header.version))?;

    let valid = read_mask(&mut cursor, &header)?;
    let depth = header.depth as usize;
    let mut decoder = Decoder {
        header: &header,
        valid: &valid,
        values: vec![fill; valid.len() * depth],
        z_max: vec![header.z_max; depth],
    };

    if header.valid_pixels > 0 {
        if header.z_min == header.z_max {
            decoder.fill_constant(&vec![header.z_min; depth]);
        } else {
            let mut constant_dims = None;
            if header.version >= 4 {
                let mins = (0..depth)
                    .map(|_| cursor.value(header.data_type))
                    .collect::<Result<Vec<_>, _>>()?;
                let maxs = (0..depth)
                    .map(|_| cursor.value(header.data_type))
                    .collect::<Result<Vec<_>, _>>()?;
                if mins == maxs {
                    constant_dims = Some(mins);
                }
                decoder.z_max = maxs;
            }

            match constant_dims {
                Some(mins) => decoder.fill_constant(&mins),
                None => {
                    let one_sweep = cursor.u8()? != 0;
                    if one_sweep {
                        decoder.read_one_sweep(&mut cursor)?;
                    } else {
                        if header.data_type.size() == 1 && header.max_z_error == 0.5 {
                            let mode = cursor.u8()?;
                            if mode != 0 {
                                return Err(TileError::UnsupportedCodec {
                                    compression: LERC_COMPRESSION,
                                    name: format!("Lerc2 Huffman mode {}", mode),
                                });
                            }
                        }
                        decoder.read_blocks(&mut cursor)?;
                    }
                }
            }
        }
    }

    let values = decoder.values;
    Ok(LercImage {
        width: header.width,
        height: header.height,
        depth: header.depth,
        data_type: header.data_type,
        values,
        valid,
    })
}
