//! Tile decoding.
//!
//! The supported codec set is closed: [`Codec`] is matched exhaustively and
//! a new compression scheme means a new variant. Each decode produces a
//! [`RawBuffer`] whose dimensions are the tile's actual extent within its
//! level, so edge tiles come back cropped.
//!
//! # Size hypotheses
//!
//! Writers store edge tiles either padded to the nominal tile size (GDAL and
//! libtiff always do) or trimmed to the image edge. The decompressed length
//! decides which:
//!
//! ```text
//! len == nominal_w * nominal_h * bytes_per_pixel  -> unpredict at nominal width, crop
//! len == actual_w  * actual_h  * bytes_per_pixel  -> unpredict at actual width
//! otherwise                                       -> CorruptTileData
//! ```

pub mod lerc;
mod lzw;
mod predictor;
mod samples;

use std::io::Read;

use flate2::read::ZlibDecoder;
use serde::Serialize;
use tracing::debug;

use crate::error::TileError;
use crate::format::tiff::{ByteOrder, Compression};
use crate::geometry::PixelRect;
use crate::raster::{Pixels, RawBuffer};

pub use lzw::lzw_decode;
pub use predictor::{
    predict_horizontal, unpredict_float, unpredict_horizontal, PREDICTOR_FLOATING_POINT,
    PREDICTOR_HORIZONTAL, PREDICTOR_NONE,
};
pub use samples::{depth_for, to_raw_buffer};

/// LercParameters additional compression codes.
const LERC_ADDITIONAL_NONE: u32 = 0;
const LERC_ADDITIONAL_DEFLATE: u32 = 1;
const LERC_ADDITIONAL_ZSTD: u32 = 2;

// =============================================================================
// CodecInfo
// =============================================================================

/// Codec metadata of one resolution level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodecInfo {
    /// TIFF Compression tag value
    pub compression: u16,
    pub bits_per_sample: u16,
    /// 1 unsigned, 2 signed, 3 float
    pub sample_format: u16,
    pub samples_per_pixel: u16,
    /// 1 none, 2 horizontal, 3 floating point
    pub predictor: u16,
    /// Byte order of uncompressed samples
    pub byte_order: ByteOrder,
    /// GDAL_NODATA value, if any
    pub no_data: Option<f64>,
    /// Additional compression inside LERC blobs (0 none, 1 deflate, 2 zstd)
    pub lerc_additional: u32,
}

impl CodecInfo {
    /// Little-endian metadata with no predictor, no-data or LERC layer.
    pub fn new(
        compression: u16,
        bits_per_sample: u16,
        sample_format: u16,
        samples_per_pixel: u16,
    ) -> Self {
        Self {
            compression,
            bits_per_sample,
            sample_format,
            samples_per_pixel,
            predictor: PREDICTOR_NONE,
            byte_order: ByteOrder::LittleEndian,
            no_data: None,
            lerc_additional: LERC_ADDITIONAL_NONE,
        }
    }

    fn bytes_per_pixel(&self) -> usize {
        self.samples_per_pixel as usize * (self.bits_per_sample as usize / 8)
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Codecs this crate decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Codec {
    Lzw,
    Zstd,
    Lerc,
}

impl Codec {
    /// Map a TIFF Compression value to a codec.
    pub fn from_compression(compression: u16) -> Result<Self, TileError> {
        match Compression::from_u16(compression) {
            Some(Compression::Lzw) => Ok(Codec::Lzw),
            Some(Compression::Zstd) => Ok(Codec::Zstd),
            Some(Compression::Lerc) => Ok(Codec::Lerc),
            _ => Err(TileError::UnsupportedCodec {
                compression,
                name: Compression::name_of(compression),
            }),
        }
    }

    /// Decode one tile's bytes.
    pub fn decode(self, data: &[u8], ctx: &DecodeContext<'_>) -> Result<RawBuffer, TileError> {
        debug!(
            codec = ?self,
            bytes = data.len(),
            width = ctx.width,
            height = ctx.height,
            "Decoding tile"
        );
        match self {
            Codec::Lzw => {
                let expected = ctx.nominal_len();
                let bytes = lzw_decode(data, expected)?;
                decode_samples(bytes, ctx)
            }
            Codec::Zstd => {
                let bytes = zstd::stream::decode_all(data)
                    .map_err(|e| TileError::corrupt(format!("ZSTD: {}", e)))?;
                decode_samples(bytes, ctx)
            }
            Codec::Lerc => decode_lerc(data, ctx),
        }
    }
}

// =============================================================================
// DecodeContext
// =============================================================================

/// Everything needed to decode one tile of a level.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'a> {
    pub info: &'a CodecInfo,
    /// Actual tile width (smaller than nominal on the right edge)
    pub width: u32,
    /// Actual tile height (smaller than nominal on the bottom edge)
    pub height: u32,
    pub nominal_width: u32,
    pub nominal_height: u32,
}

impl<'a> DecodeContext<'a> {
    pub fn new(info: &'a CodecInfo, actual: (u32, u32), nominal: (u32, u32)) -> Self {
        Self {
            info,
            width: actual.0,
            height: actual.1,
            nominal_width: nominal.0,
            nominal_height: nominal.1,
        }
    }

    fn nominal_len(&self) -> usize {
        self.nominal_width as usize * self.nominal_height as usize * self.info.bytes_per_pixel()
    }

    fn actual_len(&self) -> usize {
        self.width as usize * self.height as usize * self.info.bytes_per_pixel()
    }

    fn is_edge(&self) -> bool {
        self.width != self.nominal_width || self.height != self.nominal_height
    }

    /// Value for pixels a codec marks invalid.
    fn fill_value(&self, is_float: bool) -> f64 {
        match self.info.no_data {
            Some(v) => v,
            None if is_float => f64::NAN,
            None => 0.0,
        }
    }
}

/// Stored layout of a decompressed tile: `(row_pixels, rows)`.
fn stored_layout(len: usize, ctx: &DecodeContext<'_>) -> Result<(u32, u32), TileError> {
    if len == ctx.nominal_len() {
        Ok((ctx.nominal_width, ctx.nominal_height))
    } else if len == ctx.actual_len() {
        Ok((ctx.width, ctx.height))
    } else {
        Err(TileError::corrupt(format!(
            "decoded {} bytes, expected {} (full {}x{} tile) or {} (edge {}x{} tile)",
            len,
            ctx.nominal_len(),
            ctx.nominal_width,
            ctx.nominal_height,
            ctx.actual_len(),
            ctx.width,
            ctx.height
        )))
    }
}

/// Undo the predictor, crop to the actual extent and reinterpret samples.
fn decode_samples(mut bytes: Vec<u8>, ctx: &DecodeContext<'_>) -> Result<RawBuffer, TileError> {
    let info = ctx.info;
    depth_for(info.sample_format, info.bits_per_sample)?;

    let (row_pixels, rows) = stored_layout(bytes.len(), ctx)?;
    let spp = info.samples_per_pixel as usize;
    match info.predictor {
        PREDICTOR_NONE => {}
        PREDICTOR_HORIZONTAL => unpredict_horizontal(
            &mut bytes,
            row_pixels as usize,
            spp,
            info.bits_per_sample,
            info.byte_order,
        )?,
        PREDICTOR_FLOATING_POINT => unpredict_float(
            &mut bytes,
            row_pixels as usize,
            spp,
            info.bits_per_sample,
            info.byte_order,
        )?,
        other => return Err(TileError::corrupt(format!("unknown predictor {}", other))),
    }

    let buffer = to_raw_buffer(
        &bytes,
        info.sample_format,
        info.bits_per_sample,
        info.byte_order,
        row_pixels,
        rows,
        spp as u32,
    )?;

    if (row_pixels, rows) == (ctx.width, ctx.height) {
        Ok(buffer)
    } else {
        buffer.crop(PixelRect::new(0, 0, ctx.width, ctx.height))
    }
}

fn decode_lerc(data: &[u8], ctx: &DecodeContext<'_>) -> Result<RawBuffer, TileError> {
    let inflated;
    let blob = match ctx.info.lerc_additional {
        LERC_ADDITIONAL_NONE => data,
        LERC_ADDITIONAL_ZSTD => {
            inflated = zstd::stream::decode_all(data)
                .map_err(|e| TileError::corrupt(format!("LERC ZSTD layer: {}", e)))?;
            &inflated[..]
        }
        LERC_ADDITIONAL_DEFLATE => {
            let mut decoder = ZlibDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| TileError::corrupt(format!("LERC Deflate layer: {}", e)))?;
            inflated = out;
            &inflated[..]
        }
        other => {
            return Err(TileError::corrupt(format!(
                "unknown LERC additional compression {}",
                other
            )))
        }
    };

    let header = lerc::read_header(blob)?;
    let image = lerc::decode(blob, ctx.fill_value(header.data_type.is_float()))?;

    let stored = (image.width, image.height);
    if stored != (ctx.nominal_width, ctx.nominal_height) && stored != (ctx.width, ctx.height) {
        return Err(TileError::corrupt(format!(
            "LERC blob is {}x{}, expected {}x{} or {}x{}",
            image.width, image.height, ctx.nominal_width, ctx.nominal_height, ctx.width, ctx.height
        )));
    }
    if image.depth != ctx.info.samples_per_pixel as u32 {
        return Err(TileError::corrupt(format!(
            "LERC blob has {} values per pixel, level has {} samples",
            image.depth, ctx.info.samples_per_pixel
        )));
    }

    let values = image.values;
    let pixels = match image.data_type {
        lerc::DataType::Byte => Pixels::U8(values.into_iter().map(|v| v as u8).collect()),
        lerc::DataType::UShort => Pixels::U16(values.into_iter().map(|v| v as u16).collect()),
        lerc::DataType::UInt => Pixels::U32(values.into_iter().map(|v| v as u32).collect()),
        _ => Pixels::F32(values.into_iter().map(|v| v as f32).collect()),
    };
    let buffer = RawBuffer::new(image.width, image.height, image.depth, pixels)?;

    if ctx.is_edge() && stored != (ctx.width, ctx.height) {
        buffer.crop(PixelRect::new(0, 0, ctx.width, ctx.height))
    } else {
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::SampleDepth;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    fn u16_info(predictor: u16) -> CodecInfo {
        CodecInfo {
            predictor,
            ..CodecInfo::new(Compression::Zstd as u16, 16, 1, 1)
        }
    }

    #[test]
    fn test_codec_from_compression() {
        assert_eq!(Codec::from_compression(5).unwrap(), Codec::Lzw);
        assert_eq!(Codec::from_compression(50000).unwrap(), Codec::Zstd);
        assert_eq!(Codec::from_compression(34887).unwrap(), Codec::Lerc);

        match Codec::from_compression(8).unwrap_err() {
            TileError::UnsupportedCodec { compression, name } => {
                assert_eq!(compression, 8);
                assert_eq!(name, "Deflate");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(Codec::from_compression(1).is_err());
    }

    #[test]
    fn test_zstd_full_tile() {
        let values: Vec<u16> = (0..16).map(|v| v * 100).collect();
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let compressed = zstd::encode_all(&raw[..], 3).unwrap();

        let info = u16_info(PREDICTOR_NONE);
        let ctx = DecodeContext::new(&info, (4, 4), (4, 4));
        let buffer = Codec::Zstd.decode(&compressed, &ctx).unwrap();
        assert_eq!(buffer.depth(), SampleDepth::U16);
        assert_eq!(buffer.pixels(), &Pixels::U16(values));
    }

    #[test]
    fn test_padded_edge_tile_is_unpredicted_then_cropped() {
        // 4x2 stored tile, image edge leaves 3x2 visible
        let rows: [[u16; 4]; 2] = [[10, 20, 30, 999], [5, 6, 7, 999]];
        let mut raw = Vec::new();
        for row in rows {
            for v in row {
                raw.extend_from_slice(&v.to_le_bytes());
            }
        }
        predict_horizontal(&mut raw, 4, 1, 16, ByteOrder::LittleEndian).unwrap();
        let compressed = zstd::encode_all(&raw[..], 0).unwrap();

        let info = u16_info(PREDICTOR_HORIZONTAL);
        let ctx = DecodeContext::new(&info, (3, 2), (4, 2));
        let buffer = Codec::Zstd.decode(&compressed, &ctx).unwrap();
        assert_eq!((buffer.width(), buffer.height()), (3, 2));
        assert_eq!(buffer.pixels(), &Pixels::U16(vec![10, 20, 30, 5, 6, 7]));
    }

    #[test]
    fn test_trimmed_edge_tile() {
        let raw: Vec<u8> = (1..=6).collect();
        let compressed = zstd::encode_all(&raw[..], 0).unwrap();

        let info = CodecInfo::new(Compression::Zstd as u16, 8, 1, 1);
        let ctx = DecodeContext::new(&info, (3, 2), (4, 4));
        let buffer = Codec::Zstd.decode(&compressed, &ctx).unwrap();
        assert_eq!(buffer.pixels(), &Pixels::U8(raw));
    }

    #[test]
    fn test_size_mismatch_is_corrupt() {
        let compressed = zstd::encode_all(&[0u8; 10][..], 0).unwrap();
        let info = CodecInfo::new(Compression::Zstd as u16, 8, 1, 1);
        let ctx = DecodeContext::new(&info, (3, 2), (4, 4));

        let err = Codec::Zstd.decode(&compressed, &ctx).unwrap_err();
        assert!(matches!(err, TileError::CorruptTileData { .. }));
    }

    #[test]
    fn test_lzw_with_predictor_on_32_bit_is_corrupt() {
        let raw = vec![0u8; 16];
        let encoded = weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
            .encode(&raw)
            .unwrap();
        let info = CodecInfo {
            predictor: PREDICTOR_HORIZONTAL,
            ..CodecInfo::new(Compression::Lzw as u16, 32, 1, 1)
        };
        let ctx = DecodeContext::new(&info, (2, 2), (2, 2));

        let err = Codec::Lzw.decode(&encoded, &ctx).unwrap_err();
        assert!(matches!(err, TileError::CorruptTileData { .. }));
    }

    #[test]
    fn test_unsupported_sample_format_fails_before_layout() {
        let info = CodecInfo::new(Compression::Zstd as u16, 8, 2, 1);
        let ctx = DecodeContext::new(&info, (1, 1), (1, 1));
        let compressed = zstd::encode_all(&[0u8][..], 0).unwrap();

        let err = Codec::Zstd.decode(&compressed, &ctx).unwrap_err();
        assert!(matches!(err, TileError::UnsupportedSampleFormat { .. }));
    }

    #[test]
    fn test_lerc_padded_tile_with_nodata_fill() {
        use lerc::tests::BlobWriter;

        let mut writer = BlobWriter::new(4, 2, lerc::DataType::Float);
        writer.z_min = 1.0;
        writer.z_max = 8.0;
        writer.valid = Some(vec![true, true, false, true, true, true, true, true]);
        let mut body = vec![1u8];
        for v in [1.0f32, 2.0, 4.0, 5.0, 6.0, 7.0, 8.0] {
            body.extend_from_slice(&v.to_le_bytes());
        }
        let blob = writer.finish(8, &[], &body);

        let info = CodecInfo {
            no_data: Some(-1.0),
            ..CodecInfo::new(Compression::Lerc as u16, 32, 3, 1)
        };
        let ctx = DecodeContext::new(&info, (3, 2), (4, 2));
        let buffer = Codec::Lerc.decode(&blob, &ctx).unwrap();
        assert_eq!(
            buffer.pixels(),
            &Pixels::F32(vec![1.0, 2.0, -1.0, 5.0, 6.0, 7.0])
        );

        let zstd_info = CodecInfo {
            lerc_additional: LERC_ADDITIONAL_ZSTD,
            ..info.clone()
        };
        let compressed = zstd::encode_all(&blob[..], 0).unwrap();
        let ctx = DecodeContext::new(&zstd_info, (3, 2), (4, 2));
        assert_eq!(Codec::Lerc.decode(&compressed, &ctx).unwrap(), buffer);

        let deflate_info = CodecInfo {
            lerc_additional: LERC_ADDITIONAL_DEFLATE,
            ..info
        };
        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&blob).unwrap();
        let compressed = encoder.finish().unwrap();
        let ctx = DecodeContext::new(&deflate_info, (3, 2), (4, 2));
        assert_eq!(Codec::Lerc.decode(&compressed, &ctx).unwrap(), buffer);

        // A raw blob is not a zlib stream
        assert!(matches!(
            Codec::Lerc.decode(&blob, &ctx).unwrap_err(),
            TileError::CorruptTileData { .. }
        ));
    }
}
