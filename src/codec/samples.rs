//! Reinterpretation of decompressed sample bytes.

use crate::error::TileError;
use crate::format::tiff::{ByteOrder, SampleFormat};
use crate::raster::{Pixels, RawBuffer, SampleDepth};

/// Buffer depth produced for a `(SampleFormat, BitsPerSample)` pair.
///
/// Signed integers and doubles are converted to f32 by value.
pub fn depth_for(sample_format: u16, bits_per_sample: u16) -> Result<SampleDepth, TileError> {
    use SampleFormat::{Float, Int, Uint};

    match (SampleFormat::from_u16(sample_format), bits_per_sample) {
        (Some(Uint), 8) => Ok(SampleDepth::U8),
        (Some(Uint), 16) => Ok(SampleDepth::U16),
        (Some(Uint), 32) => Ok(SampleDepth::U32),
        (Some(Float), 32) | (Some(Int), 16) | (Some(Int), 32) | (Some(Float), 64) => {
            Ok(SampleDepth::F32)
        }
        _ => Err(TileError::UnsupportedSampleFormat {
            sample_format,
            bits_per_sample,
        }),
    }
}

/// Interpret `data` as `width * height * channels` samples in `byte_order`.
pub fn to_raw_buffer(
    data: &[u8],
    sample_format: u16,
    bits_per_sample: u16,
    byte_order: ByteOrder,
    width: u32,
    height: u32,
    channels: u32,
) -> Result<RawBuffer, TileError> {
    depth_for(sample_format, bits_per_sample)?;

    let expected = width as usize * height as usize * channels as usize * (bits_per_sample as usize / 8);
    if data.len() != expected {
        return Err(TileError::corrupt(format!(
            "expected {} sample bytes for a {}x{} tile, got {}",
            expected,
            width,
            height,
            data.len()
        )));
    }

    let bo = byte_order;
    let pixels = match (sample_format, bits_per_sample) {
        (1, 8) => Pixels::U8(data.to_vec()),
        (1, 16) => Pixels::U16(data.chunks_exact(2).map(|c| bo.read_u16(c)).collect()),
        (1, 32) => Pixels::U32(data.chunks_exact(4).map(|c| bo.read_u32(c)).collect()),
        (3, 32) => Pixels::F32(data.chunks_exact(4).map(|c| bo.read_f32(c)).collect()),
        (2, 16) => Pixels::F32(
            data.chunks_exact(2)
                .map(|c| bo.read_u16(c) as i16 as f32)
                .collect(),
        ),
        (2, 32) => Pixels::F32(
            data.chunks_exact(4)
                .map(|c| bo.read_u32(c) as i32 as f32)
                .collect(),
        ),
        (3, 64) => Pixels::F32(data.chunks_exact(8).map(|c| bo.read_f64(c) as f32).collect()),
        _ => {
            return Err(TileError::UnsupportedSampleFormat {
                sample_format,
                bits_per_sample,
            })
        }
    };

    RawBuffer::new(width, height, channels, pixels)
}
