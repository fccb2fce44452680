//! Terrain-RGB elevation encoding.
//!
//! `elevation = -10000 + (R * 65536 + G * 256 + B) * 0.1`

use crate::error::TileError;
use crate::raster::{Pixels, RawBuffer};

use super::PipelineContext;

const BASE: f64 = -10_000.0;
const STEP: f64 = 0.1;
const MAX_CODE: f64 = 16_777_215.0;

/// Highest elevation the encoding can represent.
pub const TERRAIN_RGB_MAX_ELEVATION: f64 = BASE + MAX_CODE * STEP;

/// Pack an elevation into RGB. Out of range values clamp to the ends.
pub fn encode_elevation(value: f64) -> [u8; 3] {
    let code = ((value - BASE) / STEP).round().clamp(0.0, MAX_CODE) as u32;
    [(code >> 16) as u8, (code >> 8) as u8, code as u8]
}

/// Unpack an RGB triple into an elevation.
pub fn decode_elevation(rgb: [u8; 3]) -> f64 {
    let code = ((rgb[0] as u32) << 16) | ((rgb[1] as u32) << 8) | rgb[2] as u32;
    BASE + code as f64 * STEP
}

/// Encode channel 0 of every pixel. No-data and NaN pixels become
/// transparent black.
pub(super) fn process(buffer: &RawBuffer, ctx: &PipelineContext) -> Result<RawBuffer, TileError> {
    let channels = buffer.channels() as usize;
    let pixels = buffer.pixels();
    let count = buffer.width() as usize * buffer.height() as usize;

    let mut out = Vec::with_capacity(count * 4);
    for i in 0..count {
        let value = pixels.get(i * channels);
        if value.is_nan() || ctx.is_no_data(value) {
            out.extend_from_slice(&[0, 0, 0, 0]);
        } else {
            let [r, g, b] = encode_elevation(value);
            out.extend_from_slice(&[r, g, b, 255]);
        }
    }

    RawBuffer::new(buffer.width(), buffer.height(), 4, Pixels::U8(out))
}
