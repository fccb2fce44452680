//! TIFF predictors (tag 317).
//!
//! - 2: horizontal differencing of integer samples, per channel.
//! - 3: floating point predictor. Sample bytes are split into planes (most
//!   significant plane first) and the planes are byte-differenced.
//!
//! All functions work on whole rows of the decompressed buffer, so edge tiles
//! must be processed at their stored (nominal) width before cropping.

use crate::error::TileError;
use crate::format::tiff::ByteOrder;

pub const PREDICTOR_NONE: u16 = 1;
pub const PREDICTOR_HORIZONTAL: u16 = 2;
pub const PREDICTOR_FLOATING_POINT: u16 = 3;

fn check_rows(data: &[u8], row_bytes: usize) -> Result<(), TileError> {
    if row_bytes == 0 || data.len() % row_bytes != 0 {
        return Err(TileError::corrupt(format!(
            "{} bytes is not a whole number of {} byte rows",
            data.len(),
            row_bytes
        )));
    }
    Ok(())
}

fn unsupported_depth(predictor: u16, bits_per_sample: u16) -> TileError {
    TileError::corrupt(format!(
        "predictor {} does not support {} bit samples",
        predictor, bits_per_sample
    ))
}

/// Undo horizontal differencing in place.
///
/// `value[i] = value[i] + value[i - samples_per_pixel]` along each row,
/// wrapping at the sample width. Only 8 and 16 bit samples are supported.
pub fn unpredict_horizontal(
    data: &mut [u8],
    row_pixels: usize,
    samples_per_pixel: usize,
    bits_per_sample: u16,
    byte_order: ByteOrder,
) -> Result<(), TileError> {
    let spp = samples_per_pixel;
    match bits_per_sample {
        8 => {
            let row_bytes = row_pixels * spp;
            check_rows(data, row_bytes)?;
            for row in data.chunks_exact_mut(row_bytes) {
                for i in spp..row_bytes {
                    row[i] = row[i].wrapping_add(row[i - spp]);
                }
            }
        }
        16 => {
            let row_bytes = row_pixels * spp * 2;
            check_rows(data, row_bytes)?;
            for row in data.chunks_exact_mut(row_bytes) {
                let mut samples: Vec<u16> =
                    row.chunks_exact(2).map(|c| byte_order.read_u16(c)).collect();
                for i in spp..samples.len() {
                    samples[i] = samples[i].wrapping_add(samples[i - spp]);
                }
                for (chunk, value) in row.chunks_exact_mut(2).zip(samples) {
                    byte_order.write_u16(value, chunk);
                }
            }
        }
        other => return Err(unsupported_depth(PREDICTOR_HORIZONTAL, other)),
    }
    Ok(())
}

/// Apply horizontal differencing in place; the inverse of
/// [`unpredict_horizontal`].
pub fn predict_horizontal(
    data: &mut [u8],
    row_pixels: usize,
    samples_per_pixel: usize,
    bits_per_sample: u16,
    byte_order: ByteOrder,
) -> Result<(), TileError> {
    let spp = samples_per_pixel;
    match bits_per_sample {
        8 => {
            let row_bytes = row_pixels * spp;
            check_rows(data, row_bytes)?;
            for row in data.chunks_exact_mut(row_bytes) {
                for i in (spp..row_bytes).rev() {
                    row[i] = row[i].wrapping_sub(row[i - spp]);
                }
            }
        }
        16 => {
            let row_bytes = row_pixels * spp * 2;
            check_rows(data, row_bytes)?;
            for row in data.chunks_exact_mut(row_bytes) {
                let mut samples: Vec<u16> =
                    row.chunks_exact(2).map(|c| byte_order.read_u16(c)).collect();
                for i in (spp..samples.len()).rev() {
                    samples[i] = samples[i].wrapping_sub(samples[i - spp]);
                }
                for (chunk, value) in row.chunks_exact_mut(2).zip(samples) {
                    byte_order.write_u16(value, chunk);
                }
            }
        }
        other => return Err(unsupported_depth(PREDICTOR_HORIZONTAL, other)),
    }
    Ok(())
}

/// Undo the floating point predictor in place.
///
/// The output samples are written in `byte_order` so they can be read back
/// like unpredicted data.
pub fn unpredict_float(
    data: &mut [u8],
    row_pixels: usize,
    samples_per_pixel: usize,
    bits_per_sample: u16,
    byte_order: ByteOrder,
) -> Result<(), TileError> {
    let bytes_per_sample = match bits_per_sample {
        16 | 32 | 64 => bits_per_sample as usize / 8,
        other => return Err(unsupported_depth(PREDICTOR_FLOATING_POINT, other)),
    };

    let spp = samples_per_pixel;
    let samples_per_row = row_pixels * spp;
    let row_bytes = samples_per_row * bytes_per_sample;
    check_rows(data, row_bytes)?;

    let mut planes = vec![0u8; row_bytes];
    for row in data.chunks_exact_mut(row_bytes) {
        for i in spp..row_bytes {
            row[i] = row[i].wrapping_add(row[i - spp]);
        }

        planes.copy_from_slice(row);
        for sample in 0..samples_per_row {
            for byte in 0..bytes_per_sample {
                // plane 0 holds the most significant byte of every sample
                let plane = match byte_order {
                    ByteOrder::BigEndian => byte,
                    ByteOrder::LittleEndian => bytes_per_sample - 1 - byte,
                };
                row[sample * bytes_per_sample + byte] = planes[plane * samples_per_row + sample];
            }
        }
    }
    Ok(())
}
