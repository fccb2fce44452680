//! Output image encoding.
//!
//! The compositor produces an RGBA canvas; this module turns it into the
//! bytes of the requested format.
//!
//! - **PNG** keeps alpha and is always lossless.
//! - **JPEG** has no alpha: pixels are flattened onto black by their alpha.
//! - **WebP** goes through libwebp: lossless on request, lossy at `quality` otherwise.
//! - **AVIF** is only available with the `avif` cargo feature.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage, RgbaImage};
use serde::Serialize;

use crate::error::TileError;

/// Default lossy quality (1-100).
pub const DEFAULT_QUALITY: u8 = 80;

/// Minimum allowed quality.
pub const MIN_QUALITY: u8 = 1;

/// Maximum allowed quality.
pub const MAX_QUALITY: u8 = 100;

// =============================================================================
// OutputFormat
// =============================================================================

/// Encoded output formats.
///
/// [`OutputFormat::Avif`] always parses, but encoding it fails with
/// [`TileError::EncodeError`] unless the crate is built with the `avif`
/// feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
    Webp,
    Avif,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Avif => "image/avif",
        }
    }

    /// File extension used by batch output.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = TileError;

    /// Case-insensitive; `jpg` is accepted for JPEG.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "webp" => Ok(OutputFormat::Webp),
            "avif" => Ok(OutputFormat::Avif),
            _ => Err(TileError::UnknownOutputFormat(s.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
        };
        f.write_str(name)
    }
}

// =============================================================================
// EncodeOptions / OutputImage
// =============================================================================

/// Encoder knobs shared by all formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Quality for lossy formats (1-100)
    pub quality: u8,
    /// Ask for lossless output where the format has a choice
    pub lossless: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            lossless: false,
        }
    }
}

/// A finished tile.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputImage {
    pub bytes: Bytes,
    pub content_type: &'static str,
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode an RGBA canvas.
pub fn encode(
    canvas: &RgbaImage,
    format: OutputFormat,
    options: &EncodeOptions,
) -> Result<OutputImage, TileError> {
    let quality = clamp_quality(options.quality);
    let (width, height) = canvas.dimensions();
    let mut output = Vec::new();

    match format {
        OutputFormat::Png => {
            PngEncoder::new(&mut output)
                .write_image(canvas.as_raw(), width, height, ExtendedColorType::Rgba8)
                .map_err(encode_error)?;
        }
        OutputFormat::Jpeg => {
            let flattened = flatten_alpha(canvas);
            JpegEncoder::new_with_quality(&mut output, quality)
                .encode_image(&flattened)
                .map_err(encode_error)?;
        }
        OutputFormat::Webp => {
            let encoder = webp::Encoder::from_rgba(canvas.as_raw(), width, height);
            let encoded = encoder
                .encode_simple(options.lossless, quality as f32)
                .map_err(|e| TileError::EncodeError {
                    message: format!("WebP: {:?}", e),
                })?;
            output.extend_from_slice(&encoded);
        }
        OutputFormat::Avif => encode_avif(canvas, quality, options.lossless, &mut output)?,
    }

    Ok(OutputImage {
        bytes: Bytes::from(output),
        content_type: format.content_type(),
    })
}

#[cfg(feature = "avif")]
fn encode_avif(
    canvas: &RgbaImage,
    quality: u8,
    lossless: bool,
    output: &mut Vec<u8>,
) -> Result<(), TileError> {
    use image::codecs::avif::AvifEncoder;

    let quality = if lossless { MAX_QUALITY } else { quality };
    let (width, height) = canvas.dimensions();
    AvifEncoder::new_with_speed_quality(output, 8, quality)
        .write_image(canvas.as_raw(), width, height, ExtendedColorType::Rgba8)
        .map_err(encode_error)
}

#[cfg(not(feature = "avif"))]
fn encode_avif(
    _canvas: &RgbaImage,
    _quality: u8,
    _lossless: bool,
    _output: &mut Vec<u8>,
) -> Result<(), TileError> {
    Err(TileError::EncodeError {
        message: "AVIF output requires the `avif` feature".to_string(),
    })
}

fn encode_error(err: image::ImageError) -> TileError {
    TileError::EncodeError {
        message: err.to_string(),
    }
}

/// Premultiply by alpha onto black and drop the alpha channel.
fn flatten_alpha(canvas: &RgbaImage) -> RgbImage {
    let (width, height) = canvas.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let [r, g, b, a] = canvas.get_pixel(x, y).0;
        let scale = |c: u8| ((c as u16 * a as u16 + 127) / 255) as u8;
        image::Rgb([scale(r), scale(g), scale(b)])
    })
}

/// Pixel size of an encoded tile.
pub fn dimensions(bytes: &[u8]) -> Result<(u32, u32), TileError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| TileError::EncodeError {
            message: e.to_string(),
        })?
        .into_dimensions()
        .map_err(encode_error)
}

/// Validate quality parameter.
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_QUALITY..=MAX_QUALITY).contains(&quality)
}

/// Clamp quality to the valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_QUALITY, MAX_QUALITY)
}
