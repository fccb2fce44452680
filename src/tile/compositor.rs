//! Layer compositing.
//!
//! Each [`Layer`] is one decoded source tile plus the [`Composition`] that
//! places it. Layers are drawn bottom to top in the order given:
//!
//! ```text
//! decoded tile ─► extract ─► RGBA ─► resize ─► crop ─► overlay at dest_offset
//! ```

use std::fmt;
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tracing::{debug, warn};

use crate::error::TileError;
use crate::raster::{Pixels, RawBuffer};
use crate::tiler::Composition;

use super::encoder::{encode, EncodeOptions, OutputFormat, OutputImage};

/// Largest width or height a layer may reach before it is dropped.
pub const DEFAULT_MAX_LAYER_DIMENSION: u32 = 16_384;

// =============================================================================
// ResizeKernel
// =============================================================================

/// Resampling filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResizeKernel {
    Nearest,
    #[default]
    Bilinear,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl ResizeKernel {
    pub fn filter(self) -> FilterType {
        match self {
            ResizeKernel::Nearest => FilterType::Nearest,
            ResizeKernel::Bilinear => FilterType::Triangle,
            ResizeKernel::CatmullRom => FilterType::CatmullRom,
            ResizeKernel::Gaussian => FilterType::Gaussian,
            ResizeKernel::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

impl FromStr for ResizeKernel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(ResizeKernel::Nearest),
            "bilinear" | "linear" | "triangle" => Ok(ResizeKernel::Bilinear),
            "catmull-rom" | "cubic" => Ok(ResizeKernel::CatmullRom),
            "gaussian" => Ok(ResizeKernel::Gaussian),
            "lanczos3" | "lanczos" => Ok(ResizeKernel::Lanczos3),
            other => Err(format!(
                "unknown resize kernel '{}' (expected nearest, bilinear, catmull-rom, gaussian or lanczos3)",
                other
            )),
        }
    }
}

impl fmt::Display for ResizeKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResizeKernel::Nearest => "nearest",
            ResizeKernel::Bilinear => "bilinear",
            ResizeKernel::CatmullRom => "catmull-rom",
            ResizeKernel::Gaussian => "gaussian",
            ResizeKernel::Lanczos3 => "lanczos3",
        };
        f.write_str(name)
    }
}

// =============================================================================
// CompositorOptions
// =============================================================================

/// Canvas and resampling settings of one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositorOptions {
    /// Canvas fill, RGBA
    pub background: [u8; 4],
    /// Kernel used when a layer grows
    pub upscale: ResizeKernel,
    /// Kernel used when a layer shrinks
    pub downscale: ResizeKernel,
    pub max_layer_dimension: u32,
}

impl Default for CompositorOptions {
    fn default() -> Self {
        Self {
            background: [0, 0, 0, 0],
            upscale: ResizeKernel::Bilinear,
            downscale: ResizeKernel::Lanczos3,
            max_layer_dimension: DEFAULT_MAX_LAYER_DIMENSION,
        }
    }
}

// =============================================================================
// Layer
// =============================================================================

/// A decoded (and possibly pipeline-transformed) source tile.
#[derive(Debug, Clone)]
pub struct Layer {
    pub composition: Composition,
    pub buffer: RawBuffer,
    /// Pixels carry packed values; resized with nearest neighbour only
    pub packed: bool,
}

impl Layer {
    pub fn new(composition: Composition, buffer: RawBuffer) -> Self {
        Self {
            composition,
            buffer,
            packed: false,
        }
    }

    pub fn with_packed_values(mut self, packed: bool) -> Self {
        self.packed = packed;
        self
    }
}

// =============================================================================
// Compositing
// =============================================================================

/// Draw `layers` onto a background canvas of `tile_size`.
///
/// Layers larger than `max_layer_dimension` are dropped with a warning;
/// every other failure aborts.
pub fn composite(
    layers: &[Layer],
    tile_size: (u32, u32),
    options: &CompositorOptions,
) -> Result<RgbaImage, TileError> {
    let mut canvas = RgbaImage::from_pixel(tile_size.0, tile_size.1, Rgba(options.background));

    let mut drawn = 0usize;
    for layer in layers {
        match render_layer(layer, options) {
            Ok(image) => {
                let (x, y) = layer.composition.dest_offset;
                imageops::overlay(&mut canvas, &image, x as i64, y as i64);
                drawn += 1;
            }
            Err(err) if !err.is_fatal() => {
                warn!(
                    source = ?layer.composition.source,
                    error = %err,
                    "Dropping layer"
                );
            }
            Err(err) => return Err(err),
        }
    }

    debug!(layers = layers.len(), drawn, "Composited tile");
    Ok(canvas)
}

/// Composite and encode.
pub fn compose(
    layers: &[Layer],
    tile_size: (u32, u32),
    format: OutputFormat,
    options: &CompositorOptions,
    encode_options: &EncodeOptions,
) -> Result<OutputImage, TileError> {
    let canvas = composite(layers, tile_size, options)?;
    encode(&canvas, format, encode_options)
}

/// Extract, convert, resize and crop one layer.
fn render_layer(layer: &Layer, options: &CompositorOptions) -> Result<RgbaImage, TileError> {
    let comp = &layer.composition;
    let limit = options.max_layer_dimension;
    check_size(layer.buffer.width(), layer.buffer.height(), limit)?;

    let extracted = if comp.extract.x == 0
        && comp.extract.y == 0
        && comp.extract.width == layer.buffer.width()
        && comp.extract.height == layer.buffer.height()
    {
        to_rgba(&layer.buffer)?
    } else {
        to_rgba(&layer.buffer.crop(comp.extract)?)?
    };

    let resized = match &comp.resize {
        Some(resize) => {
            check_size(resize.width, resize.height, limit)?;
            let grows = resize.width > extracted.width() || resize.height > extracted.height();
            let kernel = if layer.packed {
                ResizeKernel::Nearest
            } else if grows {
                options.upscale
            } else {
                options.downscale
            };
            imageops::resize(&extracted, resize.width, resize.height, kernel.filter())
        }
        None => extracted,
    };

    Ok(match &comp.crop {
        Some(crop) => {
            imageops::crop_imm(&resized, crop.x, crop.y, crop.width, crop.height).to_image()
        }
        None => resized,
    })
}

fn check_size(width: u32, height: u32, limit: u32) -> Result<(), TileError> {
    if width > limit || height > limit {
        return Err(TileError::OversizedLayer {
            width,
            height,
            limit,
        });
    }
    Ok(())
}

/// Expand a uint8 buffer of 1 to 4 channels to RGBA.
fn to_rgba(buffer: &RawBuffer) -> Result<RgbaImage, TileError> {
    let Pixels::U8(samples) = buffer.pixels() else {
        return Err(TileError::InvalidPipelineInput {
            stage: "compositor",
            message: format!(
                "{:?} samples need a pipeline before compositing",
                buffer.depth()
            ),
        });
    };

    let rgba: Vec<u8> = match buffer.channels() {
        4 => samples.clone(),
        3 => samples
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        2 => samples
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        1 => samples.iter().flat_map(|&v| [v, v, v, 255]).collect(),
        channels => {
            return Err(TileError::InvalidPipelineInput {
                stage: "compositor",
                message: format!("cannot display {} channels without a pipeline", channels),
            })
        }
    };

    RgbaImage::from_raw(buffer.width(), buffer.height(), rgba)
        .ok_or_else(|| TileError::corrupt("RGBA buffer size mismatch"))
}
