//! Pixel pipelines.
//!
//! A pipeline turns a decoded [`RawBuffer`] into a 4-channel uint8 buffer
//! ready for compositing. The set is closed and matched exhaustively:
//!
//! - [`Pipeline::TerrainRgb`]: elevation packed into RGB
//! - [`Pipeline::ColorRamp`]: value to color through breakpoints
//! - [`Pipeline::Ndvi`]: vegetation index from red and near-infrared bands
//!
//! Pipelines deserialize from JSON, e.g. `{"type":"ndvi","red":0,"nir":3}`.

mod color_ramp;
mod ndvi;
mod terrain_rgb;

use serde::Deserialize;

use crate::error::TileError;
use crate::format::tiff::BandStatistics;
use crate::raster::RawBuffer;

pub use color_ramp::{Breakpoint, ColorRamp};
pub use ndvi::{ndvi_gradient, NdviOptions};
pub use terrain_rgb::{decode_elevation, encode_elevation, TERRAIN_RGB_MAX_ELEVATION};

/// Asset facts a pipeline may need besides the pixels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineContext {
    /// No-data value of the source level
    pub no_data: Option<f64>,
    /// Band statistics of the source asset
    pub statistics: Vec<BandStatistics>,
}

impl PipelineContext {
    pub fn new(no_data: Option<f64>, statistics: Vec<BandStatistics>) -> Self {
        Self {
            no_data,
            statistics,
        }
    }

    /// Whether `value` is the no-data value (NaN matches NaN).
    pub fn is_no_data(&self, value: f64) -> bool {
        matches_no_data(self.no_data, value)
    }

    pub(crate) fn band_maximum(&self, band: u32) -> Option<f64> {
        self.statistics
            .iter()
            .find(|s| s.band == band as usize)
            .and_then(|s| s.maximum)
            .filter(|max| max.is_finite() && *max > 0.0)
    }
}

pub(crate) fn matches_no_data(no_data: Option<f64>, value: f64) -> bool {
    match no_data {
        Some(nd) if nd.is_nan() => value.is_nan(),
        Some(nd) => value == nd,
        None => false,
    }
}

/// A pixel transform applied to every decoded layer of a render.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Pipeline {
    TerrainRgb,
    ColorRamp { ramp: ColorRamp },
    Ndvi(NdviOptions),
}

impl Pipeline {
    pub fn name(&self) -> &'static str {
        match self {
            Pipeline::TerrainRgb => "terrain-rgb",
            Pipeline::ColorRamp { .. } => "color-ramp",
            Pipeline::Ndvi(_) => "ndvi",
        }
    }

    /// Whether output bytes encode a value rather than a color.
    ///
    /// Such layers cannot be blended channel by channel and are resized with
    /// nearest neighbour.
    pub fn packs_values(&self) -> bool {
        match self {
            Pipeline::TerrainRgb => true,
            Pipeline::ColorRamp { .. } | Pipeline::Ndvi(_) => false,
        }
    }

    /// Run the pipeline; the output is always 4-channel uint8.
    pub fn process(
        &self,
        buffer: &RawBuffer,
        ctx: &PipelineContext,
    ) -> Result<RawBuffer, TileError> {
        if buffer.channels() == 0 {
            return Err(TileError::InvalidPipelineInput {
                stage: self.name(),
                message: "buffer has no channels".to_string(),
            });
        }
        match self {
            Pipeline::TerrainRgb => terrain_rgb::process(buffer, ctx),
            Pipeline::ColorRamp { ramp } => ramp.process(buffer, ctx),
            Pipeline::Ndvi(options) => options.process(buffer, ctx),
        }
    }
}
