//! Normalized Difference Vegetation Index.

use serde::Deserialize;

use crate::error::TileError;
use crate::raster::{Pixels, RawBuffer, SampleDepth};

use super::color_ramp::{Breakpoint, ColorRamp};
use super::{matches_no_data, PipelineContext};

/// NDVI band selection and scaling.
///
/// Each band is divided by its scale before the index is computed. A scale
/// left unset comes from the band's `STATISTICS_MAXIMUM`, or 1.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NdviOptions {
    /// Red band index (0-based)
    pub red: u32,
    /// Near-infrared band index (0-based)
    pub nir: u32,
    pub red_scale: Option<f64>,
    pub nir_scale: Option<f64>,
    /// Band carrying opacity, if any
    pub alpha: Option<u32>,
    /// Divisor mapping the alpha band to 0..1; defaults to the sample type maximum
    pub alpha_scale: Option<f64>,
    /// Overrides the asset's no-data value
    pub no_data: Option<f64>,
}

impl Default for NdviOptions {
    fn default() -> Self {
        Self {
            red: 0,
            nir: 3,
            red_scale: None,
            nir_scale: None,
            alpha: None,
            alpha_scale: None,
            no_data: None,
        }
    }
}

const NDVI_STOPS: [(f64, [u8; 3]); 20] = [
    (-1.1, [0, 0, 0]),
    (-0.2, [13, 13, 13]),
    (-0.1, [191, 191, 191]),
    (0.0, [219, 219, 219]),
    (0.025, [235, 235, 235]),
    (0.05, [255, 250, 204]),
    (0.075, [237, 232, 181]),
    (0.1, [222, 217, 156]),
    (0.125, [204, 199, 130]),
    (0.15, [189, 184, 107]),
    (0.175, [176, 194, 97]),
    (0.2, [163, 204, 89]),
    (0.25, [145, 191, 82]),
    (0.3, [128, 179, 71]),
    (0.35, [112, 163, 64]),
    (0.4, [97, 150, 54]),
    (0.45, [79, 138, 46]),
    (0.5, [64, 125, 36]),
    (0.55, [48, 110, 28]),
    (0.6, [15, 84, 10]),
];

/// The fixed NDVI gradient, black at -1.1 through dark green at 0.6.
pub fn ndvi_gradient() -> ColorRamp {
    let stops = NDVI_STOPS
        .iter()
        .map(|(value, [r, g, b])| Breakpoint::new(*value, [*r, *g, *b, 255]))
        .collect();
    ColorRamp::from_sorted(stops)
}

fn depth_maximum(depth: SampleDepth) -> f64 {
    match depth {
        SampleDepth::U8 => u8::MAX as f64,
        SampleDepth::U16 => u16::MAX as f64,
        SampleDepth::U32 => u32::MAX as f64,
        SampleDepth::F32 => 1.0,
    }
}

impl NdviOptions {
    pub(super) fn process(
        &self,
        buffer: &RawBuffer,
        ctx: &PipelineContext,
    ) -> Result<RawBuffer, TileError> {
        let channels = buffer.channels();
        let highest = self.red.max(self.nir).max(self.alpha.unwrap_or(0));
        if highest >= channels {
            return Err(TileError::InvalidPipelineInput {
                stage: "ndvi",
                message: format!(
                    "band {} requested from a {} channel buffer",
                    highest, channels
                ),
            });
        }

        let red_scale = self.red_scale.or(ctx.band_maximum(self.red)).unwrap_or(1.0);
        let nir_scale = self.nir_scale.or(ctx.band_maximum(self.nir)).unwrap_or(1.0);
        let alpha_scale = self
            .alpha_scale
            .unwrap_or_else(|| depth_maximum(buffer.depth()));
        let no_data = self.no_data.or(ctx.no_data);
        let gradient = ndvi_gradient();

        let channels = channels as usize;
        let pixels = buffer.pixels();
        let count = buffer.width() as usize * buffer.height() as usize;
        let mut out = Vec::with_capacity(count * 4);

        for i in 0..count {
            let base = i * channels;
            let red_raw = pixels.get(base + self.red as usize);
            let nir_raw = pixels.get(base + self.nir as usize);
            if matches_no_data(no_data, red_raw) || matches_no_data(no_data, nir_raw) {
                out.extend_from_slice(&[0, 0, 0, 0]);
                continue;
            }

            let red = red_raw / red_scale;
            let nir = nir_raw / nir_scale;
            let denominator = nir + red;
            let ndvi = (nir - red) / denominator;
            if denominator == 0.0 || !ndvi.is_finite() {
                out.extend_from_slice(&[0, 0, 0, 0]);
                continue;
            }

            let mut rgba = gradient.get(ndvi);
            if let Some(alpha_band) = self.alpha {
                let opacity = (pixels.get(base + alpha_band as usize) / alpha_scale).clamp(0.0, 1.0);
                rgba[3] = (rgba[3] as f64 * opacity).round() as u8;
            }
            out.extend_from_slice(&rgba);
        }

        RawBuffer::new(buffer.width(), buffer.height(), 4, Pixels::U8(out))
    }
}
