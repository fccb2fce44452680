//! Value to color mapping through sorted breakpoints.
//!
//! Ramps are written in the GDAL color-relief text format:
//!
//! ```text
//! # elevation  r   g   b   [a]
//! nv            0   0   0   0
//! 0           192 224 255
//! 1000        108 220 108 255
//! ```
//!
//! Fields may be separated by whitespace, commas or colons.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::TileError;
use crate::raster::{Pixels, RawBuffer};

use super::PipelineContext;

/// One ramp stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub value: f64,
    pub rgba: [u8; 4],
}

impl Breakpoint {
    pub const fn new(value: f64, rgba: [u8; 4]) -> Self {
        Self { value, rgba }
    }
}

/// Sorted breakpoints plus an optional no-data color.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct ColorRamp {
    breakpoints: Vec<Breakpoint>,
    no_data: Option<Breakpoint>,
}

impl ColorRamp {
    /// Build a ramp; breakpoints are sorted by value.
    pub fn new(
        mut breakpoints: Vec<Breakpoint>,
        no_data: Option<Breakpoint>,
    ) -> Result<Self, TileError> {
        if breakpoints.is_empty() {
            return Err(TileError::InvalidColorRamp {
                line: 0,
                message: "a ramp needs at least one breakpoint".to_string(),
            });
        }
        if let Some(bad) = breakpoints.iter().find(|b| !b.value.is_finite()) {
            return Err(TileError::InvalidColorRamp {
                line: 0,
                message: format!("breakpoint value {} is not finite", bad.value),
            });
        }
        breakpoints.sort_by(|a, b| a.value.total_cmp(&b.value));
        Ok(Self {
            breakpoints,
            no_data,
        })
    }

    /// Ramp from breakpoints already sorted by finite value.
    pub(super) fn from_sorted(breakpoints: Vec<Breakpoint>) -> Self {
        Self {
            breakpoints,
            no_data: None,
        }
    }

    /// Parse the GDAL color-relief text format.
    pub fn parse(text: &str) -> Result<Self, TileError> {
        let mut breakpoints = Vec::new();
        let mut no_data = None;

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let content = raw.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }

            let fields: Vec<&str> = content
                .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
                .filter(|f| !f.is_empty())
                .collect();
            if fields.len() != 4 && fields.len() != 5 {
                return Err(TileError::InvalidColorRamp {
                    line,
                    message: format!("expected 'value r g b [a]', got '{}'", content),
                });
            }

            let mut rgba = [0, 0, 0, 255];
            for (slot, field) in rgba.iter_mut().zip(&fields[1..]) {
                *slot = field.parse::<u8>().map_err(|_| TileError::InvalidColorRamp {
                    line,
                    message: format!("color component '{}' is not 0-255", field),
                })?;
            }

            let key = fields[0];
            if key.eq_ignore_ascii_case("nv") {
                no_data = Some(Breakpoint::new(f64::NAN, rgba));
                continue;
            }
            let value = key.parse::<f64>().map_err(|_| TileError::InvalidColorRamp {
                line,
                message: format!("'{}' is not a number", key),
            })?;
            breakpoints.push(Breakpoint::new(value, rgba));
        }

        Self::new(breakpoints, no_data)
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Use `rgba` for `value` before any interpolation.
    pub fn with_no_data(mut self, value: f64, rgba: [u8; 4]) -> Self {
        self.no_data = Some(Breakpoint::new(value, rgba));
        self
    }

    /// Color for `value`.
    ///
    /// The no-data breakpoint wins, values outside the ramp clamp to the end
    /// colors and values in between interpolate each component linearly.
    pub fn get(&self, value: f64) -> [u8; 4] {
        if let Some(nd) = &self.no_data {
            if value == nd.value || (value.is_nan() && nd.value.is_nan()) {
                return nd.rgba;
            }
        }
        if value.is_nan() {
            return [0, 0, 0, 0];
        }

        let first = &self.breakpoints[0];
        let last = &self.breakpoints[self.breakpoints.len() - 1];
        if value <= first.value {
            return first.rgba;
        }
        if value >= last.value {
            return last.rgba;
        }

        // First breakpoint strictly above value; both neighbours exist here
        let upper = self.breakpoints.partition_point(|b| b.value <= value);
        let lo = &self.breakpoints[upper - 1];
        let hi = &self.breakpoints[upper];
        let t = (value - lo.value) / (hi.value - lo.value);

        let mut rgba = [0u8; 4];
        for (i, out) in rgba.iter_mut().enumerate() {
            let a = lo.rgba[i] as f64;
            let b = hi.rgba[i] as f64;
            *out = (a + (b - a) * t).round().clamp(0.0, 255.0) as u8;
        }
        rgba
    }

    /// Map channel 0 of every pixel through the ramp.
    ///
    /// The source no-data value uses the ramp's no-data color, or transparent
    /// black when the ramp has none.
    pub(super) fn process(
        &self,
        buffer: &RawBuffer,
        ctx: &PipelineContext,
    ) -> Result<RawBuffer, TileError> {
        let channels = buffer.channels() as usize;
        let pixels = buffer.pixels();
        let count = buffer.width() as usize * buffer.height() as usize;
        let no_data_color = self.no_data.map(|b| b.rgba).unwrap_or([0, 0, 0, 0]);

        let mut out = Vec::with_capacity(count * 4);
        for i in 0..count {
            let value = pixels.get(i * channels);
            if ctx.is_no_data(value) {
                out.extend_from_slice(&no_data_color);
            } else {
                out.extend_from_slice(&self.get(value));
            }
        }

        RawBuffer::new(buffer.width(), buffer.height(), 4, Pixels::U8(out))
    }
}

impl FromStr for ColorRamp {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ColorRamp {
    type Error = TileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl fmt::Display for ColorRamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(nd) = &self.no_data {
            let [r, g, b, a] = nd.rgba;
            writeln!(f, "nv {} {} {} {}", r, g, b, a)?;
        }
        for bp in &self.breakpoints {
            let [r, g, b, a] = bp.rgba;
            writeln!(f, "{} {} {} {} {}", bp.value, r, g, b, a)?;
        }
        Ok(())
    }
}
