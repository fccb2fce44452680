//! Per-source-tile composition instructions.
//!
//! Every source pixel `p` of the chosen level is assigned the destination
//! pixel span
//!
//! ```text
//! [ round(origin + p * scale), round(origin + (p + 1) * scale) )
//! ```
//!
//! in the destination zoom's global pixel space. The span depends only on
//! the asset and the zoom, never on which destination tile is being
//! rendered, so neighbouring source tiles and neighbouring destination tiles
//! meet on the same integer edge. A source tile's window is resized to its
//! rounded span (`scale_override` marks spans that differ from the literal
//! `pixels * scale`), then cropped to the destination tile.

use serde::Serialize;

use crate::format::tiff::ResolutionLevel;
use crate::geometry::{PixelRect, PIXEL_EPSILON};

use super::Intersection;

/// One internal tile of a resolution level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceTile {
    pub level: usize,
    pub x: u32,
    pub y: u32,
}

/// Resampling step applied to an extracted window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
    pub scale_x: f64,
    pub scale_y: f64,
    /// The size was rounded away from `extract * scale`
    pub scale_override: bool,
}

/// How one source tile lands in the destination tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Composition {
    pub source: SourceTile,
    /// Window inside the decoded source tile
    pub extract: PixelRect,
    /// `None` when the window maps 1:1 onto destination pixels
    pub resize: Option<Resize>,
    /// Top-left corner inside the destination tile
    pub dest_offset: (u32, u32),
    /// Part of the resized window that falls inside the destination tile
    pub crop: Option<PixelRect>,
}

impl Composition {
    /// Size of the pixels this composition writes.
    pub fn output_size(&self) -> (u32, u32) {
        if let Some(crop) = &self.crop {
            (crop.width, crop.height)
        } else if let Some(resize) = &self.resize {
            (resize.width, resize.height)
        } else {
            (self.extract.width, self.extract.height)
        }
    }
}

/// One axis of a composition.
#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisSpan {
    /// Extract window in level pixels
    start: u32,
    len: u32,
    /// Rounded destination span of the window
    target_len: u32,
    scale_override: bool,
    /// Visible part, relative to the destination tile and to the span
    offset: u32,
    crop_start: u32,
    crop_len: u32,
    clipped: bool,
}

/// Level pixel range `[lo, hi)` whose spans touch `[from, to)`.
fn pixel_range(origin: f64, scale: f64, from: f64, to: f64) -> (i64, i64) {
    let lo = ((from - origin) / scale + PIXEL_EPSILON).floor().max(0.0) as i64;
    let hi = ((to - origin) / scale - PIXEL_EPSILON).ceil() as i64;
    (lo, hi)
}

fn axis_span(
    origin: f64,
    scale: f64,
    tile_start: u32,
    tile_len: u32,
    overlap: (f64, f64),
    dest: (f64, f64),
) -> Option<AxisSpan> {
    let (lo, hi) = pixel_range(origin, scale, overlap.0, overlap.1);
    let p0 = lo.max(tile_start as i64);
    let p1 = hi.min(tile_start as i64 + tile_len as i64);
    if p1 <= p0 {
        return None;
    }

    let t0 = (origin + p0 as f64 * scale).round();
    let t1 = (origin + p1 as f64 * scale).round();
    let v0 = t0.max(dest.0);
    let v1 = t1.min(dest.1);
    if v1 - v0 < 1.0 {
        return None;
    }

    let len = (p1 - p0) as u32;
    let target_len = (t1 - t0) as u32;
    Some(AxisSpan {
        start: p0 as u32,
        len,
        target_len,
        scale_override: (target_len as f64 - len as f64 * scale).abs() > 1e-9,
        offset: (v0 - dest.0) as u32,
        crop_start: (v0 - t0) as u32,
        crop_len: (v1 - v0) as u32,
        clipped: v0 > t0 || v1 < t1,
    })
}

/// Composition for source tile `(tile_x, tile_y)` of `level`.
///
/// `scale` is destination pixels per level pixel. Returns `None` when the
/// tile contributes no destination pixel.
pub fn build(
    level: &ResolutionLevel,
    tile_x: u32,
    tile_y: u32,
    scale: (f64, f64),
    intersection: &Intersection,
) -> Option<Composition> {
    let bounds = level.tile_bounds(tile_x, tile_y)?;
    let (origin_x, origin_y) = intersection.origin();
    let overlap = &intersection.overlap_bounds;
    let dest = &intersection.dest_tile_pixel_bounds;

    let x = axis_span(
        origin_x,
        scale.0,
        bounds.x,
        bounds.width,
        (overlap.x, overlap.right()),
        (dest.x, dest.right()),
    )?;
    let y = axis_span(
        origin_y,
        scale.1,
        bounds.y,
        bounds.height,
        (overlap.y, overlap.bottom()),
        (dest.y, dest.bottom()),
    )?;

    let resize = if x.target_len == x.len && y.target_len == y.len {
        None
    } else {
        Some(Resize {
            width: x.target_len,
            height: y.target_len,
            scale_x: scale.0,
            scale_y: scale.1,
            scale_override: x.scale_override || y.scale_override,
        })
    };

    let crop = if x.clipped || y.clipped {
        Some(PixelRect::new(x.crop_start, y.crop_start, x.crop_len, y.crop_len))
    } else {
        None
    };

    Some(Composition {
        source: SourceTile {
            level: level.index,
            x: tile_x,
            y: tile_y,
        },
        extract: PixelRect::new(x.start - bounds.x, y.start - bounds.y, x.len, y.len),
        resize,
        dest_offset: (x.offset, y.offset),
        crop,
    })
}

/// Compositions for every source tile of `level` under the overlap, row by row.
pub fn compositions(level: &ResolutionLevel, intersection: &Intersection) -> Vec<Composition> {
    let (origin_x, origin_y) = intersection.origin();
    let (scale_x, scale_y) = intersection.scale;
    let overlap = &intersection.overlap_bounds;

    let (x_lo, x_hi) = pixel_range(origin_x, scale_x, overlap.x, overlap.right());
    let (y_lo, y_hi) = pixel_range(origin_y, scale_y, overlap.y, overlap.bottom());
    let x_hi = x_hi.min(level.width as i64);
    let y_hi = y_hi.min(level.height as i64);
    if x_hi <= x_lo || y_hi <= y_lo {
        return Vec::new();
    }

    let tw = level.tile_width as i64;
    let th = level.tile_height as i64;
    let columns = (x_lo / tw) as u32..=((x_hi - 1) / tw) as u32;
    let rows = (y_lo / th) as u32..=((y_hi - 1) / th) as u32;

    rows.flat_map(|ty| columns.clone().map(move |tx| (tx, ty)))
        .filter_map(|(tx, ty)| build(level, tx, ty, intersection.scale, intersection))
        .collect()
}
