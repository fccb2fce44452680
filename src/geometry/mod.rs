//! Coordinate types and tile matrices.
//!
//! Three spaces are involved in rendering a tile:
//!
//! ```text
//!  projected CRS units         global pixels at zoom z          tile-local pixels
//!  (BoundingBox)        ──►    (Bounds, f64)              ──►   (PixelRect, u32)
//!        TileGeometry::source_to_pixels      minus the tile's pixel origin
//! ```
//!
//! Intersections are computed in the destination zoom's global pixel space,
//! composition instructions in tile-local integer pixels.

mod tile_matrix;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

pub use tile_matrix::{TileGeometry, TileMatrix};

/// Slack allowed when comparing pixel-space edges computed in floating point.
pub const PIXEL_EPSILON: f64 = 1e-6;

// =============================================================================
// Tile
// =============================================================================

/// Destination tile coordinate in a tile matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Tile {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

impl FromStr for Tile {
    type Err = String;

    /// Parses `z/x/y`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.len() != 3 {
            return Err(format!("expected z/x/y, got '{}'", s));
        }
        let parse = |v: &str, name: &str| {
            v.parse::<u32>()
                .map_err(|_| format!("invalid {} '{}' in tile '{}'", name, v, s))
        };
        Ok(Tile {
            z: parse(parts[0], "zoom")?,
            x: parse(parts[1], "x")?,
            y: parse(parts[2], "y")?,
        })
    }
}

// =============================================================================
// BoundingBox
// =============================================================================

/// Extent in projected CRS units, y pointing north.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

// =============================================================================
// Bounds
// =============================================================================

/// Axis-aligned rectangle in a pixel space, y pointing down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from two opposite corners in any order.
    pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        let (left, right) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
        let (top, bottom) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
        Self::new(left, top, right - left, bottom - top)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Overlap with `other`, or `None` when the overlap has no area.
    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if right - left <= PIXEL_EPSILON || bottom - top <= PIXEL_EPSILON {
            return None;
        }
        Some(Bounds::new(left, top, right - left, bottom - top))
    }

    /// Whether `other` lies inside `self`, up to [`PIXEL_EPSILON`].
    pub fn contains(&self, other: &Bounds) -> bool {
        other.x >= self.x - PIXEL_EPSILON
            && other.y >= self.y - PIXEL_EPSILON
            && other.right() <= self.right() + PIXEL_EPSILON
            && other.bottom() <= self.bottom() + PIXEL_EPSILON
    }
}

// =============================================================================
// PixelRect
// =============================================================================

/// Integer rectangle in a raster's local pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}
