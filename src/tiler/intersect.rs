//! Overlap between an asset and a destination tile.

use serde::Serialize;
use tracing::{debug, warn};

use crate::asset::RasterAsset;
use crate::format::tiff::ResolutionLevel;
use crate::geometry::{Bounds, Tile, TileGeometry};

/// Resolutions within this factor of the target count as "not coarser".
const LEVEL_TOLERANCE: f64 = 1.01;

/// Where an asset and a destination tile overlap, in the destination zoom's
/// global pixel space.
///
/// `overlap_bounds` lies inside both `asset_pixel_bounds` and
/// `dest_tile_pixel_bounds`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Intersection {
    pub tile: Tile,
    /// Index of the chosen resolution level
    pub level: usize,
    /// Destination pixels per level pixel, per axis
    pub scale: (f64, f64),
    pub asset_pixel_bounds: Bounds,
    pub overlap_bounds: Bounds,
    pub dest_tile_pixel_bounds: Bounds,
}

impl Intersection {
    /// Destination pixel position of the asset's top-left corner.
    pub fn origin(&self) -> (f64, f64) {
        (self.asset_pixel_bounds.x, self.asset_pixel_bounds.y)
    }
}

/// Pick the level to read for a target resolution (CRS units per pixel).
///
/// The coarsest level that is not coarser than the target wins; among
/// levels of equal resolution the higher-resolution (lower index) one is
/// kept. When every level is coarser, level 0 is used and upsampled.
pub fn select_level(levels: &[ResolutionLevel], target_resolution: f64) -> usize {
    let limit = target_resolution * LEVEL_TOLERANCE;
    let mut best: Option<(usize, f64)> = None;

    for level in levels {
        let resolution = level.resolution.0;
        if resolution > limit {
            continue;
        }
        match best {
            Some((_, best_resolution)) if resolution <= best_resolution => {}
            _ => best = Some((level.index, resolution)),
        }
    }

    best.map(|(index, _)| index).unwrap_or(0)
}

/// Intersect `asset` with `tile`.
///
/// Returns `None` when the asset does not overlap the tile, has no levels,
/// or declares a CRS other than the tile matrix's.
pub fn intersect(
    asset: &dyn RasterAsset,
    geometry: &dyn TileGeometry,
    tile: Tile,
) -> Option<Intersection> {
    if let Some(epsg) = asset.epsg() {
        if epsg != geometry.epsg() {
            warn!(
                asset = asset.id(),
                asset_epsg = epsg,
                matrix_epsg = geometry.epsg(),
                "Skipping asset in a different CRS"
            );
            return None;
        }
    }

    let levels = asset.levels();
    if levels.is_empty() {
        return None;
    }

    let target = geometry.pixel_scale(tile.z);
    let level = select_level(levels, target);
    let chosen = &levels[level];

    let asset_pixel_bounds = geometry.bbox_to_pixel_bounds(&asset.bounds(), tile.z);
    let dest_tile_pixel_bounds = geometry.tile_to_pixel_bounds(tile);
    let overlap_bounds = asset_pixel_bounds.intersection(&dest_tile_pixel_bounds)?;

    let scale = (
        asset_pixel_bounds.width / chosen.width as f64,
        asset_pixel_bounds.height / chosen.height as f64,
    );

    debug!(
        asset = asset.id(),
        %tile,
        level,
        scale_x = scale.0,
        scale_y = scale.1,
        "Asset intersects tile"
    );

    Some(Intersection {
        tile,
        level,
        scale,
        asset_pixel_bounds,
        overlap_bounds,
        dest_tile_pixel_bounds,
    })
}
