use super::{BoundingBox, Bounds, Tile, PIXEL_EPSILON};

/// Half the circumference of the WebMercator sphere, in meters.
const WEB_MERCATOR_HALF_EXTENT: f64 = 20_037_508.342_789_244;

/// Tile-matrix contract used by the renderer.
///
/// Every zoom level maps projected coordinates onto one global pixel grid;
/// tiles are `tile_size` squares of that grid.
pub trait TileGeometry: Send + Sync {
    /// Tile matrix set name, e.g. `WebMercatorQuad`.
    fn identifier(&self) -> &str;

    /// EPSG code of the projected CRS.
    fn epsg(&self) -> u32;

    /// Tile edge length in pixels.
    fn tile_size(&self) -> u32;

    /// CRS units per pixel at zoom `z`.
    fn pixel_scale(&self, z: u32) -> f64;

    /// Number of tiles across and down at zoom `z`.
    fn matrix_size(&self, z: u32) -> (u32, u32);

    /// Projected coordinate to global pixel coordinate at zoom `z`.
    fn source_to_pixels(&self, x: f64, y: f64, z: u32) -> (f64, f64);

    /// Global pixel bounds covered by `tile`.
    fn tile_to_pixel_bounds(&self, tile: Tile) -> Bounds {
        let size = self.tile_size() as f64;
        Bounds::new(tile.x as f64 * size, tile.y as f64 * size, size, size)
    }

    /// Global pixel bounds of a projected extent at zoom `z`.
    fn bbox_to_pixel_bounds(&self, bbox: &BoundingBox, z: u32) -> Bounds {
        let (x0, y0) = self.source_to_pixels(bbox.min_x, bbox.max_y, z);
        let (x1, y1) = self.source_to_pixels(bbox.max_x, bbox.min_y, z);
        Bounds::from_corners(x0, y0, x1, y1)
    }

    /// Every tile at zoom `z` that overlaps `bbox`, row by row.
    fn tiles_covering(&self, bbox: &BoundingBox, z: u32) -> Vec<Tile> {
        let pixels = self.bbox_to_pixel_bounds(bbox, z);
        let size = self.tile_size() as f64;
        let (cols, rows) = self.matrix_size(z);

        let clamp = |v: f64, max: u32| v.max(0.0).min(max as f64) as u32;
        let x0 = clamp(((pixels.x + PIXEL_EPSILON) / size).floor(), cols);
        let y0 = clamp(((pixels.y + PIXEL_EPSILON) / size).floor(), rows);
        let x1 = clamp(((pixels.right() - PIXEL_EPSILON) / size).ceil(), cols);
        let y1 = clamp(((pixels.bottom() - PIXEL_EPSILON) / size).ceil(), rows);

        (y0..y1)
            .flat_map(|y| (x0..x1).map(move |x| Tile::new(x, y, z)))
            .collect()
    }
}

/// A regular quad-tree tile matrix set: the pixel scale halves at every
/// zoom and the matrix doubles in both directions.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMatrix {
    identifier: String,
    epsg: u32,
    origin_x: f64,
    origin_y: f64,
    base_scale: f64,
    tile_size: u32,
    base_matrix: (u32, u32),
}

impl TileMatrix {
    pub fn new(
        identifier: impl Into<String>,
        epsg: u32,
        origin: (f64, f64),
        base_scale: f64,
        tile_size: u32,
        base_matrix: (u32, u32),
    ) -> Self {
        Self {
            identifier: identifier.into(),
            epsg,
            origin_x: origin.0,
            origin_y: origin.1,
            base_scale,
            tile_size,
            base_matrix,
        }
    }

    /// OGC WebMercatorQuad (EPSG:3857, 256px tiles, one tile at zoom 0).
    pub fn web_mercator_quad() -> Self {
        Self::new(
            "WebMercatorQuad",
            3857,
            (-WEB_MERCATOR_HALF_EXTENT, WEB_MERCATOR_HALF_EXTENT),
            2.0 * WEB_MERCATOR_HALF_EXTENT / 256.0,
            256,
            (1, 1),
        )
    }

    /// OGC WorldCRS84Quad (EPSG:4326, two tiles at zoom 0).
    pub fn world_crs84_quad() -> Self {
        Self::new("WorldCRS84Quad", 4326, (-180.0, 90.0), 180.0 / 256.0, 256, (2, 1))
    }

    /// Look up a built-in tile matrix set by name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "webmercatorquad" | "epsg:3857" | "3857" => Some(Self::web_mercator_quad()),
            "worldcrs84quad" | "epsg:4326" | "4326" => Some(Self::world_crs84_quad()),
            _ => None,
        }
    }
}

impl TileGeometry for TileMatrix {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn epsg(&self) -> u32 {
        self.epsg
    }

    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn pixel_scale(&self, z: u32) -> f64 {
        self.base_scale / 2f64.powi(z as i32)
    }

    fn matrix_size(&self, z: u32) -> (u32, u32) {
        let factor = 1u32.checked_shl(z).unwrap_or(u32::MAX);
        (
            self.base_matrix.0.saturating_mul(factor),
            self.base_matrix.1.saturating_mul(factor),
        )
    }

    fn source_to_pixels(&self, x: f64, y: f64, z: u32) -> (f64, f64) {
        let scale = self.pixel_scale(z);
        ((x - self.origin_x) / scale, (self.origin_y - y) / scale)
    }
}
