//! Raster assets.
//!
//! The renderer only sees [`RasterAsset`]: resolution levels with their tile
//! grids and codec metadata, georeferenced bounds and a per-tile byte fetch.
//! Assets are opened once, cached in an [`AssetRegistry`] and shared
//! read-only between concurrent renders.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              TileRenderer               │
//! └────────────────────┬────────────────────┘
//!                      │ Arc<dyn RasterAsset>
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │             AssetRegistry               │
//! │   (LRU of opened assets, singleflight)  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │   CogAsset<BlockCache<AssetReader>>     │
//! └─────────────────────────────────────────┘
//! ```

mod cog;
mod registry;
mod source;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::error::TileError;
use crate::format::tiff::{BandStatistics, ResolutionLevel};
use crate::geometry::BoundingBox;

pub use cog::CogAsset;
pub use registry::{AssetRegistry, DEFAULT_ASSET_CACHE_CAPACITY};
pub use source::{AssetReader, AssetSource, UriAssetSource};

/// A geo-referenced, internally tiled, multi-resolution raster.
#[async_trait]
pub trait RasterAsset: Send + Sync {
    /// Identifier used in logs and cache keys.
    fn id(&self) -> &str;

    /// EPSG code of the raster's CRS, when the GeoKeys declare one.
    fn epsg(&self) -> Option<u32>;

    /// Extent in the raster's CRS.
    fn bounds(&self) -> BoundingBox;

    /// Resolution levels, full resolution first.
    fn levels(&self) -> &[ResolutionLevel];

    /// Per-band statistics from the file metadata.
    fn band_statistics(&self) -> &[BandStatistics];

    /// No-data value of the full resolution level.
    fn no_data(&self) -> Option<f64> {
        self.levels().first().and_then(|level| level.codec.no_data)
    }

    /// Compressed bytes of one internal tile.
    ///
    /// `Ok(None)` means the tile is sparse (never written).
    async fn fetch_tile(&self, level: usize, x: u32, y: u32)
        -> Result<Option<Bytes>, TileError>;
}

/// Serializable description of an asset, printed by `cog-tiler info`.
#[derive(Debug, Clone, Serialize)]
pub struct AssetSummary {
    pub id: String,
    pub epsg: Option<u32>,
    pub bounds: BoundingBox,
    pub no_data: Option<f64>,
    pub levels: Vec<ResolutionLevel>,
    pub statistics: Vec<BandStatistics>,
}

impl AssetSummary {
    pub fn of(asset: &dyn RasterAsset) -> Self {
        Self {
            id: asset.id().to_string(),
            epsg: asset.epsg(),
            bounds: asset.bounds(),
            no_data: asset.no_data(),
            levels: asset.levels().to_vec(),
            statistics: asset.band_statistics().to_vec(),
        }
    }
}
