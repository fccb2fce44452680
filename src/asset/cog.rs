//! Cloud-Optimized GeoTIFF asset.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{FormatError, TileError};
use crate::format::detect_tiff;
use crate::format::tiff::{BandStatistics, CogPyramid, ResolutionLevel, TileData};
use crate::geometry::BoundingBox;
use crate::io::RangeReader;

use super::RasterAsset;

/// A COG opened over any [`RangeReader`].
///
/// Opening reads the header, every IFD and the tile offset/byte-count arrays
/// of every level; after that each tile fetch is exactly one range read.
pub struct CogAsset<R> {
    reader: R,
    pyramid: CogPyramid,
    tile_data: Vec<TileData>,
    bounds: BoundingBox,
}

impl<R: RangeReader> CogAsset<R> {
    /// Open a COG, reading all metadata up front.
    pub async fn open(reader: R) -> Result<Self, FormatError> {
        detect_tiff(&reader).await?;
        let pyramid = CogPyramid::parse(&reader).await?;

        let mut tile_data = Vec::with_capacity(pyramid.level_count());
        for level in 0..pyramid.level_count() {
            tile_data.push(pyramid.load_tile_data(&reader, level).await?);
        }

        let base = &pyramid.levels[0];
        let bounds = pyramid.geo.bounds(base.width, base.height);

        debug!(
            asset = reader.identifier(),
            levels = pyramid.level_count(),
            width = base.width,
            height = base.height,
            compression = base.codec.compression,
            "Opened COG"
        );

        Ok(Self {
            reader,
            pyramid,
            tile_data,
            bounds,
        })
    }

    pub fn pyramid(&self) -> &CogPyramid {
        &self.pyramid
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }
}

#[async_trait]
impl<R: RangeReader> RasterAsset for CogAsset<R> {
    fn id(&self) -> &str {
        self.reader.identifier()
    }

    fn epsg(&self) -> Option<u32> {
        self.pyramid.geo.epsg
    }

    fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    fn levels(&self) -> &[ResolutionLevel] {
        &self.pyramid.levels
    }

    fn band_statistics(&self) -> &[BandStatistics] {
        &self.pyramid.statistics
    }

    async fn fetch_tile(
        &self,
        level: usize,
        x: u32,
        y: u32,
    ) -> Result<Option<Bytes>, TileError> {
        let info = self.pyramid.levels.get(level).ok_or_else(|| {
            TileError::Asset(format!("{}: level {} out of range", self.id(), level))
        })?;
        let index = info.tile_index(x, y).ok_or_else(|| {
            TileError::Asset(format!(
                "{}: tile ({}, {}) outside {}x{} grid of level {}",
                self.id(),
                x,
                y,
                info.tiles_x,
                info.tiles_y,
                level
            ))
        })?;

        let (offset, size) = self
            .tile_data
            .get(level)
            .and_then(|data| data.get_tile_location(index))
            .ok_or_else(|| {
                TileError::Asset(format!("{}: no tile entry {} at level {}", self.id(), index, level))
            })?;

        if size == 0 {
            debug!(asset = self.id(), level, x, y, "Sparse tile");
            return Ok(None);
        }

        let bytes = self.reader.read_exact_at(offset, size as usize).await?;
        Ok(Some(bytes))
    }
}
