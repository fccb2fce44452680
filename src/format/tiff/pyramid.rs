//! COG resolution levels.
//!
//! Every tiled IFD that is not a transparency mask is a resolution level.
//! Levels are sorted by width, largest first, so level 0 is full resolution
//! and carries the georeference; overview resolutions are derived from it.

use serde::Serialize;
use tracing::debug;

use crate::codec::CodecInfo;
use crate::error::TiffError;
use crate::geometry::PixelRect;
use crate::io::RangeReader;

use super::geo::{parse_gdal_nodata, parse_gdal_statistics, BandStatistics, GeoReference};
use super::parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::TiffTag;
use super::values::ValueReader;

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of IFDs to parse (safety limit)
const MAX_IFDS: usize = 100;

// =============================================================================
// ResolutionLevel
// =============================================================================

/// One resolution level of a raster asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionLevel {
    /// 0 = full resolution
    pub index: usize,

    /// Image width in pixels
    pub width: u32,

    /// Image height in pixels
    pub height: u32,

    pub tile_width: u32,
    pub tile_height: u32,

    /// Number of tiles in X direction
    pub tiles_x: u32,

    /// Number of tiles in Y direction
    pub tiles_y: u32,

    /// Model units per pixel, (x, y), both positive
    pub resolution: (f64, f64),

    pub codec: CodecInfo,
}

impl ResolutionLevel {
    pub fn new(
        index: usize,
        size: (u32, u32),
        tile_size: (u32, u32),
        resolution: (f64, f64),
        codec: CodecInfo,
    ) -> Self {
        let (width, height) = size;
        let (tile_width, tile_height) = tile_size;
        Self {
            index,
            width,
            height,
            tile_width,
            tile_height,
            tiles_x: width.div_ceil(tile_width.max(1)),
            tiles_y: height.div_ceil(tile_height.max(1)),
            resolution,
            codec,
        }
    }

    /// Total number of tiles.
    pub fn tile_count(&self) -> u32 {
        self.tiles_x * self.tiles_y
    }

    /// Get the tile index for a given tile coordinate.
    ///
    /// Returns None if the coordinates are out of bounds.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<u32> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        Some(tile_y * self.tiles_x + tile_x)
    }

    /// Pixel dimensions of a specific tile.
    ///
    /// Edge tiles may be smaller than tile_width/tile_height.
    pub fn tile_dimensions(&self, tile_x: u32, tile_y: u32) -> Option<(u32, u32)> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }

        let w = if tile_x == self.tiles_x - 1 {
            // Last column - may be partial
            let remainder = self.width % self.tile_width;
            if remainder == 0 {
                self.tile_width
            } else {
                remainder
            }
        } else {
            self.tile_width
        };

        let h = if tile_y == self.tiles_y - 1 {
            // Last row - may be partial
            let remainder = self.height % self.tile_height;
            if remainder == 0 {
                self.tile_height
            } else {
                remainder
            }
        } else {
            self.tile_height
        };

        Some((w, h))
    }

    /// Actual pixel rectangle of a tile within the level.
    pub fn tile_bounds(&self, tile_x: u32, tile_y: u32) -> Option<PixelRect> {
        let (w, h) = self.tile_dimensions(tile_x, tile_y)?;
        Some(PixelRect::new(
            tile_x * self.tile_width,
            tile_y * self.tile_height,
            w,
            h,
        ))
    }
}

// =============================================================================
// CogPyramid
// =============================================================================

/// Tile index entries of one level, read lazily.
#[derive(Debug, Clone)]
struct TileEntries {
    offsets: IfdEntry,
    byte_counts: IfdEntry,
}

/// A parsed COG: levels, georeference and GDAL metadata.
#[derive(Debug, Clone)]
pub struct CogPyramid {
    /// The TIFF header
    pub header: TiffHeader,

    /// Levels sorted by resolution (0 = highest)
    pub levels: Vec<ResolutionLevel>,

    /// Georeference of level 0
    pub geo: GeoReference,

    /// Band statistics from GDAL_METADATA
    pub statistics: Vec<BandStatistics>,

    entries: Vec<TileEntries>,
}

impl CogPyramid {
    /// Parse a COG's header, IFDs and georeference.
    pub async fn parse<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        // Read and parse header
        let header_len = BIGTIFF_HEADER_SIZE.min(reader.size() as usize);
        let header_bytes = reader.read_exact_at(0, header_len).await?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let ifds = Self::parse_all_ifds(reader, &header).await?;
        let values = ValueReader::new(reader, &header);
        let byte_order = header.byte_order;

        let mut candidates: Vec<(Ifd, ResolutionLevel, TileEntries)> = Vec::new();
        for (ifd_index, ifd) in ifds.into_iter().enumerate() {
            if ifd.is_mask(byte_order) {
                debug!(ifd_index, "Skipping mask IFD");
                continue;
            }
            if !ifd.is_tiled() {
                if ifd_index == 0 && ifd.get_entry_by_tag(TiffTag::StripOffsets).is_some() {
                    return Err(TiffError::StripOrganization);
                }
                debug!(ifd_index, "Skipping untiled IFD");
                continue;
            }

            let (level, entries) = Self::read_level(&values, &ifd).await?;
            candidates.push((ifd, level, entries));
        }

        if candidates.is_empty() {
            return Err(TiffError::NoLevels);
        }

        // Largest first = level 0
        candidates.sort_by(|a, b| b.1.width.cmp(&a.1.width));

        let base_ifd = &candidates[0].0;
        let geo = GeoReference::read(&values, base_ifd).await?;
        let statistics = match base_ifd.get_entry_by_tag(TiffTag::GdalMetadata) {
            Some(entry) => parse_gdal_statistics(&values.read_string(entry).await?),
            None => Vec::new(),
        };

        let base_width = candidates[0].1.width as f64;
        let base_height = candidates[0].1.height as f64;

        let mut levels = Vec::with_capacity(candidates.len());
        let mut entries = Vec::with_capacity(candidates.len());
        for (index, (_, mut level, tile_entries)) in candidates.into_iter().enumerate() {
            level.index = index;
            level.resolution = (
                geo.resolution_x * base_width / level.width as f64,
                geo.resolution_y * base_height / level.height as f64,
            );
            levels.push(level);
            entries.push(tile_entries);
        }

        debug!(
            identifier = reader.identifier(),
            levels = levels.len(),
            epsg = ?geo.epsg,
            "Parsed COG"
        );

        Ok(CogPyramid {
            header,
            levels,
            geo,
            statistics,
            entries,
        })
    }

    /// Parse all IFDs in the file following the next-IFD chain.
    async fn parse_all_ifds<R: RangeReader>(
        reader: &R,
        header: &TiffHeader,
    ) -> Result<Vec<Ifd>, TiffError> {
        let mut ifds = Vec::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && ifds.len() < MAX_IFDS {
            if offset >= reader.size() {
                return Err(TiffError::InvalidIfdOffset(offset));
            }

            // First, read just enough to get the entry count
            let count_size = header.ifd_count_size();
            let count_bytes = reader.read_exact_at(offset, count_size).await?;

            let entry_count = if header.is_bigtiff {
                header.byte_order.read_u64(&count_bytes)
            } else {
                header.byte_order.read_u16(&count_bytes) as u64
            };

            // Now read the full IFD
            let ifd_size = Ifd::calculate_size(entry_count, header);
            let ifd_bytes = reader.read_exact_at(offset, ifd_size).await?;
            let ifd = Ifd::parse(&ifd_bytes, header)?;

            offset = ifd.next_ifd_offset;
            ifds.push(ifd);
        }

        Ok(ifds)
    }

    /// Dimensions and codec metadata of one tiled IFD.
    async fn read_level<R: RangeReader>(
        values: &ValueReader<'_, R>,
        ifd: &Ifd,
    ) -> Result<(ResolutionLevel, TileEntries), TiffError> {
        let bo = values.byte_order();
        let width = ifd
            .image_width(bo)
            .ok_or(TiffError::MissingTag("ImageWidth"))?;
        let height = ifd
            .image_height(bo)
            .ok_or(TiffError::MissingTag("ImageLength"))?;
        let tile_width = ifd
            .tile_width(bo)
            .ok_or(TiffError::MissingTag("TileWidth"))?;
        let tile_height = ifd
            .tile_height(bo)
            .ok_or(TiffError::MissingTag("TileLength"))?;
        if tile_width == 0 || tile_height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: "TileWidth",
                message: format!("zero tile size {}x{}", tile_width, tile_height),
            });
        }

        let samples_per_pixel = ifd.get_u32(TiffTag::SamplesPerPixel, bo).unwrap_or(1) as u16;
        let planar = ifd.get_u32(TiffTag::PlanarConfiguration, bo).unwrap_or(1) as u16;
        if planar != 1 && samples_per_pixel > 1 {
            return Err(TiffError::UnsupportedPlanarConfiguration(planar));
        }

        let bits_per_sample = match ifd.get_entry_by_tag(TiffTag::BitsPerSample) {
            Some(entry) => values.read_first_u32(entry).await? as u16,
            None => 1,
        };
        let sample_format = match ifd.get_entry_by_tag(TiffTag::SampleFormat) {
            Some(entry) => values.read_first_u32(entry).await? as u16,
            None => 1,
        };
        let no_data = match ifd.get_entry_by_tag(TiffTag::GdalNodata) {
            Some(entry) => parse_gdal_nodata(&values.read_string(entry).await?),
            None => None,
        };
        let lerc_additional = match ifd.get_entry_by_tag(TiffTag::LercParameters) {
            Some(entry) => values
                .read_u32_array(entry)
                .await?
                .get(1)
                .copied()
                .unwrap_or(0),
            None => 0,
        };

        let codec = CodecInfo {
            compression: ifd.compression(bo),
            bits_per_sample,
            sample_format,
            samples_per_pixel,
            predictor: ifd.get_u32(TiffTag::Predictor, bo).unwrap_or(1) as u16,
            byte_order: bo,
            no_data,
            lerc_additional,
        };

        let entries = TileEntries {
            offsets: ifd
                .get_entry_by_tag(TiffTag::TileOffsets)
                .cloned()
                .ok_or(TiffError::MissingTag("TileOffsets"))?,
            byte_counts: ifd
                .get_entry_by_tag(TiffTag::TileByteCounts)
                .cloned()
                .ok_or(TiffError::MissingTag("TileByteCounts"))?,
        };

        let level = ResolutionLevel::new(
            0,
            (width, height),
            (tile_width, tile_height),
            (0.0, 0.0),
            codec,
        );
        Ok((level, entries))
    }

    /// Get the number of levels.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Byte order of the file.
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Read the tile offset and byte count arrays of a level.
    pub async fn load_tile_data<R: RangeReader>(
        &self,
        reader: &R,
        level: usize,
    ) -> Result<TileData, TiffError> {
        let entries = self.entries.get(level).ok_or(TiffError::InvalidTagValue {
            tag: "level",
            message: format!("level {} out of range (have {})", level, self.entries.len()),
        })?;
        let values = ValueReader::new(reader, &self.header);

        let offsets = values.read_u64_array(&entries.offsets).await?;
        let byte_counts = values.read_u64_array(&entries.byte_counts).await?;

        let expected = self.levels[level].tile_count() as usize;
        if offsets.len() < expected || byte_counts.len() < expected {
            return Err(TiffError::InvalidTagValue {
                tag: "TileOffsets",
                message: format!(
                    "level {} needs {} tiles, found {} offsets and {} byte counts",
                    level,
                    expected,
                    offsets.len(),
                    byte_counts.len()
                ),
            });
        }

        Ok(TileData {
            offsets,
            byte_counts,
        })
    }
}

// =============================================================================
// Tile Data Loading
// =============================================================================

/// Tile locations of one level.
#[derive(Debug, Clone, Default)]
pub struct TileData {
    /// Byte offset of each tile in the file
    pub offsets: Vec<u64>,

    /// Byte count (size) of each tile; 0 marks a sparse tile
    pub byte_counts: Vec<u64>,
}

impl TileData {
    /// Get offset and size for a specific tile.
    pub fn get_tile_location(&self, tile_index: u32) -> Option<(u64, u64)> {
        let idx = tile_index as usize;
        if idx >= self.offsets.len() || idx >= self.byte_counts.len() {
            return None;
        }
        Some((self.offsets[idx], self.byte_counts[idx]))
    }
}

// =============================================================================
// Tests
// =============================================================================
