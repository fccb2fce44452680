//! TIFF and GeoTIFF parsing for Cloud-Optimized GeoTIFFs.
//!
//! A COG is an ordinary tiled TIFF or BigTIFF whose first IFD holds the full
//! resolution image and whose following IFDs hold overviews (and optionally
//! transparency masks). Only the header, the IFD chain and the tile
//! offset/byte-count arrays are read up front; tile bytes are fetched on
//! demand with range reads.
//!
//! # Key Concepts
//!
//! - **Byte order**: declared in the header (II = little-endian, MM = big-endian);
//!   it applies to IFD values and to uncompressed sample bytes alike.
//!
//! - **Classic TIFF vs BigTIFF**: 32-bit vs 64-bit offsets, handled transparently.
//!
//! - **Georeference**: GeoTIFF tags on the full resolution IFD give the
//!   pixel-to-model transform and the EPSG code of the raster.

mod geo;
mod parser;
mod pyramid;
mod tags;
mod values;

pub use geo::{
    parse_epsg, parse_gdal_nodata, parse_gdal_statistics, BandStatistics, GeoReference,
};
pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use pyramid::{CogPyramid, ResolutionLevel, TileData};
pub use tags::{Compression, FieldType, SampleFormat, TiffTag};
pub use values::ValueReader;

#[cfg(test)]
pub(crate) use pyramid::tests::{write_tiff, Entry};
