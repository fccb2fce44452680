//! # cog-tiler
//!
//! Renders map tiles from Cloud-Optimized GeoTIFFs stored in S3-compatible
//! object storage or on local disk.
//!
//! Only the bytes a tile needs are read: the IFDs once per asset, then one
//! range read per overlapping internal tile. Tiles are decoded (LZW, ZSTD or
//! LERC, with TIFF predictors undone), optionally run through a pixel
//! pipeline, and composited into one output image.
//!
//! ## Architecture
//!
//! - [`io`] - range readers for S3 and local files, block caching
//! - [`mod@format`] - TIFF/BigTIFF parsing and COG pyramids
//! - [`asset`] - the [`RasterAsset`] abstraction and asset registry
//! - [`geometry`] - tiles, bounds and tile matrices
//! - [`tiler`] - intersection and per-source-tile composition planning
//! - [`codec`] - tile decompression and sample decoding
//! - [`pipeline`] - terrain-RGB, color ramp and NDVI transforms
//! - [`tile`] - compositing, encoding and the [`TileRenderer`]
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cog_tiler::{
//!     AssetRegistry, OutputFormat, RasterAsset, RenderRequest, Tile, TileMatrix, TileRenderer,
//!     UriAssetSource,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = AssetRegistry::new(UriAssetSource::local_only());
//!     let dem: Arc<dyn RasterAsset> = registry.get_raster("dem.tif").await?;
//!
//!     let renderer = TileRenderer::new(Arc::new(TileMatrix::web_mercator_quad()), 16);
//!     let request = RenderRequest::new(OutputFormat::Png);
//!     let image = renderer.render_tile(&[dem], Tile::new(4, 5, 4), &request).await?;
//!     std::fs::write("tile.png", &image.bytes)?;
//!     Ok(())
//! }
//! ```

pub mod asset;
pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod geometry;
pub mod io;
pub mod pipeline;
pub mod raster;
pub mod tile;
pub mod tiler;

// Re-export commonly used types
pub use asset::{
    AssetReader, AssetRegistry, AssetSource, AssetSummary, CogAsset, RasterAsset, UriAssetSource,
};
pub use codec::{Codec, CodecInfo, DecodeContext};
pub use config::{BatchConfig, Cli, Command, InfoConfig, OutputConfig, RenderConfig, StorageConfig};
pub use error::{FormatError, IoError, TiffError, TileError};
pub use format::tiff::{BandStatistics, CogPyramid, ResolutionLevel};
pub use geometry::{BoundingBox, Bounds, PixelRect, Tile, TileGeometry, TileMatrix};
pub use io::{create_s3_client, BlockCache, LocalRangeReader, RangeReader, S3RangeReader};
pub use pipeline::{ColorRamp, NdviOptions, Pipeline, PipelineContext};
pub use raster::{Pixels, RawBuffer, SampleDepth};
pub use tile::{
    compose, CompositorOptions, EncodeOptions, Layer, OutputFormat, OutputImage, RenderRequest,
    ResizeKernel, TileRenderer,
};
pub use tiler::{intersect, Composition, Intersection};
