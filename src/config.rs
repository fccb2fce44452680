//! Command-line configuration for `cog-tiler`.
//!
//! Every option can also be set through an environment variable with the
//! `COG_` prefix:
//!
//! - `COG_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `COG_S3_REGION` - AWS region (default: us-east-1)
//! - `COG_CACHE_ASSETS` - Max opened assets to cache (default: 100)
//! - `COG_CACHE_BLOCKS` - Max blocks cached per asset (default: 100)
//! - `COG_BLOCK_SIZE` - Block size in bytes (default: 256KB)
//! - `COG_TILE_MATRIX` - Tile matrix set (default: WebMercatorQuad)
//! - `COG_FORMAT` - Output format: png, jpeg, webp, avif (default: png)
//! - `COG_QUALITY` - Lossy quality 1-100 (default: 80)
//! - `COG_LOSSLESS` - Prefer lossless output
//! - `COG_PIPELINE` - terrain-rgb, color-ramp or ndvi
//! - `COG_PIPELINE_CONFIG` - JSON pipeline definition
//! - `COG_COLOR_RAMP` - GDAL color-relief text file
//! - `COG_BACKGROUND` - Canvas color `r,g,b,a` (default: 0,0,0,0)
//! - `COG_UPSCALE_KERNEL` / `COG_DOWNSCALE_KERNEL` - Resampling kernels
//! - `COG_CONCURRENCY` - Tiles decoded at once (default: 16)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::asset::DEFAULT_ASSET_CACHE_CAPACITY;
use crate::geometry::{Tile, TileGeometry, TileMatrix};
use crate::io::{DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};
use crate::pipeline::{ColorRamp, NdviOptions, Pipeline};
use crate::tile::{
    is_valid_quality, CompositorOptions, EncodeOptions, OutputFormat, RenderRequest,
    ResizeKernel, DEFAULT_DECODE_CONCURRENCY, DEFAULT_MAX_LAYER_DIMENSION, DEFAULT_QUALITY,
    MAX_QUALITY, MIN_QUALITY,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default tile matrix set.
pub const DEFAULT_TILE_MATRIX: &str = "WebMercatorQuad";

// =============================================================================
// CLI Arguments
// =============================================================================

/// cog-tiler - Render map tiles from Cloud-Optimized GeoTIFFs.
///
/// Sources are local paths or `s3://bucket/key` URIs; only the byte ranges
/// a tile needs are read.
#[derive(Parser, Debug, Clone)]
#[command(name = "cog-tiler")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false, env = "COG_VERBOSE")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Render one tile to a file.
    Render(RenderConfig),

    /// Render every tile of a zoom level that covers the sources.
    Batch(BatchConfig),

    /// Print an asset's levels, codec metadata and bounds as JSON.
    Info(InfoConfig),
}

// =============================================================================
// Storage
// =============================================================================

/// Where assets come from and how much of them is cached.
#[derive(Args, Debug, Clone)]
pub struct StorageConfig {
    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "COG_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "COG_S3_REGION")]
    pub s3_region: String,

    /// Maximum number of opened assets to keep in cache.
    #[arg(long, default_value_t = DEFAULT_ASSET_CACHE_CAPACITY, env = "COG_CACHE_ASSETS")]
    pub cache_assets: usize,

    /// Maximum number of blocks to cache per asset.
    #[arg(long, default_value_t = DEFAULT_BLOCK_CACHE_CAPACITY, env = "COG_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    /// Block size in bytes for the block cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "COG_BLOCK_SIZE")]
    pub block_size: usize,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_assets == 0 {
            return Err("cache_assets must be greater than 0".to_string());
        }
        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }
        if self.block_size < 1024 || self.block_size > 16 * 1024 * 1024 {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }
        if let Some(endpoint) = &self.s3_endpoint {
            if endpoint.trim().is_empty() {
                return Err("s3_endpoint must not be empty".to_string());
            }
        }
        Ok(())
    }
}

// =============================================================================
// Output
// =============================================================================

/// Pipeline selected by name.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    TerrainRgb,
    ColorRamp,
    Ndvi,
}

impl PipelineKind {
    fn name(self) -> &'static str {
        match self {
            PipelineKind::TerrainRgb => "terrain-rgb",
            PipelineKind::ColorRamp => "color-ramp",
            PipelineKind::Ndvi => "ndvi",
        }
    }
}

/// How tiles are rendered and encoded.
#[derive(Args, Debug, Clone)]
pub struct OutputConfig {
    /// Tile matrix set (WebMercatorQuad or WorldCRS84Quad).
    #[arg(long, default_value = DEFAULT_TILE_MATRIX, env = "COG_TILE_MATRIX")]
    pub tile_matrix: String,

    /// Output format: png, jpeg (jpg), webp or avif.
    #[arg(short, long, default_value = "png", env = "COG_FORMAT")]
    pub format: OutputFormat,

    /// Quality for lossy formats (1-100).
    #[arg(long, default_value_t = DEFAULT_QUALITY, env = "COG_QUALITY")]
    pub quality: u8,

    /// Prefer lossless output where the format has a choice.
    #[arg(long, default_value_t = false, env = "COG_LOSSLESS")]
    pub lossless: bool,

    /// Pixel pipeline applied to every decoded tile.
    #[arg(long, value_enum, env = "COG_PIPELINE")]
    pub pipeline: Option<PipelineKind>,

    /// JSON pipeline definition, e.g. {"type":"ndvi","red":0,"nir":3}.
    #[arg(long, env = "COG_PIPELINE_CONFIG")]
    pub pipeline_config: Option<PathBuf>,

    /// GDAL color-relief file for the color-ramp pipeline.
    #[arg(long, env = "COG_COLOR_RAMP")]
    pub color_ramp: Option<PathBuf>,

    /// Canvas color as r,g,b,a.
    #[arg(long, default_value = "0,0,0,0", value_parser = parse_rgba, env = "COG_BACKGROUND")]
    pub background: [u8; 4],

    /// Kernel used when a source is enlarged.
    #[arg(long, default_value_t = ResizeKernel::Bilinear, env = "COG_UPSCALE_KERNEL")]
    pub upscale_kernel: ResizeKernel,

    /// Kernel used when a source is reduced.
    #[arg(long, default_value_t = ResizeKernel::Lanczos3, env = "COG_DOWNSCALE_KERNEL")]
    pub downscale_kernel: ResizeKernel,

    /// Maximum number of source tiles fetched and decoded at once.
    #[arg(long, default_value_t = DEFAULT_DECODE_CONCURRENCY, env = "COG_CONCURRENCY")]
    pub concurrency: usize,
}

impl OutputConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_quality(self.quality) {
            return Err(format!(
                "quality must be between {} and {}",
                MIN_QUALITY, MAX_QUALITY
            ));
        }
        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".to_string());
        }
        if TileMatrix::from_name(&self.tile_matrix).is_none() {
            return Err(format!(
                "unknown tile matrix '{}' (expected WebMercatorQuad or WorldCRS84Quad)",
                self.tile_matrix
            ));
        }
        if self.pipeline == Some(PipelineKind::ColorRamp)
            && self.color_ramp.is_none()
            && self.pipeline_config.is_none()
        {
            return Err(
                "the color-ramp pipeline needs --color-ramp or --pipeline-config".to_string(),
            );
        }
        if self.color_ramp.is_some()
            && self.pipeline.is_some()
            && self.pipeline != Some(PipelineKind::ColorRamp)
        {
            return Err("--color-ramp only applies to the color-ramp pipeline".to_string());
        }
        Ok(())
    }

    /// The configured tile matrix (call `validate()` first).
    pub fn tile_matrix(&self) -> Result<TileMatrix, String> {
        TileMatrix::from_name(&self.tile_matrix)
            .ok_or_else(|| format!("unknown tile matrix '{}'", self.tile_matrix))
    }

    /// Load the pipeline from `--pipeline-config`, `--pipeline` and `--color-ramp`.
    pub fn load_pipeline(&self) -> Result<Option<Pipeline>, String> {
        if let Some(path) = &self.pipeline_config {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            let pipeline: Pipeline = serde_json::from_str(&text)
                .map_err(|e| format!("invalid pipeline in {}: {}", path.display(), e))?;
            if let Some(kind) = self.pipeline {
                if kind.name() != pipeline.name() {
                    return Err(format!(
                        "--pipeline {} does not match '{}' in {}",
                        kind.name(),
                        pipeline.name(),
                        path.display()
                    ));
                }
            }
            return Ok(Some(pipeline));
        }

        let Some(kind) = self.pipeline else {
            if self.color_ramp.is_some() {
                return self.load_color_ramp().map(Some);
            }
            return Ok(None);
        };
        match kind {
            PipelineKind::TerrainRgb => Ok(Some(Pipeline::TerrainRgb)),
            PipelineKind::Ndvi => Ok(Some(Pipeline::Ndvi(NdviOptions::default()))),
            PipelineKind::ColorRamp => self.load_color_ramp().map(Some),
        }
    }

    fn load_color_ramp(&self) -> Result<Pipeline, String> {
        let path = self
            .color_ramp
            .as_ref()
            .ok_or_else(|| "the color-ramp pipeline needs --color-ramp".to_string())?;
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        let ramp = ColorRamp::parse(&text).map_err(|e| format!("{}: {}", path.display(), e))?;
        Ok(Pipeline::ColorRamp { ramp })
    }

    /// Everything the renderer needs besides sources and tile.
    pub fn render_request(&self) -> Result<RenderRequest, String> {
        let mut request = RenderRequest::new(self.format)
            .with_encode(EncodeOptions {
                quality: self.quality,
                lossless: self.lossless,
            })
            .with_compositor(CompositorOptions {
                background: self.background,
                upscale: self.upscale_kernel,
                downscale: self.downscale_kernel,
                max_layer_dimension: DEFAULT_MAX_LAYER_DIMENSION,
            });
        if let Some(pipeline) = self.load_pipeline()? {
            request = request.with_pipeline(pipeline);
        }
        Ok(request)
    }
}

/// Parse `r,g,b,a` (alpha optional, defaults to 255).
pub fn parse_rgba(s: &str) -> Result<[u8; 4], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 && parts.len() != 4 {
        return Err(format!("expected r,g,b[,a], got '{}'", s));
    }
    let mut rgba = [0, 0, 0, 255];
    for (slot, part) in rgba.iter_mut().zip(&parts) {
        *slot = part
            .parse::<u8>()
            .map_err(|_| format!("color component '{}' is not 0-255", part))?;
    }
    Ok(rgba)
}

// =============================================================================
// Subcommands
// =============================================================================

/// Configuration for the `render` command.
#[derive(Args, Debug, Clone)]
pub struct RenderConfig {
    /// Source assets, bottom to top (local paths or s3://bucket/key).
    #[arg(required = true, num_args = 1..)]
    pub sources: Vec<String>,

    /// Tile to render as z/x/y.
    #[arg(short, long)]
    pub tile: Tile,

    /// Output file.
    #[arg(short, long)]
    pub output: PathBuf,

    #[command(flatten)]
    pub storage: StorageConfig,

    #[command(flatten)]
    pub render: OutputConfig,
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.render.validate()?;
        let matrix = self.render.tile_matrix()?;
        let (cols, rows) = matrix.matrix_size(self.tile.z);
        if self.tile.x >= cols || self.tile.y >= rows {
            return Err(format!(
                "tile {} is outside the {}x{} matrix at zoom {}",
                self.tile, cols, rows, self.tile.z
            ));
        }
        Ok(())
    }
}

/// Configuration for the `batch` command.
#[derive(Args, Debug, Clone)]
pub struct BatchConfig {
    /// Source assets, bottom to top (local paths or s3://bucket/key).
    #[arg(required = true, num_args = 1..)]
    pub sources: Vec<String>,

    /// Zoom level to render.
    #[arg(short, long)]
    pub zoom: u32,

    /// Output directory; tiles are written as <dir>/<z>/<x>/<y>.<ext>.
    #[arg(short, long)]
    pub out_dir: PathBuf,

    #[command(flatten)]
    pub storage: StorageConfig,

    #[command(flatten)]
    pub render: OutputConfig,
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.render.validate()?;
        if self.zoom > 30 {
            return Err("zoom must be at most 30".to_string());
        }
        Ok(())
    }

    /// Path of a rendered tile.
    pub fn tile_path(&self, tile: Tile) -> PathBuf {
        self.out_dir
            .join(tile.z.to_string())
            .join(tile.x.to_string())
            .join(format!("{}.{}", tile.y, self.render.format.extension()))
    }
}

/// Configuration for the `info` command.
#[derive(Args, Debug, Clone)]
pub struct InfoConfig {
    /// Asset to describe (local path or s3://bucket/key).
    pub source: String,

    #[command(flatten)]
    pub storage: StorageConfig,
}

impl InfoConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
