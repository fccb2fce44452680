//! Tile rendering.
//!
//! [`TileRenderer::render_tile`] is the single entry point the CLI calls:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        render_tile()                             │
//! │  1. intersect every source     4. pipeline (blocking pool)       │
//! │  2. plan compositions          5. join all layers, sort z-order  │
//! │  3. fetch + decode per layer   6. composite + encode (blocking)  │
//! └──────────────────────────────────────────────────────────────────┘
//!            │                           │
//!            ▼                           ▼
//!     ┌──────────────┐          ┌──────────────────┐
//!     │ TileGeometry │          │ decode Semaphore │
//!     └──────────────┘          └──────────────────┘
//! ```
//!
//! Per-layer work runs in a [`JoinSet`] that is fully joined before
//! compositing. The first fatal error aborts the remaining tasks. The decode
//! semaphore is shared by every render of the renderer, so batch renders are
//! capped by the same limit.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::asset::RasterAsset;
use crate::codec::{Codec, DecodeContext};
use crate::error::TileError;
use crate::geometry::{Tile, TileGeometry};
use crate::pipeline::{Pipeline, PipelineContext};
use crate::raster::RawBuffer;
use crate::tiler::{compositions, intersect, Composition};

use super::compositor::{compose, CompositorOptions, Layer};
use super::encoder::{EncodeOptions, OutputFormat, OutputImage};

/// Default number of tiles decoded at once.
pub const DEFAULT_DECODE_CONCURRENCY: usize = 16;

// =============================================================================
// RenderRequest
// =============================================================================

/// Everything about a render except the sources and the tile.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub format: OutputFormat,
    pub encode: EncodeOptions,
    pub compositor: CompositorOptions,
    pub pipeline: Option<Arc<Pipeline>>,
}

impl RenderRequest {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            encode: EncodeOptions::default(),
            compositor: CompositorOptions::default(),
            pipeline: None,
        }
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(Arc::new(pipeline));
        self
    }

    pub fn with_compositor(mut self, compositor: CompositorOptions) -> Self {
        self.compositor = compositor;
        self
    }

    pub fn with_encode(mut self, encode: EncodeOptions) -> Self {
        self.encode = encode;
        self
    }
}

// =============================================================================
// TileRenderer
// =============================================================================

/// Z-order of a layer: source position, then composition position.
type LayerKey = (usize, usize);

/// Renders destination tiles from raster assets.
pub struct TileRenderer {
    geometry: Arc<dyn TileGeometry>,
    limiter: Arc<Semaphore>,
    concurrency: usize,
}

impl TileRenderer {
    /// Renderer allowing `decode_concurrency` tiles to be fetched and decoded at once.
    pub fn new(geometry: Arc<dyn TileGeometry>, decode_concurrency: usize) -> Self {
        let concurrency = decode_concurrency.max(1);
        Self {
            geometry,
            limiter: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn geometry(&self) -> &Arc<dyn TileGeometry> {
        &self.geometry
    }

    /// Render one tile.
    ///
    /// `sources` are drawn bottom to top in the order given. A tile no source
    /// overlaps is a background-only image, not an error.
    pub async fn render_tile(
        &self,
        sources: &[Arc<dyn RasterAsset>],
        tile: Tile,
        request: &RenderRequest,
    ) -> Result<OutputImage, TileError> {
        let mut tasks: JoinSet<Result<Option<(LayerKey, Layer)>, TileError>> = JoinSet::new();

        for (source_index, asset) in sources.iter().enumerate() {
            let Some(hit) = intersect(asset.as_ref(), self.geometry.as_ref(), tile) else {
                continue;
            };
            let level = &asset.levels()[hit.level];
            let planned = compositions(level, &hit);
            debug!(
                asset = asset.id(),
                %tile,
                level = hit.level,
                layers = planned.len(),
                "Planned compositions"
            );

            let ctx = Arc::new(PipelineContext::new(
                level.codec.no_data,
                asset.band_statistics().to_vec(),
            ));
            for (order, composition) in planned.into_iter().enumerate() {
                tasks.spawn(load_layer(
                    Arc::clone(asset),
                    composition,
                    request.pipeline.clone(),
                    Arc::clone(&ctx),
                    Arc::clone(&self.limiter),
                    (source_index, order),
                ));
            }
        }

        let mut layers = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(layer))) => layers.push(layer),
                Ok(Ok(None)) => {}
                Ok(Err(err)) => {
                    tasks.abort_all();
                    return Err(err);
                }
                Err(err) => {
                    tasks.abort_all();
                    return Err(TileError::TaskFailed(err.to_string()));
                }
            }
        }
        layers.sort_by_key(|(key, _)| *key);
        let layers: Vec<Layer> = layers.into_iter().map(|(_, layer)| layer).collect();

        let size = self.geometry.tile_size();
        let format = request.format;
        let compositor = request.compositor;
        let encode = request.encode;
        tokio::task::spawn_blocking(move || {
            compose(&layers, (size, size), format, &compositor, &encode)
        })
        .await
        .map_err(|e| TileError::TaskFailed(e.to_string()))?
    }

    /// Render many tiles concurrently.
    ///
    /// At most `decode_concurrency` tiles are in flight; results come back in
    /// the order of `tiles`.
    pub async fn render_batch(
        self: &Arc<Self>,
        sources: Arc<[Arc<dyn RasterAsset>]>,
        tiles: Vec<Tile>,
        request: RenderRequest,
    ) -> Vec<(Tile, Result<OutputImage, TileError>)> {
        let request = Arc::new(request);
        let mut slots: Vec<Option<Result<OutputImage, TileError>>> = Vec::new();
        slots.resize_with(tiles.len(), || None);
        let mut tasks = JoinSet::new();

        for (index, tile) in tiles.iter().copied().enumerate() {
            while tasks.len() >= self.concurrency {
                if let Some(done) = tasks.join_next().await {
                    store_batch_result(&mut slots, done);
                }
            }
            let renderer = Arc::clone(self);
            let sources = Arc::clone(&sources);
            let request = Arc::clone(&request);
            tasks.spawn(async move {
                let result = renderer.render_tile(&sources, tile, &request).await;
                (index, result)
            });
        }
        while let Some(done) = tasks.join_next().await {
            store_batch_result(&mut slots, done);
        }

        let results: Vec<_> = tiles
            .into_iter()
            .zip(slots)
            .map(|(tile, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(TileError::TaskFailed(format!("render of {} panicked", tile)))
                });
                (tile, result)
            })
            .collect();

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        info!(tiles = results.len(), failed, "Batch rendered");
        results
    }

    /// Tiles at zoom `z` covering any of `sources`, deduplicated and sorted.
    pub fn tiles_covering(&self, sources: &[Arc<dyn RasterAsset>], z: u32) -> Vec<Tile> {
        let mut tiles: Vec<Tile> = sources
            .iter()
            .flat_map(|asset| self.geometry.tiles_covering(&asset.bounds(), z))
            .collect();
        tiles.sort_by_key(|t| (t.y, t.x));
        tiles.dedup();
        tiles
    }
}

type BatchResult = (usize, Result<OutputImage, TileError>);

fn store_batch_result(
    slots: &mut [Option<Result<OutputImage, TileError>>],
    done: Result<BatchResult, tokio::task::JoinError>,
) {
    match done {
        Ok((index, result)) => slots[index] = Some(result),
        Err(err) => warn!(error = %err, "Render task failed"),
    }
}

/// Fetch, decode and transform one source tile.
async fn load_layer(
    asset: Arc<dyn RasterAsset>,
    composition: Composition,
    pipeline: Option<Arc<Pipeline>>,
    ctx: Arc<PipelineContext>,
    limiter: Arc<Semaphore>,
    key: LayerKey,
) -> Result<Option<(LayerKey, Layer)>, TileError> {
    let _permit = limiter
        .acquire_owned()
        .await
        .map_err(|e| TileError::TaskFailed(e.to_string()))?;

    let source = composition.source;
    let Some(bytes) = asset.fetch_tile(source.level, source.x, source.y).await? else {
        debug!(
            asset = asset.id(),
            level = source.level,
            x = source.x,
            y = source.y,
            "Skipping sparse tile"
        );
        return Ok(None);
    };

    let packed = pipeline.as_deref().is_some_and(Pipeline::packs_values);
    let buffer = tokio::task::spawn_blocking(move || {
        decode_layer(asset.as_ref(), &composition, &bytes, pipeline.as_deref(), &ctx)
    })
    .await
    .map_err(|e| TileError::TaskFailed(e.to_string()))??;

    Ok(Some((key, Layer::new(composition, buffer).with_packed_values(packed))))
}

fn decode_layer(
    asset: &dyn RasterAsset,
    composition: &Composition,
    bytes: &Bytes,
    pipeline: Option<&Pipeline>,
    ctx: &PipelineContext,
) -> Result<RawBuffer, TileError> {
    let source = composition.source;
    let level = asset
        .levels()
        .get(source.level)
        .ok_or_else(|| TileError::Asset(format!("level {} out of range", source.level)))?;
    let actual = level
        .tile_dimensions(source.x, source.y)
        .ok_or_else(|| TileError::Asset(format!("tile {}/{} out of range", source.x, source.y)))?;

    let codec = Codec::from_compression(level.codec.compression)?;
    let decode_ctx = DecodeContext::new(&level.codec, actual, (level.tile_width, level.tile_height));
    let raw = codec.decode(bytes, &decode_ctx)?;

    match pipeline {
        Some(pipeline) => pipeline.process(&raw, ctx),
        None => Ok(raw),
    }
}
