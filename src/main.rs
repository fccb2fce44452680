//! cog-tiler - render map tiles from Cloud-Optimized GeoTIFFs.

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cog_tiler::{
    config::{BatchConfig, Cli, Command, InfoConfig, RenderConfig, StorageConfig},
    create_s3_client, AssetRegistry, AssetSummary, RasterAsset, TileRenderer, UriAssetSource,
};

type CliResult = Result<(), Box<dyn Error>>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let validated = match &cli.command {
        Command::Render(config) => config.validate(),
        Command::Batch(config) => config.validate(),
        Command::Info(config) => config.validate(),
    };
    if let Err(e) = validated {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Render(config) => run_render(config).await,
        Command::Batch(config) => run_batch(config).await,
        Command::Info(config) => run_info(config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "cog_tiler=debug"
    } else {
        "cog_tiler=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Registry for `sources`; an S3 client is only built when one is needed.
async fn build_registry(
    storage: &StorageConfig,
    sources: &[String],
) -> AssetRegistry<UriAssetSource> {
    let source = if sources.iter().any(|s| s.starts_with("s3://")) {
        let client = create_s3_client(storage.s3_endpoint.as_deref(), &storage.s3_region).await;
        UriAssetSource::new(client)
    } else {
        UriAssetSource::local_only()
    };
    AssetRegistry::with_capacity(
        source,
        storage.cache_assets,
        storage.block_size,
        storage.cache_blocks,
    )
}

async fn open_sources(
    storage: &StorageConfig,
    sources: &[String],
) -> Result<Vec<Arc<dyn RasterAsset>>, Box<dyn Error>> {
    let registry = build_registry(storage, sources).await;
    let mut assets = Vec::with_capacity(sources.len());
    for id in sources {
        let asset = registry.get_raster(id).await?;
        info!(
            asset = id.as_str(),
            levels = asset.levels().len(),
            epsg = ?asset.epsg(),
            "Opened asset"
        );
        assets.push(asset);
    }
    Ok(assets)
}

// =============================================================================
// Render Command
// =============================================================================

async fn run_render(config: RenderConfig) -> CliResult {
    let request = config.render.render_request()?;
    let matrix = config.render.tile_matrix()?;
    let assets = open_sources(&config.storage, &config.sources).await?;

    let renderer = TileRenderer::new(Arc::new(matrix), config.render.concurrency);
    let image = renderer.render_tile(&assets, config.tile, &request).await?;

    tokio::fs::write(&config.output, &image.bytes).await?;
    info!(
        tile = %config.tile,
        bytes = image.bytes.len(),
        content_type = image.content_type,
        output = %config.output.display(),
        "Wrote tile"
    );
    Ok(())
}

// =============================================================================
// Batch Command
// =============================================================================

async fn run_batch(config: BatchConfig) -> CliResult {
    let request = config.render.render_request()?;
    let matrix = config.render.tile_matrix()?;
    let assets = open_sources(&config.storage, &config.sources).await?;

    let renderer = Arc::new(TileRenderer::new(Arc::new(matrix), config.render.concurrency));
    let tiles = renderer.tiles_covering(&assets, config.zoom);
    info!(zoom = config.zoom, tiles = tiles.len(), "Rendering batch");

    let results = renderer.render_batch(assets.into(), tiles, request).await;

    let total = results.len();
    let mut failed = 0usize;
    for (tile, result) in results {
        match result {
            Ok(image) => {
                let path = config.tile_path(tile);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, &image.bytes).await?;
            }
            Err(e) => {
                error!(%tile, error = %e, "Tile failed");
                failed += 1;
            }
        }
    }

    info!(
        written = total - failed,
        failed,
        out_dir = %config.out_dir.display(),
        "Batch complete"
    );
    if failed > 0 {
        return Err(format!("{} of {} tiles failed", failed, total).into());
    }
    Ok(())
}

// =============================================================================
// Info Command
// =============================================================================

async fn run_info(config: InfoConfig) -> CliResult {
    let sources = [config.source.clone()];
    let assets = open_sources(&config.storage, &sources).await?;
    for asset in &assets {
        let summary = AssetSummary::of(asset.as_ref());
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}
