//! End-to-end renders of generated COGs.

use std::io::Write;
use std::sync::Arc;

use cog_tiler::io::RangeReader;
use cog_tiler::pipeline::encode_elevation;
use cog_tiler::{
    AssetRegistry, CogAsset, CompositorOptions, OutputFormat, Pipeline, RasterAsset,
    RenderRequest, Tile, TileError, TileMatrix, TileRenderer, UriAssetSource,
};

use super::test_utils::{aligned_to_tile, decode_rgba, CogBuilder, TileCompression, TrackingReader};

fn renderer() -> TileRenderer {
    TileRenderer::new(Arc::new(TileMatrix::web_mercator_quad()), 4)
}

fn png_on(background: [u8; 4]) -> RenderRequest {
    RenderRequest::new(OutputFormat::Png).with_compositor(CompositorOptions {
        background,
        ..Default::default()
    })
}

async fn open(builder: &CogBuilder, id: &str) -> Arc<dyn RasterAsset> {
    let reader = TrackingReader::new(builder.build(), id);
    Arc::new(CogAsset::open(reader).await.unwrap())
}

/// 512px gray asset covering the north-east quadrant, with one overview.
fn quadrant() -> CogBuilder {
    let (origin, resolution) = aligned_to_tile(1, 1, 0, 512);
    CogBuilder::new(512, 512)
        .overviews(1)
        .georeference(origin, resolution)
}

#[tokio::test]
async fn test_opened_asset_metadata() {
    let asset = open(&quadrant().no_data("0"), "mem://quadrant.tif").await;

    assert_eq!(asset.epsg(), Some(3857));
    assert_eq!(asset.levels().len(), 2);
    assert_eq!(asset.levels()[0].width, 512);
    assert_eq!(asset.levels()[1].width, 256);
    assert_eq!(asset.levels()[1].tiles_x, 1);
    assert_eq!(asset.no_data(), Some(0.0));

    let bounds = asset.bounds();
    assert!(bounds.min_x.abs() < 1e-6);
    assert!(bounds.min_y.abs() < 1e-6);
    assert!((bounds.max_x - super::test_utils::HALF_WORLD).abs() < 1e-6);
}

#[tokio::test]
async fn test_overview_is_used_at_matching_zoom() {
    let builder = quadrant().pixels(|level, _, _, _| if level == 0 { 10.0 } else { 200.0 });
    let reader = TrackingReader::new(builder.build(), "mem://quadrant.tif");
    let asset: Arc<dyn RasterAsset> = Arc::new(CogAsset::open(reader.clone()).await.unwrap());
    reader.reset_tracking().await;

    let out = renderer()
        .render_tile(&[asset], Tile::new(1, 0, 1), &png_on([0, 0, 0, 0]))
        .await
        .unwrap();

    let image = decode_rgba(&out.bytes);
    assert_eq!(image.dimensions(), (256, 256));
    assert!(image.pixels().all(|p| p.0 == [200, 200, 200, 255]));

    // One range read for the single overview tile, nothing else
    assert_eq!(reader.request_count(), 1);
    let requests = reader.get_requests().await;
    let (offset, len) = requests[0];
    assert!(len > 0);
    assert!(offset + len as u64 <= reader.size());
    assert_eq!(out.content_type, "image/png");
}

#[tokio::test]
async fn test_full_resolution_pixels_are_copied_exactly() {
    let value = |x: u32, y: u32| ((x * 7 + y * 3) % 251) as f64;
    let builder = quadrant().pixels(move |_, x, y, _| value(x, y));
    let asset = open(&builder, "mem://gradient.tif").await;
    let renderer = renderer();
    let request = png_on([0, 0, 0, 0]);

    for (tile_x, tile_y) in [(2, 0), (3, 0), (2, 1), (3, 1)] {
        let out = renderer
            .render_tile(&[asset.clone()], Tile::new(tile_x, tile_y, 2), &request)
            .await
            .unwrap();
        let image = decode_rgba(&out.bytes);

        let (base_x, base_y) = ((tile_x - 2) * 256, tile_y * 256);
        for (px, py, pixel) in image.enumerate_pixels() {
            let v = value(base_x + px, base_y + py) as u8;
            assert_eq!(pixel.0, [v, v, v, 255], "tile {}/{} at ({}, {})", tile_x, tile_y, px, py);
        }
    }
}

#[tokio::test]
async fn test_partial_coverage_shows_background() {
    // West half of the north-east quadrant
    let (origin, resolution) = aligned_to_tile(1, 1, 0, 512);
    let builder = CogBuilder::new(256, 512)
        .overviews(1)
        .georeference(origin, resolution)
        .fill(77.0);
    let asset = open(&builder, "mem://west.tif").await;

    let out = renderer()
        .render_tile(&[asset], Tile::new(1, 0, 1), &png_on([0, 0, 255, 255]))
        .await
        .unwrap();
    let image = decode_rgba(&out.bytes);

    for (x, _, pixel) in image.enumerate_pixels() {
        if x < 128 {
            assert_eq!(pixel.0, [77, 77, 77, 255]);
        } else {
            assert_eq!(pixel.0, [0, 0, 255, 255]);
        }
    }
}

#[tokio::test]
async fn test_terrain_rgb_with_no_data() {
    let (origin, resolution) = aligned_to_tile(2, 2, 0, 256);
    let builder = CogBuilder::new(256, 256)
        .float32()
        .compression(TileCompression::Lzw)
        .georeference(origin, resolution)
        .no_data("-9999")
        .pixels(|_, x, _, _| if x < 128 { -9999.0 } else { 1234.5 });
    let asset = open(&builder, "mem://dem.tif").await;

    let request = png_on([0, 0, 0, 0]).with_pipeline(Pipeline::TerrainRgb);
    let out = renderer()
        .render_tile(&[asset], Tile::new(2, 0, 2), &request)
        .await
        .unwrap();
    let image = decode_rgba(&out.bytes);

    let [r, g, b] = encode_elevation(1234.5);
    for (x, _, pixel) in image.enumerate_pixels() {
        if x < 128 {
            assert_eq!(pixel.0, [0, 0, 0, 0]);
        } else {
            assert_eq!(pixel.0, [r, g, b, 255]);
        }
    }
}

#[tokio::test]
async fn test_float_without_pipeline_is_rejected() {
    let (origin, resolution) = aligned_to_tile(2, 2, 0, 256);
    let builder = CogBuilder::new(256, 256)
        .float32()
        .georeference(origin, resolution)
        .fill(5.0);
    let asset = open(&builder, "mem://float.tif").await;

    let err = renderer()
        .render_tile(&[asset], Tile::new(2, 0, 2), &png_on([0, 0, 0, 0]))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, TileError::InvalidPipelineInput { .. }));
}

#[tokio::test]
async fn test_sources_draw_in_order() {
    let base = open(&quadrant().fill(10.0), "mem://base.tif").await;

    let (origin, resolution) = aligned_to_tile(1, 1, 0, 512);
    let west = CogBuilder::new(256, 512)
        .overviews(1)
        .georeference(origin, resolution)
        .fill(200.0);
    let west = open(&west, "mem://west.tif").await;

    let renderer = renderer();
    let request = png_on([0, 0, 0, 0]);
    let tile = Tile::new(1, 0, 1);

    let out = renderer
        .render_tile(&[base.clone(), west.clone()], tile, &request)
        .await
        .unwrap();
    let image = decode_rgba(&out.bytes);
    assert_eq!(image.get_pixel(10, 10).0, [200, 200, 200, 255]);
    assert_eq!(image.get_pixel(200, 10).0, [10, 10, 10, 255]);

    let out = renderer.render_tile(&[west, base], tile, &request).await.unwrap();
    let image = decode_rgba(&out.bytes);
    assert!(image.pixels().all(|p| p.0 == [10, 10, 10, 255]));
}

#[tokio::test]
async fn test_sparse_tile_leaves_background() {
    let (origin, resolution) = aligned_to_tile(2, 2, 0, 256);
    let builder = CogBuilder::new(512, 256)
        .georeference(origin, resolution)
        .fill(90.0)
        .sparse(0, 1, 0);
    let asset = open(&builder, "mem://sparse.tif").await;
    let renderer = renderer();
    let request = png_on([1, 2, 3, 255]);

    let written = renderer
        .render_tile(&[asset.clone()], Tile::new(2, 0, 2), &request)
        .await
        .unwrap();
    assert!(decode_rgba(&written.bytes)
        .pixels()
        .all(|p| p.0 == [90, 90, 90, 255]));

    let sparse = renderer
        .render_tile(&[asset], Tile::new(3, 0, 2), &request)
        .await
        .unwrap();
    assert!(decode_rgba(&sparse.bytes)
        .pixels()
        .all(|p| p.0 == [1, 2, 3, 255]));
}

#[tokio::test]
async fn test_other_crs_is_skipped() {
    let asset = open(&quadrant().epsg(4326).fill(50.0), "mem://wgs84.tif").await;

    let out = renderer()
        .render_tile(&[asset], Tile::new(1, 0, 1), &png_on([9, 9, 9, 255]))
        .await
        .unwrap();
    assert!(decode_rgba(&out.bytes).pixels().all(|p| p.0 == [9, 9, 9, 255]));
}

#[tokio::test]
async fn test_jpeg_and_webp_outputs() {
    let asset = open(&quadrant().fill(120.0), "mem://gray.tif").await;
    let renderer = renderer();

    for format in [OutputFormat::Jpeg, OutputFormat::Webp] {
        let out = renderer
            .render_tile(&[asset.clone()], Tile::new(1, 0, 1), &RenderRequest::new(format))
            .await
            .unwrap();
        assert_eq!(out.content_type, format.content_type());
        assert_eq!(cog_tiler::tile::dimensions(&out.bytes).unwrap(), (256, 256));
        let image = decode_rgba(&out.bytes);
        assert_eq!(image.dimensions(), (256, 256));
        let center = image.get_pixel(128, 128).0;
        assert!((center[0] as i32 - 120).abs() <= 3, "{:?}: {:?}", format, center);
    }
}

#[tokio::test]
async fn test_registry_renders_local_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&quadrant().fill(33.0).build()).unwrap();
    let path = file.path().display().to_string();

    let registry = AssetRegistry::new(UriAssetSource::local_only());
    let asset = registry.get_raster(&path).await.unwrap();
    let again = registry.get_raster(&path).await.unwrap();
    assert_eq!(registry.cached_count().await, 1);
    assert_eq!(asset.id(), again.id());

    let out = renderer()
        .render_tile(&[asset], Tile::new(2, 1, 2), &png_on([0, 0, 0, 0]))
        .await
        .unwrap();
    assert!(decode_rgba(&out.bytes)
        .pixels()
        .all(|p| p.0 == [33, 33, 33, 255]));

    assert!(registry.get_raster("/no/such/file.tif").await.is_err());
}

#[tokio::test]
async fn test_batch_covers_asset() {
    let asset = open(&quadrant().fill(60.0), "mem://batch.tif").await;
    let renderer = Arc::new(renderer());
    let sources: Vec<Arc<dyn RasterAsset>> = vec![asset];

    let tiles = renderer.tiles_covering(&sources, 2);
    assert_eq!(
        tiles,
        vec![
            Tile::new(2, 0, 2),
            Tile::new(3, 0, 2),
            Tile::new(2, 1, 2),
            Tile::new(3, 1, 2),
        ]
    );

    let results = renderer
        .render_batch(sources.into(), tiles.clone(), png_on([0, 0, 0, 0]))
        .await;
    assert_eq!(results.len(), 4);
    for ((tile, result), expected) in results.into_iter().zip(tiles) {
        assert_eq!(tile, expected);
        let image = decode_rgba(&result.unwrap().bytes);
        assert!(image.pixels().all(|p| p.0 == [60, 60, 60, 255]));
    }
}
