//! Pipelines through resized compositions.
//!
//! Every asset here covers tile 2/2/0 exactly, either with 128 pixels
//! (upsampled 2x) or 512 pixels (downsampled 2x), so each layer goes through
//! the compositor's resize step.

use std::sync::Arc;

use cog_tiler::pipeline::{decode_elevation, ndvi_gradient, NdviOptions};
use cog_tiler::{
    CogAsset, OutputFormat, Pipeline, RasterAsset, RenderRequest, Tile, TileMatrix, TileRenderer,
};

use super::test_utils::{aligned_to_tile, decode_rgba, CogBuilder, TileCompression, TrackingReader};

const TILE: Tile = Tile { x: 2, y: 0, z: 2 };

/// Alternating 9.5 m / 9.6 m columns (the low byte rolls over between them)
/// on a slope down the rows.
fn elevation(x: u32, y: u32) -> f64 {
    9.5 + 0.1 * (x % 2) as f64 + 3.7 * y as f64
}

fn dem(pixels_per_tile: u32) -> CogBuilder {
    let (origin, resolution) = aligned_to_tile(2, 2, 0, pixels_per_tile);
    CogBuilder::new(pixels_per_tile, pixels_per_tile)
        .float32()
        .compression(TileCompression::Lzw)
        .georeference(origin, resolution)
}

async fn render(builder: &CogBuilder, request: &RenderRequest) -> image::RgbaImage {
    let reader = TrackingReader::new(builder.build(), "mem://pipeline.tif");
    let asset: Arc<dyn RasterAsset> = Arc::new(CogAsset::open(reader).await.unwrap());
    let renderer = TileRenderer::new(Arc::new(TileMatrix::web_mercator_quad()), 4);
    let out = renderer.render_tile(&[asset], TILE, request).await.unwrap();
    decode_rgba(&out.bytes)
}

fn terrain_request() -> RenderRequest {
    RenderRequest::new(OutputFormat::Png).with_pipeline(Pipeline::TerrainRgb)
}

#[tokio::test]
async fn test_terrain_rgb_upsampled_decodes_to_source_elevation() {
    let builder = dem(128).pixels(|_, x, y, _| elevation(x, y));
    let image = render(&builder, &terrain_request()).await;
    assert_eq!(image.dimensions(), (256, 256));

    for (px, py, pixel) in image.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        assert_eq!(a, 255, "({}, {})", px, py);
        let decoded = decode_elevation([r, g, b]);
        let expected = elevation(px / 2, py / 2);
        assert!(
            (decoded - expected).abs() <= 0.1,
            "({}, {}): {} vs {}",
            px,
            py,
            decoded,
            expected
        );
    }
}

#[tokio::test]
async fn test_terrain_rgb_downsampled_decodes_to_source_elevation() {
    let builder = dem(512).pixels(|_, x, y, _| elevation(x, y));
    let image = render(&builder, &terrain_request()).await;

    for (px, py, pixel) in image.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        assert_eq!(a, 255, "({}, {})", px, py);
        let decoded = decode_elevation([r, g, b]);

        // Any source pixel under the output pixel
        let closest = [(0, 0), (1, 0), (0, 1), (1, 1)]
            .iter()
            .map(|(dx, dy)| (decoded - elevation(2 * px + dx, 2 * py + dy)).abs())
            .fold(f64::INFINITY, f64::min);
        assert!(closest <= 0.1, "({}, {}): {} off by {}", px, py, decoded, closest);
    }
}

#[tokio::test]
async fn test_color_ramp_upsampled() {
    let builder = dem(128).pixels(|_, x, _, _| if x < 64 { 0.0 } else { 100.0 });
    let ramp = "0 255 0 0\n100 0 0 255".parse().unwrap();
    let request = RenderRequest::new(OutputFormat::Png).with_pipeline(Pipeline::ColorRamp { ramp });
    let image = render(&builder, &request).await;

    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        assert_eq!((g, a), (0, 255), "({}, {})", x, y);
        if x < 120 {
            assert!(r >= 254 && b <= 1, "({}, {}) = {:?}", x, y, pixel.0);
        } else if x >= 136 {
            assert!(r <= 1 && b >= 254, "({}, {}) = {:?}", x, y, pixel.0);
        } else {
            // Blended across the boundary, never outside the two colors
            assert!((r as u16 + b as u16).abs_diff(255) <= 2, "({}, {}) = {:?}", x, y, pixel.0);
        }
    }
}

#[tokio::test]
async fn test_ndvi_downsampled() {
    let (origin, resolution) = aligned_to_tile(2, 2, 0, 512);
    let builder = CogBuilder::new(512, 512)
        .bands(4)
        .georeference(origin, resolution)
        .pixels(|_, _, _, band| match band {
            0 => 50.0,
            3 => 150.0,
            _ => 0.0,
        });
    let request = RenderRequest::new(OutputFormat::Png)
        .with_pipeline(Pipeline::Ndvi(NdviOptions::default()));
    let image = render(&builder, &request).await;

    // (150 - 50) / (150 + 50)
    let expected = ndvi_gradient().get(0.5);
    for (x, y, pixel) in image.enumerate_pixels() {
        for (got, want) in pixel.0.iter().zip(expected) {
            assert!(got.abs_diff(want) <= 1, "({}, {}) = {:?}", x, y, pixel.0);
        }
    }
}
