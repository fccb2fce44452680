//! Seams between neighbouring tiles.
//!
//! The asset below sits at fractional pixel offsets, has a pixel size of 0.7
//! destination pixels and 64px internal tiles, so every destination tile is
//! assembled from many resized source tiles.

use std::sync::Arc;

use cog_tiler::tiler::{compositions, intersect};
use cog_tiler::{
    CogAsset, CompositorOptions, OutputFormat, RasterAsset, RenderRequest, Tile, TileGeometry,
    TileMatrix, TileRenderer,
};

use super::test_utils::{decode_rgba, CogBuilder, TrackingReader, HALF_WORLD};

const BACKGROUND: [u8; 4] = [255, 0, 0, 255];

/// Web Mercator metres per pixel at zoom 2.
fn z2_resolution() -> f64 {
    HALF_WORLD / 512.0
}

/// Asset from global z2 pixel (411.6, 20.3), 358x200 pixels of 0.7 z2 pixels.
fn fractional_asset() -> CogBuilder {
    let r2 = z2_resolution();
    let origin = (-HALF_WORLD + 411.6 * r2, HALF_WORLD - 20.3 * r2);
    CogBuilder::new(358, 200)
        .tile_size(64)
        .georeference(origin, 0.7 * r2)
        .fill(100.0)
}

async fn open(builder: &CogBuilder) -> Arc<dyn RasterAsset> {
    let reader = TrackingReader::new(builder.build(), "mem://fractional.tif");
    Arc::new(CogAsset::open(reader).await.unwrap())
}

fn is_asset_pixel(pixel: [u8; 4]) -> bool {
    pixel[3] == 255 && pixel[0].abs_diff(100) <= 1 && pixel[1].abs_diff(100) <= 1
}

#[tokio::test]
async fn test_horizontal_neighbours_share_edge_without_gap() {
    let asset = open(&fractional_asset()).await;
    let renderer = TileRenderer::new(Arc::new(TileMatrix::web_mercator_quad()), 8);
    let request = RenderRequest::new(OutputFormat::Png).with_compositor(CompositorOptions {
        background: BACKGROUND,
        ..Default::default()
    });

    let left = renderer
        .render_tile(&[asset.clone()], Tile::new(1, 0, 2), &request)
        .await
        .unwrap();
    let right = renderer
        .render_tile(&[asset], Tile::new(2, 0, 2), &request)
        .await
        .unwrap();
    let left = decode_rgba(&left.bytes);
    let right = decode_rgba(&right.bytes);

    // Covered columns: global 412..662, i.e. 156..256 left and 0..150 right
    for (x, y, pixel) in left.enumerate_pixels() {
        let covered = x >= 156 && (20..160).contains(&y);
        if covered {
            assert!(is_asset_pixel(pixel.0), "left ({}, {}) = {:?}", x, y, pixel.0);
        } else {
            assert_eq!(pixel.0, BACKGROUND, "left ({}, {})", x, y);
        }
    }
    for (x, y, pixel) in right.enumerate_pixels() {
        let covered = x < 150 && (20..160).contains(&y);
        if covered {
            assert!(is_asset_pixel(pixel.0), "right ({}, {}) = {:?}", x, y, pixel.0);
        } else {
            assert_eq!(pixel.0, BACKGROUND, "right ({}, {})", x, y);
        }
    }
}

#[tokio::test]
async fn test_compositions_partition_covered_area() {
    let asset = open(&fractional_asset()).await;
    let matrix = TileMatrix::web_mercator_quad();
    assert_eq!(matrix.tile_size(), 256);

    let mut widths = Vec::new();
    for tile in [Tile::new(1, 0, 2), Tile::new(2, 0, 2)] {
        let hit = intersect(asset.as_ref(), &matrix, tile).unwrap();
        assert_eq!(hit.level, 0);
        let level = &asset.levels()[hit.level];
        let planned = compositions(level, &hit);
        assert!(planned.len() > 1);

        let mut area = 0u64;
        let mut min_x = u32::MAX;
        let mut max_x = 0;
        for (i, a) in planned.iter().enumerate() {
            let (w, h) = a.output_size();
            area += w as u64 * h as u64;
            min_x = min_x.min(a.dest_offset.0);
            max_x = max_x.max(a.dest_offset.0 + w);

            // No two compositions write the same destination pixel
            for b in &planned[i + 1..] {
                let (bw, bh) = b.output_size();
                let overlap_x = a.dest_offset.0 < b.dest_offset.0 + bw
                    && b.dest_offset.0 < a.dest_offset.0 + w;
                let overlap_y = a.dest_offset.1 < b.dest_offset.1 + bh
                    && b.dest_offset.1 < a.dest_offset.1 + h;
                assert!(!(overlap_x && overlap_y), "{:?} overlaps {:?}", a, b);
            }
        }

        let width = max_x - min_x;
        assert_eq!(area, width as u64 * 140);
        widths.push(width);
    }

    assert_eq!(widths, vec![100, 150]);
}

#[tokio::test]
async fn test_shared_edge_pixels_match() {
    // Rows get brighter downwards; every column is the same
    let asset = open(&fractional_asset().pixels(|_, _, y, _| (y as f64 * 1.2).min(255.0))).await;
    let renderer = TileRenderer::new(Arc::new(TileMatrix::web_mercator_quad()), 8);
    let request = RenderRequest::new(OutputFormat::Png);

    let left = renderer
        .render_tile(&[asset.clone()], Tile::new(1, 0, 2), &request)
        .await
        .unwrap();
    let right = renderer
        .render_tile(&[asset], Tile::new(2, 0, 2), &request)
        .await
        .unwrap();
    let left = decode_rgba(&left.bytes);
    let right = decode_rgba(&right.bytes);

    for y in 20..160 {
        let a = left.get_pixel(255, y).0;
        let b = right.get_pixel(0, y).0;
        assert_eq!((a[3], b[3]), (255, 255), "row {}", y);
        assert!(a[0].abs_diff(b[0]) <= 1, "row {}: {:?} vs {:?}", y, a, b);
    }
    // Rows outside the asset are transparent on both sides
    assert_eq!(left.get_pixel(255, 10).0[3], 0);
    assert_eq!(right.get_pixel(0, 170).0[3], 0);
}
