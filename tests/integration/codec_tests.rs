//! Decoding through the public codec API and through full renders.

use std::sync::Arc;

use cog_tiler::codec::{predict_horizontal, PREDICTOR_HORIZONTAL};
use cog_tiler::format::tiff::ByteOrder;
use cog_tiler::{
    CogAsset, Codec, CodecInfo, DecodeContext, OutputFormat, Pixels, RasterAsset, RenderRequest,
    Tile, TileError, TileMatrix, TileRenderer,
};

use super::test_utils::{aligned_to_tile, decode_rgba, CogBuilder, TileCompression, TrackingReader};

fn lzw(raw: &[u8]) -> Vec<u8> {
    weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
        .encode(raw)
        .unwrap()
}

#[test]
fn test_lzw_rgb_with_predictor() {
    let (width, height) = (16u32, 4u32);
    let original: Vec<u8> = (0..width * height * 3).map(|i| (i * 13 % 256) as u8).collect();
    let mut predicted = original.clone();
    predict_horizontal(&mut predicted, width as usize, 3, 8, ByteOrder::LittleEndian).unwrap();

    let mut info = CodecInfo::new(5, 8, 1, 3);
    info.predictor = PREDICTOR_HORIZONTAL;
    let ctx = DecodeContext::new(&info, (width, height), (width, height));

    let buffer = Codec::from_compression(5)
        .unwrap()
        .decode(&lzw(&predicted), &ctx)
        .unwrap();
    assert_eq!(buffer.channels(), 3);
    assert_eq!(buffer.pixels(), &Pixels::U8(original));
}

#[test]
fn test_zstd_float_edge_tile_padded_to_nominal() {
    // 8x8 nominal tile, 5x3 of it inside the image
    let raw: Vec<u8> = (0..64)
        .flat_map(|i| (i as f32 * 0.5).to_le_bytes())
        .collect();
    let compressed = zstd::stream::encode_all(raw.as_slice(), 0).unwrap();

    let info = CodecInfo::new(50000, 32, 3, 1);
    let ctx = DecodeContext::new(&info, (5, 3), (8, 8));
    let buffer = Codec::Zstd.decode(&compressed, &ctx).unwrap();

    assert_eq!((buffer.width(), buffer.height()), (5, 3));
    assert_eq!(buffer.sample(0, 0, 0), 0.0);
    assert_eq!(buffer.sample(4, 0, 0), 2.0);
    assert_eq!(buffer.sample(4, 2, 0), (2 * 8 + 4) as f64 * 0.5);
}

#[test]
fn test_zstd_trimmed_edge_tile() {
    let raw: Vec<u8> = (0..15).collect();
    let compressed = zstd::stream::encode_all(raw.as_slice(), 0).unwrap();

    let info = CodecInfo::new(50000, 8, 1, 1);
    let ctx = DecodeContext::new(&info, (5, 3), (8, 8));
    let buffer = Codec::Zstd.decode(&compressed, &ctx).unwrap();

    assert_eq!(buffer.sample(4, 2, 0), 14.0);
}

#[test]
fn test_unexpected_length_is_corrupt() {
    let compressed = zstd::stream::encode_all(&[0u8; 17][..], 0).unwrap();
    let info = CodecInfo::new(50000, 8, 1, 1);
    let ctx = DecodeContext::new(&info, (5, 3), (8, 8));

    assert!(matches!(
        Codec::Zstd.decode(&compressed, &ctx),
        Err(TileError::CorruptTileData { .. })
    ));
    assert!(matches!(
        Codec::Lzw.decode(b"not lzw at all", &ctx),
        Err(TileError::CorruptTileData { .. })
    ));
}

#[test]
fn test_unsupported_compression() {
    // JPEG and Deflate are valid TIFF but not decoded here
    for compression in [7, 8] {
        assert!(matches!(
            Codec::from_compression(compression),
            Err(TileError::UnsupportedCodec { .. })
        ));
    }
}

#[tokio::test]
async fn test_render_lzw_rgb_cog() {
    let (origin, resolution) = aligned_to_tile(2, 2, 0, 256);
    let color = |x: u32, y: u32, band: u16| match band {
        0 => (x % 256) as f64,
        1 => (y % 256) as f64,
        _ => 42.0,
    };
    let builder = CogBuilder::new(256, 256)
        .bands(3)
        .compression(TileCompression::Lzw)
        .horizontal_predictor()
        .georeference(origin, resolution)
        .pixels(move |_, x, y, band| color(x, y, band));
    let reader = TrackingReader::new(builder.build(), "mem://rgb.tif");
    let asset: Arc<dyn RasterAsset> = Arc::new(CogAsset::open(reader).await.unwrap());

    let renderer = TileRenderer::new(Arc::new(TileMatrix::web_mercator_quad()), 2);
    let out = renderer
        .render_tile(&[asset], Tile::new(2, 0, 2), &RenderRequest::new(OutputFormat::Png))
        .await
        .unwrap();

    let image = decode_rgba(&out.bytes);
    for (x, y, pixel) in image.enumerate_pixels() {
        assert_eq!(pixel.0, [x as u8, y as u8, 42, 255]);
    }
}
