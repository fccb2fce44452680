//! Test utilities for integration tests.
//!
//! [`CogBuilder`] writes small but complete little-endian COGs: tiled IFDs
//! for the full resolution image and its overviews, GeoTIFF tags, optional
//! GDAL no-data/metadata and LZW or ZSTD compressed tiles.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use cog_tiler::codec::{predict_horizontal, PREDICTOR_HORIZONTAL, PREDICTOR_NONE};
use cog_tiler::error::IoError;
use cog_tiler::format::tiff::ByteOrder;
use cog_tiler::io::RangeReader;

/// Half the width of the Web Mercator world in metres.
pub const HALF_WORLD: f64 = 20_037_508.342_789_244;

// =============================================================================
// Mock Range Reader with Request Tracking
// =============================================================================

/// In-memory reader that records every range it serves.
pub struct TrackingReader {
    data: Bytes,
    identifier: String,
    request_count: Arc<AtomicUsize>,
    requests: Arc<RwLock<Vec<(u64, usize)>>>,
}

impl TrackingReader {
    pub fn new(data: Vec<u8>, identifier: impl Into<String>) -> Self {
        Self {
            data: Bytes::from(data),
            identifier: identifier.into(),
            request_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub async fn get_requests(&self) -> Vec<(u64, usize)> {
        self.requests.read().await.clone()
    }

    pub async fn reset_tracking(&self) {
        self.request_count.store(0, Ordering::SeqCst);
        self.requests.write().await.clear();
    }
}

impl Clone for TrackingReader {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            identifier: self.identifier.clone(),
            request_count: Arc::clone(&self.request_count),
            requests: Arc::clone(&self.requests),
        }
    }
}

#[async_trait]
impl RangeReader for TrackingReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.write().await.push((offset, len));

        let start = offset as usize;
        let end = start + len;
        if end > self.data.len() {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.data.len() as u64,
            });
        }
        Ok(self.data.slice(start..end))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// COG Builder
// =============================================================================

/// Tile compression written by [`CogBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileCompression {
    Lzw,
    Zstd,
}

impl TileCompression {
    fn tag_value(self) -> u16 {
        match self {
            TileCompression::Lzw => 5,
            TileCompression::Zstd => 50000,
        }
    }

    fn compress(self, raw: &[u8]) -> Vec<u8> {
        match self {
            TileCompression::Lzw => {
                weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
                    .encode(raw)
                    .expect("LZW encode")
            }
            TileCompression::Zstd => zstd::stream::encode_all(raw, 0).expect("ZSTD encode"),
        }
    }
}

/// Sample type written by [`CogBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    U8,
    F32,
}

impl SampleKind {
    fn bits(self) -> u16 {
        match self {
            SampleKind::U8 => 8,
            SampleKind::F32 => 32,
        }
    }

    fn format(self) -> u16 {
        match self {
            SampleKind::U8 => 1,
            SampleKind::F32 => 3,
        }
    }

    fn push(self, value: f64, out: &mut Vec<u8>) {
        match self {
            SampleKind::U8 => out.push(value.clamp(0.0, 255.0) as u8),
            SampleKind::F32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
        }
    }
}

/// Pixel value of `(level, x, y, band)`, coordinates in level pixels.
pub type PixelFn = Arc<dyn Fn(usize, u32, u32, u16) -> f64 + Send + Sync>;

/// Builder for in-memory Cloud-Optimized GeoTIFFs in EPSG:3857.
pub struct CogBuilder {
    width: u32,
    height: u32,
    tile_size: u32,
    overviews: usize,
    bands: u16,
    kind: SampleKind,
    compression: TileCompression,
    predictor: u16,
    origin: (f64, f64),
    resolution: f64,
    epsg: u16,
    no_data: Option<String>,
    metadata: Option<String>,
    sparse: Vec<(usize, u32, u32)>,
    pixel: PixelFn,
}

impl CogBuilder {
    /// A `width` x `height` uint8 gray image whose top-left corner sits at
    /// the Web Mercator origin (0, 0), one metre per pixel.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tile_size: 256,
            overviews: 0,
            bands: 1,
            kind: SampleKind::U8,
            compression: TileCompression::Zstd,
            predictor: PREDICTOR_NONE,
            origin: (0.0, 0.0),
            resolution: 1.0,
            epsg: 3857,
            no_data: None,
            metadata: None,
            sparse: Vec::new(),
            pixel: Arc::new(|_, _, _, _| 0.0),
        }
    }

    pub fn tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// Number of 2x overviews after the full resolution level.
    pub fn overviews(mut self, overviews: usize) -> Self {
        self.overviews = overviews;
        self
    }

    pub fn bands(mut self, bands: u16) -> Self {
        self.bands = bands;
        self
    }

    pub fn float32(mut self) -> Self {
        self.kind = SampleKind::F32;
        self
    }

    pub fn compression(mut self, compression: TileCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Horizontal differencing (uint8 only).
    pub fn horizontal_predictor(mut self) -> Self {
        self.predictor = PREDICTOR_HORIZONTAL;
        self
    }

    /// Top-left corner and pixel size of the full resolution level.
    pub fn georeference(mut self, origin: (f64, f64), resolution: f64) -> Self {
        self.origin = origin;
        self.resolution = resolution;
        self
    }

    pub fn epsg(mut self, epsg: u16) -> Self {
        self.epsg = epsg;
        self
    }

    pub fn no_data(mut self, value: &str) -> Self {
        self.no_data = Some(value.to_string());
        self
    }

    /// GDAL_METADATA XML of the full resolution level.
    pub fn metadata(mut self, xml: &str) -> Self {
        self.metadata = Some(xml.to_string());
        self
    }

    /// Leave tile `(x, y)` of `level` unwritten.
    pub fn sparse(mut self, level: usize, x: u32, y: u32) -> Self {
        self.sparse.push((level, x, y));
        self
    }

    pub fn pixels(mut self, pixel: impl Fn(usize, u32, u32, u16) -> f64 + Send + Sync + 'static) -> Self {
        self.pixel = Arc::new(pixel);
        self
    }

    /// Same value everywhere.
    pub fn fill(self, value: f64) -> Self {
        self.pixels(move |_, _, _, _| value)
    }

    /// Size of `level`.
    pub fn level_size(&self, level: usize) -> (u32, u32) {
        let factor = 1u32 << level;
        (self.width.div_ceil(factor), self.height.div_ceil(factor))
    }

    /// Serialize the COG.
    pub fn build(&self) -> Vec<u8> {
        let levels = self.overviews + 1;
        let tiles: Vec<Vec<Vec<u8>>> = (0..levels).map(|l| self.encode_level(l)).collect();

        // Tile offsets do not change the IFD length, so lay out once to
        // measure and once for real.
        let placeholder: Vec<Vec<Field>> = (0..levels)
            .map(|l| self.fields(l, &vec![0; tiles[l].len()], &tiles[l]))
            .collect();
        let mut cursor = write_ifds(&placeholder).len() as u32;

        let mut ifds = Vec::with_capacity(levels);
        for (level, level_tiles) in tiles.iter().enumerate() {
            let mut offsets = Vec::with_capacity(level_tiles.len());
            for tile in level_tiles {
                if tile.is_empty() {
                    offsets.push(0);
                } else {
                    offsets.push(cursor);
                    cursor += tile.len() as u32;
                }
            }
            ifds.push(self.fields(level, &offsets, level_tiles));
        }

        let mut out = write_ifds(&ifds);
        for tile in tiles.iter().flatten() {
            out.extend_from_slice(tile);
        }
        out
    }

    /// Compressed tiles of `level` in row-major order; sparse tiles are empty.
    fn encode_level(&self, level: usize) -> Vec<Vec<u8>> {
        let (width, height) = self.level_size(level);
        let size = self.tile_size;
        let tiles_x = width.div_ceil(size);
        let tiles_y = height.div_ceil(size);

        let mut tiles = Vec::new();
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                if self.sparse.contains(&(level, tx, ty)) {
                    tiles.push(Vec::new());
                    continue;
                }

                // Edge tiles are padded to the nominal size like GDAL does
                let mut raw = Vec::new();
                for row in 0..size {
                    for col in 0..size {
                        let (x, y) = (tx * size + col, ty * size + row);
                        for band in 0..self.bands {
                            let value = if x < width && y < height {
                                (self.pixel)(level, x, y, band)
                            } else {
                                0.0
                            };
                            self.kind.push(value, &mut raw);
                        }
                    }
                }
                if self.predictor == PREDICTOR_HORIZONTAL {
                    predict_horizontal(
                        &mut raw,
                        size as usize,
                        self.bands as usize,
                        self.kind.bits(),
                        ByteOrder::LittleEndian,
                    )
                    .expect("predictor");
                }
                tiles.push(self.compression.compress(&raw));
            }
        }
        tiles
    }

    fn fields(&self, level: usize, offsets: &[u32], tiles: &[Vec<u8>]) -> Vec<Field> {
        let (width, height) = self.level_size(level);
        let bands = self.bands as usize;
        let byte_counts: Vec<u32> = tiles.iter().map(|t| t.len() as u32).collect();

        let mut fields = vec![
            Field::long(256, &[width]),
            Field::long(257, &[height]),
            Field::short(258, &vec![self.kind.bits(); bands]),
            Field::short(259, &[self.compression.tag_value()]),
            Field::short(262, &[if self.bands >= 3 { 2 } else { 1 }]),
            Field::short(277, &[self.bands]),
            Field::short(284, &[1]),
            Field::short(317, &[self.predictor]),
            Field::short(322, &[self.tile_size as u16]),
            Field::short(323, &[self.tile_size as u16]),
            Field::long(324, offsets),
            Field::long(325, &byte_counts),
            Field::short(339, &vec![self.kind.format(); bands]),
        ];
        if level > 0 {
            fields.push(Field::long(254, &[1]));
        } else {
            fields.push(Field::double(33550, &[self.resolution, self.resolution, 0.0]));
            fields.push(Field::double(
                33922,
                &[0.0, 0.0, 0.0, self.origin.0, self.origin.1, 0.0],
            ));
            fields.push(Field::short(34735, &[1, 1, 0, 1, 3072, 0, 1, self.epsg]));
            if let Some(xml) = &self.metadata {
                fields.push(Field::ascii(42112, xml));
            }
        }
        if let Some(no_data) = &self.no_data {
            fields.push(Field::ascii(42113, no_data));
        }
        fields
    }
}

// =============================================================================
// IFD Writer
// =============================================================================

/// One IFD entry with its little-endian value bytes.
#[derive(Debug, Clone)]
struct Field {
    tag: u16,
    field_type: u16,
    count: u32,
    data: Vec<u8>,
}

impl Field {
    fn short(tag: u16, values: &[u16]) -> Self {
        Self {
            tag,
            field_type: 3,
            count: values.len() as u32,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn long(tag: u16, values: &[u32]) -> Self {
        Self {
            tag,
            field_type: 4,
            count: values.len() as u32,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn double(tag: u16, values: &[f64]) -> Self {
        Self {
            tag,
            field_type: 12,
            count: values.len() as u32,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn ascii(tag: u16, text: &str) -> Self {
        let mut data = text.as_bytes().to_vec();
        data.push(0);
        Self {
            tag,
            field_type: 2,
            count: data.len() as u32,
            data,
        }
    }
}

/// Classic TIFF header followed by every IFD, each IFD directly followed by
/// its out-of-line values.
fn write_ifds(ifds: &[Vec<Field>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&8u32.to_le_bytes());

    for (index, fields) in ifds.iter().enumerate() {
        let mut fields = fields.clone();
        fields.sort_by_key(|f| f.tag);

        let start = out.len();
        let entries_len = 2 + 12 * fields.len() + 4;
        let mut extra = Vec::new();

        out.extend_from_slice(&(fields.len() as u16).to_le_bytes());
        for field in &fields {
            out.extend_from_slice(&field.tag.to_le_bytes());
            out.extend_from_slice(&field.field_type.to_le_bytes());
            out.extend_from_slice(&field.count.to_le_bytes());
            if field.data.len() <= 4 {
                let mut inline = field.data.clone();
                inline.resize(4, 0);
                out.extend_from_slice(&inline);
            } else {
                let offset = (start + entries_len + extra.len()) as u32;
                out.extend_from_slice(&offset.to_le_bytes());
                extra.extend_from_slice(&field.data);
                if extra.len() % 2 == 1 {
                    extra.push(0);
                }
            }
        }

        let next = if index + 1 == ifds.len() {
            0
        } else {
            (start + entries_len + extra.len()) as u32
        };
        out.extend_from_slice(&next.to_le_bytes());
        out.extend_from_slice(&extra);
    }
    out
}

// =============================================================================
// Image Helpers
// =============================================================================

/// Decode an encoded tile back to RGBA.
pub fn decode_rgba(bytes: &[u8]) -> image::RgbaImage {
    image::load_from_memory(bytes)
        .expect("decodable output")
        .to_rgba8()
}

/// Web Mercator asset georeference that places its top-left corner at the
/// top-left of z/x/y, with `pixels_per_tile` asset pixels across that tile.
pub fn aligned_to_tile(z: u32, x: u32, y: u32, pixels_per_tile: u32) -> ((f64, f64), f64) {
    let span = 2.0 * HALF_WORLD / (1u64 << z) as f64;
    let origin = (-HALF_WORLD + x as f64 * span, HALF_WORLD - y as f64 * span);
    (origin, span / pixels_per_tile as f64)
}
