//! Decoded pixel buffers.

use crate::error::TileError;
use crate::geometry::PixelRect;

/// Sample depth of a [`RawBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleDepth {
    U8,
    U16,
    U32,
    F32,
}

/// Pixel-interleaved samples, one variant per depth.
#[derive(Debug, Clone, PartialEq)]
pub enum Pixels {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    F32(Vec<f32>),
}

impl Pixels {
    pub fn depth(&self) -> SampleDepth {
        match self {
            Pixels::U8(_) => SampleDepth::U8,
            Pixels::U16(_) => SampleDepth::U16,
            Pixels::U32(_) => SampleDepth::U32,
            Pixels::F32(_) => SampleDepth::F32,
        }
    }

    /// Number of samples (not bytes).
    pub fn len(&self) -> usize {
        match self {
            Pixels::U8(v) => v.len(),
            Pixels::U16(v) => v.len(),
            Pixels::U32(v) => v.len(),
            Pixels::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample `index` widened to f64.
    #[inline]
    pub fn get(&self, index: usize) -> f64 {
        match self {
            Pixels::U8(v) => v[index] as f64,
            Pixels::U16(v) => v[index] as f64,
            Pixels::U32(v) => v[index] as f64,
            Pixels::F32(v) => v[index] as f64,
        }
    }
}

/// A decoded tile: `width * height * channels` samples, pixel interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBuffer {
    width: u32,
    height: u32,
    channels: u32,
    pixels: Pixels,
}

impl RawBuffer {
    /// Wrap samples, checking the sample count against the dimensions.
    pub fn new(width: u32, height: u32, channels: u32, pixels: Pixels) -> Result<Self, TileError> {
        let expected = width as usize * height as usize * channels as usize;
        if pixels.len() != expected {
            return Err(TileError::corrupt(format!(
                "{}x{}x{} buffer needs {} samples, got {}",
                width,
                height,
                channels,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn depth(&self) -> SampleDepth {
        self.pixels.depth()
    }

    pub fn pixels(&self) -> &Pixels {
        &self.pixels
    }

    /// Sample at `(x, y)` in `channel`, widened to f64.
    #[inline]
    pub fn sample(&self, x: u32, y: u32, channel: u32) -> f64 {
        let index = (y as usize * self.width as usize + x as usize) * self.channels as usize
            + channel as usize;
        self.pixels.get(index)
    }

    /// Copy out a sub-window.
    pub fn crop(&self, rect: PixelRect) -> Result<RawBuffer, TileError> {
        if rect.right() > self.width || rect.bottom() > self.height {
            return Err(TileError::corrupt(format!(
                "crop {:?} outside {}x{} buffer",
                rect, self.width, self.height
            )));
        }

        let channels = self.channels as usize;
        let row_len = self.width as usize * channels;
        let start = rect.x as usize * channels;
        let len = rect.width as usize * channels;
        let rows = rect.y as usize..rect.bottom() as usize;

        fn copy_rows<T: Copy>(
            src: &[T],
            rows: std::ops::Range<usize>,
            row_len: usize,
            start: usize,
            len: usize,
        ) -> Vec<T> {
            let mut out = Vec::with_capacity(rows.len() * len);
            for row in rows {
                let offset = row * row_len + start;
                out.extend_from_slice(&src[offset..offset + len]);
            }
            out
        }

        let pixels = match &self.pixels {
            Pixels::U8(v) => Pixels::U8(copy_rows(v, rows, row_len, start, len)),
            Pixels::U16(v) => Pixels::U16(copy_rows(v, rows, row_len, start, len)),
            Pixels::U32(v) => Pixels::U32(copy_rows(v, rows, row_len, start, len)),
            Pixels::F32(v) => Pixels::F32(copy_rows(v, rows, row_len, start, len)),
        };

        RawBuffer::new(rect.width, rect.height, self.channels, pixels)
    }
}
