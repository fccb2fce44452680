//! Tile rendering: decode, composite and encode.
//!
//! # Components
//!
//! - [`TileRenderer`]: entry point, plans and decodes layers under a shared limiter
//! - [`compose`]: draws layers onto a background canvas and encodes it
//! - [`OutputFormat`]: PNG, JPEG, WebP and (with the `avif` feature) AVIF

mod compositor;
mod encoder;
mod service;

pub use compositor::{
    compose, composite, CompositorOptions, Layer, ResizeKernel, DEFAULT_MAX_LAYER_DIMENSION,
};
pub use encoder::{
    clamp_quality, dimensions, encode, is_valid_quality, EncodeOptions, OutputFormat,
    OutputImage, DEFAULT_QUALITY, MAX_QUALITY, MIN_QUALITY,
};
pub use service::{RenderRequest, TileRenderer, DEFAULT_DECODE_CONCURRENCY};
