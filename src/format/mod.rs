//! Raster file formats.
//!
//! Only Cloud-Optimized GeoTIFF is read. [`detect::detect_tiff`] rejects
//! non-TIFF objects early; [`tiff`] parses the pyramid and georeference.

pub mod detect;
pub mod tiff;

pub use detect::{detect_tiff, is_tiff_header};
