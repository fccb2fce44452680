//! GeoTIFF georeferencing and GDAL metadata.
//!
//! Only north-up rasters are supported: the pixel-to-model transform is a
//! scale plus a translation, taken from ModelPixelScale + ModelTiepoint or
//! from a rotation-free ModelTransformation.

use serde::Serialize;

use crate::error::TiffError;
use crate::geometry::BoundingBox;
use crate::io::RangeReader;

use super::parser::Ifd;
use super::tags::TiffTag;
use super::values::ValueReader;

/// GeographicTypeGeoKey
const GEO_KEY_GEOGRAPHIC_TYPE: u32 = 2048;
/// ProjectedCSTypeGeoKey
const GEO_KEY_PROJECTED_TYPE: u32 = 3072;
/// "user-defined" in GeoTIFF key values
const GEO_KEY_USER_DEFINED: u32 = 32767;

// =============================================================================
// GeoReference
// =============================================================================

/// Pixel-to-model transform of the full resolution image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoReference {
    /// EPSG code from the GeoKey directory, if any
    pub epsg: Option<u32>,
    /// Model X of the top-left corner of pixel (0, 0)
    pub origin_x: f64,
    /// Model Y of the top-left corner of pixel (0, 0)
    pub origin_y: f64,
    /// Model units per pixel, positive
    pub resolution_x: f64,
    /// Model units per pixel, positive (rows run south)
    pub resolution_y: f64,
}

impl GeoReference {
    /// Read the georeference from the full resolution IFD.
    pub async fn read<R: RangeReader>(
        values: &ValueReader<'_, R>,
        ifd: &Ifd,
    ) -> Result<Self, TiffError> {
        let epsg = match ifd.get_entry_by_tag(TiffTag::GeoKeyDirectory) {
            Some(entry) => parse_epsg(&values.read_u32_array(entry).await?),
            None => None,
        };

        if let Some(entry) = ifd.get_entry_by_tag(TiffTag::ModelTransformation) {
            let m = values.read_f64_array(entry).await?;
            return Self::from_transformation(&m, epsg);
        }

        let scale = match ifd.get_entry_by_tag(TiffTag::ModelPixelScale) {
            Some(entry) => values.read_f64_array(entry).await?,
            None => return Err(TiffError::MissingGeoReference("no ModelPixelScale")),
        };
        let tiepoint = match ifd.get_entry_by_tag(TiffTag::ModelTiepoint) {
            Some(entry) => values.read_f64_array(entry).await?,
            None => return Err(TiffError::MissingGeoReference("no ModelTiepoint")),
        };

        Self::from_scale_and_tiepoint(&scale, &tiepoint, epsg)
    }

    /// Build from ModelPixelScale `[sx, sy, sz]` and ModelTiepoint
    /// `[i, j, k, x, y, z]`.
    pub fn from_scale_and_tiepoint(
        scale: &[f64],
        tiepoint: &[f64],
        epsg: Option<u32>,
    ) -> Result<Self, TiffError> {
        if scale.len() < 2 || tiepoint.len() < 6 {
            return Err(TiffError::InvalidTagValue {
                tag: "ModelTiepoint",
                message: format!(
                    "need 2 scale and 6 tiepoint values, got {} and {}",
                    scale.len(),
                    tiepoint.len()
                ),
            });
        }

        let (sx, sy) = (scale[0], scale[1].abs());
        if sx <= 0.0 || sy == 0.0 || !sx.is_finite() || !sy.is_finite() {
            return Err(TiffError::MissingGeoReference("degenerate pixel scale"));
        }

        Ok(GeoReference {
            epsg,
            origin_x: tiepoint[3] - tiepoint[0] * sx,
            origin_y: tiepoint[4] + tiepoint[1] * sy,
            resolution_x: sx,
            resolution_y: sy,
        })
    }

    /// Build from a row-major 4x4 ModelTransformation.
    pub fn from_transformation(m: &[f64], epsg: Option<u32>) -> Result<Self, TiffError> {
        if m.len() < 16 {
            return Err(TiffError::InvalidTagValue {
                tag: "ModelTransformation",
                message: format!("expected 16 values, got {}", m.len()),
            });
        }
        if m[1] != 0.0 || m[4] != 0.0 {
            return Err(TiffError::MissingGeoReference("rotated rasters are not supported"));
        }
        if m[0] <= 0.0 || m[5] == 0.0 {
            return Err(TiffError::MissingGeoReference("degenerate pixel scale"));
        }

        Ok(GeoReference {
            epsg,
            origin_x: m[3],
            origin_y: m[7],
            resolution_x: m[0],
            resolution_y: m[5].abs(),
        })
    }

    /// Model extent of a `width` x `height` image.
    pub fn bounds(&self, width: u32, height: u32) -> BoundingBox {
        BoundingBox::new(
            self.origin_x,
            self.origin_y - height as f64 * self.resolution_y,
            self.origin_x + width as f64 * self.resolution_x,
            self.origin_y,
        )
    }
}

/// EPSG code from a GeoKeyDirectory, preferring the projected CRS key.
///
/// The directory is `[version, revision, minor, key_count]` followed by
/// `key_count` entries of `[key_id, location, count, value]`.
pub fn parse_epsg(directory: &[u32]) -> Option<u32> {
    let key_count = *directory.get(3)? as usize;
    let mut geographic = None;
    let mut projected = None;

    for key in directory[4..].chunks_exact(4).take(key_count) {
        // location 0 means the value is stored in the entry itself
        if key[1] != 0 || key[3] == 0 || key[3] == GEO_KEY_USER_DEFINED {
            continue;
        }
        match key[0] {
            GEO_KEY_PROJECTED_TYPE => projected = Some(key[3]),
            GEO_KEY_GEOGRAPHIC_TYPE => geographic = Some(key[3]),
            _ => {}
        }
    }

    projected.or(geographic)
}

// =============================================================================
// GDAL metadata
// =============================================================================

/// Per-band statistics from GDAL_METADATA.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BandStatistics {
    pub band: usize,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub mean: Option<f64>,
}

/// Parse a GDAL_NODATA string. `nan`, `inf` and `-inf` are accepted.
pub fn parse_gdal_nodata(text: &str) -> Option<f64> {
    let trimmed = text.trim().trim_end_matches('\0');
    match trimmed.to_ascii_lowercase().as_str() {
        "nan" => Some(f64::NAN),
        "inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        other => other.parse::<f64>().ok(),
    }
}

/// Extract `STATISTICS_*` items from a GDAL_METADATA XML document.
///
/// Items look like
/// `<Item name="STATISTICS_MAXIMUM" sample="0">255</Item>`; the result is
/// sorted by band and has one entry per band that has any statistic.
pub fn parse_gdal_statistics(xml: &str) -> Vec<BandStatistics> {
    let mut stats: Vec<BandStatistics> = Vec::new();

    for item in xml.split("<Item").skip(1) {
        let Some(tag_end) = item.find('>') else {
            continue;
        };
        let attributes = &item[..tag_end];
        let Some(name) = attribute(attributes, "name") else {
            continue;
        };
        let band = attribute(attributes, "sample")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        let body = &item[tag_end + 1..];
        let value = body
            .find("</Item>")
            .and_then(|end| body[..end].trim().parse::<f64>().ok());

        let Some(value) = value else {
            continue;
        };

        let slot = match stats.iter().position(|s| s.band == band) {
            Some(i) => i,
            None => {
                stats.push(BandStatistics {
                    band,
                    ..Default::default()
                });
                stats.len() - 1
            }
        };
        match name {
            "STATISTICS_MINIMUM" => stats[slot].minimum = Some(value),
            "STATISTICS_MAXIMUM" => stats[slot].maximum = Some(value),
            "STATISTICS_MEAN" => stats[slot].mean = Some(value),
            _ => {}
        }
    }

    stats.retain(|s| s.minimum.is_some() || s.maximum.is_some() || s.mean.is_some());
    stats.sort_by_key(|s| s.band);
    stats
}

fn attribute<'a>(attributes: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{}=\"", name);
    let start = attributes.find(&needle)? + needle.len();
    let len = attributes[start..].find('"')?;
    Some(&attributes[start..start + len])
}
