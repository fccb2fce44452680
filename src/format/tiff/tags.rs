//! TIFF tag and field type definitions.
//!
//! Covers the baseline tags needed to locate tiles, the codec tags the
//! decoder needs (predictor, sample format, LERC parameters), the GeoTIFF
//! tags used for georeferencing and the two GDAL private tags.

// =============================================================================
// TIFF Field Types
// =============================================================================

/// TIFF field types that determine how values are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    Rational = 5,
    SByte = 6,
    Undefined = 7,
    SShort = 8,
    SLong = 9,
    SRational = 10,
    Float = 11,
    Double = 12,
    /// BigTIFF only
    Long8 = 16,
    /// BigTIFF only
    SLong8 = 17,
    /// BigTIFF only
    Ifd8 = 18,
}

impl FieldType {
    /// Size of a single value of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::SByte | FieldType::Undefined => 1,
            FieldType::Short | FieldType::SShort => 2,
            FieldType::Long | FieldType::SLong | FieldType::Float => 4,
            FieldType::Rational
            | FieldType::SRational
            | FieldType::Double
            | FieldType::Long8
            | FieldType::SLong8
            | FieldType::Ifd8 => 8,
        }
    }

    /// Returns `None` for unknown type codes.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            6 => Some(FieldType::SByte),
            7 => Some(FieldType::Undefined),
            8 => Some(FieldType::SShort),
            9 => Some(FieldType::SLong),
            10 => Some(FieldType::SRational),
            11 => Some(FieldType::Float),
            12 => Some(FieldType::Double),
            16 => Some(FieldType::Long8),
            17 => Some(FieldType::SLong8),
            18 => Some(FieldType::Ifd8),
            _ => None,
        }
    }

    /// Inline value capacity of a classic TIFF entry.
    pub const INLINE_THRESHOLD_TIFF: usize = 4;

    /// Inline value capacity of a BigTIFF entry.
    pub const INLINE_THRESHOLD_BIGTIFF: usize = 8;

    /// Whether `count` values of this type fit in the entry's value field.
    #[inline]
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let threshold = if is_bigtiff {
            Self::INLINE_THRESHOLD_BIGTIFF
        } else {
            Self::INLINE_THRESHOLD_TIFF
        };
        (self.size_in_bytes() as u64)
            .checked_mul(count)
            .map(|total| total <= threshold as u64)
            .unwrap_or(false)
    }
}

// =============================================================================
// TIFF Tags
// =============================================================================

/// Tags read while opening a COG. Anything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    // -------------------------------------------------------------------------
    // Image structure
    // -------------------------------------------------------------------------
    /// Bit 0 reduced resolution, bit 2 transparency mask
    NewSubfileType = 254,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    SamplesPerPixel = 277,
    /// 1 = chunky (pixel interleaved), 2 = planar
    PlanarConfiguration = 284,
    /// 1 = none, 2 = horizontal differencing, 3 = floating point
    Predictor = 317,
    ExtraSamples = 338,
    /// 1 = unsigned int, 2 = signed int, 3 = IEEE float
    SampleFormat = 339,

    // -------------------------------------------------------------------------
    // Strip organization (only used to reject striped files)
    // -------------------------------------------------------------------------
    StripOffsets = 273,
    RowsPerStrip = 278,
    StripByteCounts = 279,

    // -------------------------------------------------------------------------
    // Tile organization
    // -------------------------------------------------------------------------
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,

    // -------------------------------------------------------------------------
    // GeoTIFF
    // -------------------------------------------------------------------------
    /// (ScaleX, ScaleY, ScaleZ) in CRS units per pixel
    ModelPixelScale = 33550,
    /// (I, J, K, X, Y, Z) raster-to-model tie points
    ModelTiepoint = 33922,
    /// 4x4 affine transform, used instead of scale + tiepoint
    ModelTransformation = 34264,
    GeoKeyDirectory = 34735,

    // -------------------------------------------------------------------------
    // GDAL private tags
    // -------------------------------------------------------------------------
    /// XML with band statistics and other metadata
    GdalMetadata = 42112,
    /// ASCII no-data value
    GdalNodata = 42113,
    /// (LERC version, additional compression)
    LercParameters = 50674,
}

impl TiffTag {
    /// Returns `None` for tags this crate does not read.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            254 => Some(TiffTag::NewSubfileType),
            256 => Some(TiffTag::ImageWidth),
            257 => Some(TiffTag::ImageLength),
            258 => Some(TiffTag::BitsPerSample),
            259 => Some(TiffTag::Compression),
            262 => Some(TiffTag::PhotometricInterpretation),
            273 => Some(TiffTag::StripOffsets),
            277 => Some(TiffTag::SamplesPerPixel),
            278 => Some(TiffTag::RowsPerStrip),
            279 => Some(TiffTag::StripByteCounts),
            284 => Some(TiffTag::PlanarConfiguration),
            317 => Some(TiffTag::Predictor),
            322 => Some(TiffTag::TileWidth),
            323 => Some(TiffTag::TileLength),
            324 => Some(TiffTag::TileOffsets),
            325 => Some(TiffTag::TileByteCounts),
            338 => Some(TiffTag::ExtraSamples),
            339 => Some(TiffTag::SampleFormat),
            33550 => Some(TiffTag::ModelPixelScale),
            33922 => Some(TiffTag::ModelTiepoint),
            34264 => Some(TiffTag::ModelTransformation),
            34735 => Some(TiffTag::GeoKeyDirectory),
            42112 => Some(TiffTag::GdalMetadata),
            42113 => Some(TiffTag::GdalNodata),
            50674 => Some(TiffTag::LercParameters),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Name used in error messages.
    pub const fn name(self) -> &'static str {
        match self {
            TiffTag::NewSubfileType => "NewSubfileType",
            TiffTag::ImageWidth => "ImageWidth",
            TiffTag::ImageLength => "ImageLength",
            TiffTag::BitsPerSample => "BitsPerSample",
            TiffTag::Compression => "Compression",
            TiffTag::PhotometricInterpretation => "PhotometricInterpretation",
            TiffTag::SamplesPerPixel => "SamplesPerPixel",
            TiffTag::PlanarConfiguration => "PlanarConfiguration",
            TiffTag::Predictor => "Predictor",
            TiffTag::ExtraSamples => "ExtraSamples",
            TiffTag::SampleFormat => "SampleFormat",
            TiffTag::StripOffsets => "StripOffsets",
            TiffTag::RowsPerStrip => "RowsPerStrip",
            TiffTag::StripByteCounts => "StripByteCounts",
            TiffTag::TileWidth => "TileWidth",
            TiffTag::TileLength => "TileLength",
            TiffTag::TileOffsets => "TileOffsets",
            TiffTag::TileByteCounts => "TileByteCounts",
            TiffTag::ModelPixelScale => "ModelPixelScale",
            TiffTag::ModelTiepoint => "ModelTiepoint",
            TiffTag::ModelTransformation => "ModelTransformation",
            TiffTag::GeoKeyDirectory => "GeoKeyDirectory",
            TiffTag::GdalMetadata => "GDAL_METADATA",
            TiffTag::GdalNodata => "GDAL_NODATA",
            TiffTag::LercParameters => "LercParameters",
        }
    }
}

// =============================================================================
// Compression Values
// =============================================================================

/// TIFF compression codes seen in COGs.
///
/// Only LZW, ZSTD and LERC are decoded; the rest are named so errors can
/// say what the asset actually uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    None = 1,
    Lzw = 5,
    Jpeg = 7,
    Deflate = 8,
    PackBits = 32773,
    AdobeDeflate = 32946,
    Lerc = 34887,
    Zstd = 50000,
    Webp = 50001,
    JpegXl = 50002,
}

impl Compression {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Compression::None),
            5 => Some(Compression::Lzw),
            7 => Some(Compression::Jpeg),
            8 => Some(Compression::Deflate),
            32773 => Some(Compression::PackBits),
            32946 => Some(Compression::AdobeDeflate),
            34887 => Some(Compression::Lerc),
            50000 => Some(Compression::Zstd),
            50001 => Some(Compression::Webp),
            50002 => Some(Compression::JpegXl),
            _ => None,
        }
    }

    /// Human-readable name for any compression code.
    pub fn name_of(value: u16) -> String {
        match Self::from_u16(value) {
            Some(c) => format!("{:?}", c),
            None => format!("Unknown({})", value),
        }
    }
}

// =============================================================================
// Sample Format
// =============================================================================

/// Interpretation of each sample (tag 339).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum SampleFormat {
    #[default]
    Uint = 1,
    Int = 2,
    Float = 3,
}

impl SampleFormat {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(SampleFormat::Uint),
            2 => Some(SampleFormat::Int),
            3 => Some(SampleFormat::Float),
            _ => None,
        }
    }
}
