use thiserror::Error;

/// I/O errors that can occur when reading byte ranges from storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object or file not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Local filesystem error
    #[error("Local file error: {0}")]
    Local(String),
}

/// Errors raised while opening an asset
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF parsing error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// File is not a usable COG
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain the structure being read
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// File uses strips instead of tiles
    #[error("Unsupported organization: file uses strips instead of tiles")]
    StripOrganization,

    /// Separate sample planes are not supported
    #[error("Unsupported planar configuration: {0} (only chunky is supported)")]
    UnsupportedPlanarConfiguration(u16),

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// No tiled image directory was found
    #[error("No tiled resolution levels found")]
    NoLevels,

    /// The full resolution image carries no usable georeference
    #[error("Missing georeference: {0}")]
    MissingGeoReference(&'static str),
}

/// Errors raised while rendering a tile.
///
/// Every variant except [`TileError::OversizedLayer`] aborts the render.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// The asset declares a compression this crate does not decode
    #[error("Unsupported codec: {name} (compression {compression})")]
    UnsupportedCodec { compression: u16, name: String },

    /// Decoded bytes do not match any plausible tile layout
    #[error("Corrupt tile data: {message}")]
    CorruptTileData { message: String },

    /// Sample layout that cannot be represented as a raw buffer
    #[error("Unsupported sample format {sample_format} with {bits_per_sample} bits per sample")]
    UnsupportedSampleFormat {
        sample_format: u16,
        bits_per_sample: u16,
    },

    /// Requested output format is not recognised
    #[error("Unknown output format: {0}")]
    UnknownOutputFormat(String),

    /// Byte-range fetch failed
    #[error("Source fetch failed: {0}")]
    SourceFetchFailure(#[from] IoError),

    /// A layer was too large to composite and was dropped
    #[error("Layer of {width}x{height} exceeds the {limit} pixel limit")]
    OversizedLayer { width: u32, height: u32, limit: u32 },

    /// Buffer handed to a pipeline or the compositor has the wrong shape
    #[error("Invalid input for {stage}: {message}")]
    InvalidPipelineInput {
        stage: &'static str,
        message: String,
    },

    /// A color ramp definition could not be parsed
    #[error("Invalid color ramp at line {line}: {message}")]
    InvalidColorRamp { line: usize, message: String },

    /// Asset does not exist
    #[error("Asset not found: {asset_id}")]
    AssetNotFound { asset_id: String },

    /// Asset could not be opened
    #[error("Asset error: {0}")]
    Asset(String),

    /// Failed to encode the output image
    #[error("Failed to encode image: {message}")]
    EncodeError { message: String },

    /// A background task panicked or was cancelled
    #[error("Render task failed: {0}")]
    TaskFailed(String),
}

impl TileError {
    /// Whether this error aborts the whole tile render.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TileError::OversizedLayer { .. })
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        TileError::CorruptTileData {
            message: message.into(),
        }
    }
}

impl From<TiffError> for TileError {
    fn from(err: TiffError) -> Self {
        match err {
            TiffError::Io(io) => TileError::SourceFetchFailure(io),
            other => TileError::Asset(other.to_string()),
        }
    }
}

impl From<FormatError> for TileError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::Io(IoError::NotFound(asset_id)) => TileError::AssetNotFound { asset_id },
            FormatError::Io(io) => TileError::SourceFetchFailure(io),
            FormatError::Tiff(tiff) => tiff.into(),
            FormatError::UnsupportedFormat { reason } => TileError::Asset(reason),
        }
    }
}
