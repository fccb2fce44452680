//! Where asset bytes come from.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::error::IoError;
use crate::io::{LocalRangeReader, RangeReader, S3RangeReader};

/// Trait for creating range readers from asset identifiers.
///
/// This lets the registry work with different storage backends (S3, local
/// files, in-memory fixtures) without being tied to one of them.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// The type of range reader this source creates.
    type Reader: RangeReader + 'static;

    /// Create a range reader for `asset_id`.
    async fn create_reader(&self, asset_id: &str) -> Result<Self::Reader, IoError>;
}

/// Reader produced by [`UriAssetSource`].
pub enum AssetReader {
    Local(LocalRangeReader),
    S3(S3RangeReader),
}

#[async_trait]
impl RangeReader for AssetReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        match self {
            AssetReader::Local(r) => r.read_exact_at(offset, len).await,
            AssetReader::S3(r) => r.read_exact_at(offset, len).await,
        }
    }

    fn size(&self) -> u64 {
        match self {
            AssetReader::Local(r) => r.size(),
            AssetReader::S3(r) => r.size(),
        }
    }

    fn identifier(&self) -> &str {
        match self {
            AssetReader::Local(r) => r.identifier(),
            AssetReader::S3(r) => r.identifier(),
        }
    }
}

/// Resolves `s3://bucket/key` to S3 and anything else to a local path.
///
/// The S3 client is only needed once an `s3://` identifier shows up.
#[derive(Clone, Default)]
pub struct UriAssetSource {
    client: Option<Client>,
}

impl UriAssetSource {
    /// Source that can read both S3 objects and local files.
    pub fn new(client: Client) -> Self {
        Self {
            client: Some(client),
        }
    }

    /// Source restricted to local files.
    pub fn local_only() -> Self {
        Self { client: None }
    }
}

/// Split `s3://bucket/key` into `(bucket, key)`.
pub(crate) fn parse_s3_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket, key))
}

#[async_trait]
impl AssetSource for UriAssetSource {
    type Reader = AssetReader;

    async fn create_reader(&self, asset_id: &str) -> Result<Self::Reader, IoError> {
        if asset_id.starts_with("s3://") {
            let (bucket, key) = parse_s3_uri(asset_id)
                .ok_or_else(|| IoError::NotFound(format!("malformed S3 URI {}", asset_id)))?;
            let client = self.client.clone().ok_or_else(|| {
                IoError::S3(format!("no S3 client configured for {}", asset_id))
            })?;
            let reader = S3RangeReader::new(client, bucket.to_string(), key.to_string()).await?;
            return Ok(AssetReader::S3(reader));
        }

        let path = asset_id.strip_prefix("file://").unwrap_or(asset_id);
        Ok(AssetReader::Local(LocalRangeReader::open(path).await?))
    }
}
