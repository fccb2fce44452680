use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// HTTP status S3 answers with when an `If-Match` precondition fails.
const PRECONDITION_FAILED: u16 = 412;

/// Ranged reads of one S3 object.
///
/// The object size and ETag come from a single HEAD on creation. Every GET
/// carries `If-Match` with that ETag; reads of an object overwritten since
/// then fail with [`IoError::S3`].
#[derive(Clone)]
pub struct S3RangeReader {
    client: Client,
    bucket: String,
    key: String,
    size: u64,
    etag: Option<String>,
    identifier: String,
}

impl S3RangeReader {
    /// Create a reader for `s3://bucket/key`.
    ///
    /// Fails with `IoError::NotFound` when the object does not exist.
    pub async fn new(client: Client, bucket: String, key: String) -> Result<Self, IoError> {
        let identifier = format!("s3://{}/{}", bucket, key);

        let head = client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let service_not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                let status_not_found = e
                    .raw_response()
                    .map(|r| r.status().as_u16() == 404)
                    .unwrap_or(false);

                if service_not_found || status_not_found {
                    IoError::NotFound(identifier.clone())
                } else {
                    IoError::S3(e.to_string())
                }
            })?;

        let size = head.content_length().unwrap_or(0).max(0) as u64;
        let etag = head.e_tag().map(str::to_string);
        debug!(object = identifier.as_str(), size, etag = ?etag, "Opened S3 object");

        Ok(Self {
            client,
            bucket,
            key,
            size,
            etag,
            identifier,
        })
    }
}

#[async_trait]
impl RangeReader for S3RangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        // Inclusive on both ends
        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(range)
            .set_if_match(self.etag.clone())
            .send()
            .await
            .map_err(|e| {
                let changed = e
                    .raw_response()
                    .map(|r| r.status().as_u16() == PRECONDITION_FAILED)
                    .unwrap_or(false);
                if changed {
                    IoError::S3(format!("{} changed since it was opened", self.identifier))
                } else {
                    IoError::S3(e.to_string())
                }
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();

        if data.len() != len {
            return Err(IoError::Connection(format!(
                "short read from {}: expected {} bytes at offset {}, got {}",
                self.identifier,
                len,
                offset,
                data.len()
            )));
        }

        Ok(data)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Create an S3 client with an optional custom endpoint.
///
/// Custom endpoints (MinIO and friends) switch to path-style addressing.
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    let sdk_config = loader.load().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();

    Client::from_conf(s3_config)
}
