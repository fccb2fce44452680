use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// Local file implementation of RangeReader.
///
/// The file is opened once and its size captured at creation. Reads seek
/// and read under a lock, so concurrent callers are serialized per file;
/// wrap it in a `BlockCache` to amortize small reads.
pub struct LocalRangeReader {
    file: Mutex<File>,
    path: PathBuf,
    size: u64,
    identifier: String,
}

impl LocalRangeReader {
    /// Open a local file for range reads.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let identifier = path.display().to_string();

        let file = File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(identifier.clone()),
            _ => IoError::Local(format!("{}: {}", identifier, e)),
        })?;
        let size = file
            .metadata()
            .await
            .map_err(|e| IoError::Local(format!("{}: {}", identifier, e)))?
            .len();

        Ok(Self {
            file: Mutex::new(file),
            path,
            size,
            identifier,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RangeReader for LocalRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| IoError::Local(format!("{}: {}", self.identifier, e)))?;
        file.read_exact(&mut buf)
            .await
            .map_err(|e| IoError::Local(format!("{}: {}", self.identifier, e)))?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
