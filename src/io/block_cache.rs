use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};

use super::RangeReader;
use crate::error::IoError;

/// Default block size: 256KB.
///
/// COG headers cluster at the start of the file and overview tiles are
/// small, so one block usually covers the header plus several tiles.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Default cache capacity in number of blocks (25.6MB with default blocks).
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 100;

/// Block-based caching layer that wraps any RangeReader.
///
/// IFD walking issues many small reads at scattered offsets, and tile
/// fetches for neighbouring output tiles hit the same source tiles. The
/// cache turns these into a few aligned block reads:
/// - fixed-size blocks keyed by block index
/// - LRU eviction once `capacity` blocks are held
/// - singleflight, so concurrent readers of one block share a fetch
/// - reads that span blocks are stitched together
pub struct BlockCache<R> {
    inner: Arc<R>,
    block_size: usize,
    cache: RwLock<LruCache<u64, Bytes>>,
    in_flight: Mutex<HashMap<u64, Arc<Notify>>>,
}

impl<R: RangeReader> BlockCache<R> {
    /// Wrap `inner` with the default block size and capacity.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CACHE_CAPACITY)
    }

    /// Wrap `inner` with a custom block size (bytes) and capacity (blocks).
    ///
    /// A capacity of zero is treated as one block.
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(inner),
            block_size: block_size.max(1),
            cache: RwLock::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The wrapped reader.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Number of blocks currently held.
    pub async fn cached_blocks(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn get_block(&self, block_idx: u64) -> Result<Bytes, IoError> {
        loop {
            if let Some(data) = self.cache.write().await.get(&block_idx) {
                return Ok(data.clone());
            }

            let notify = {
                let mut in_flight = self.in_flight.lock().await;
                match in_flight.get(&block_idx) {
                    Some(existing) => {
                        // Register interest before releasing the map lock so
                        // the leader's notify_waiters cannot be missed.
                        let existing = existing.clone();
                        let waiter = existing.notified();
                        tokio::pin!(waiter);
                        waiter.as_mut().enable();
                        drop(in_flight);
                        waiter.await;
                        continue;
                    }
                    None => {
                        let notify = Arc::new(Notify::new());
                        in_flight.insert(block_idx, notify.clone());
                        notify
                    }
                }
            };

            let result = self.fetch_block(block_idx).await;

            {
                let mut cache = self.cache.write().await;
                let mut in_flight = self.in_flight.lock().await;
                if let Ok(ref data) = result {
                    cache.put(block_idx, data.clone());
                }
                in_flight.remove(&block_idx);
            }
            notify.notify_waiters();

            return result;
        }
    }

    async fn fetch_block(&self, block_idx: u64) -> Result<Bytes, IoError> {
        let offset = block_idx * self.block_size as u64;
        let size = self.inner.size();

        // The last block is usually short
        let remaining = size.saturating_sub(offset);
        if remaining == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size as u64,
                size,
            });
        }

        let len = remaining.min(self.block_size as u64) as usize;
        self.inner.read_exact_at(offset, len).await
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        super::range_reader::check_range(offset, len, self.inner.size())?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let block_size = self.block_size as u64;
        let first = offset / block_size;
        let last = (offset + len as u64 - 1) / block_size;

        if first == last {
            let block = self.get_block(first).await?;
            let start = (offset % block_size) as usize;
            return Ok(block.slice(start..start + len));
        }

        let mut out = BytesMut::with_capacity(len);
        let mut cursor = offset;
        for block_idx in first..=last {
            let block = self.get_block(block_idx).await?;
            let start = (cursor % block_size) as usize;
            let take = (block.len() - start).min(len - out.len());
            out.extend_from_slice(&block[start..start + take]);
            cursor += take as u64;
        }

        Ok(out.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reader that counts how many reads reach it
    struct CountingReader {
        data: Bytes,
        reads: AtomicUsize,
    }

    impl CountingReader {
        fn new(len: usize) -> Self {
            Self {
                data: Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>()),
                reads: AtomicUsize::new(0),
            }
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RangeReader for CountingReader {
        async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            super::super::range_reader::check_range(offset, len, self.data.len() as u64)?;
            Ok(self.data.slice(offset as usize..offset as usize + len))
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn identifier(&self) -> &str {
            "counting://test"
        }
    }

    #[tokio::test]
    async fn test_header_reads_share_one_block() {
        let cache = BlockCache::with_capacity(CountingReader::new(4096), 1024, 4);

        // Header, then IFD entry count, then IFD body
        let header = cache.read_exact_at(0, 16).await.unwrap();
        let count = cache.read_exact_at(16, 2).await.unwrap();
        let body = cache.read_exact_at(18, 200).await.unwrap();

        assert_eq!(header.len() + count.len() + body.len(), 218);
        assert_eq!(&body[..], &cache.inner().data[18..218]);
        assert_eq!(cache.inner().reads(), 1);
    }

    #[tokio::test]
    async fn test_read_spanning_blocks_is_stitched() {
        let cache = BlockCache::with_capacity(CountingReader::new(4096), 1024, 4);

        let bytes = cache.read_exact_at(1000, 2100).await.unwrap();
        assert_eq!(&bytes[..], &cache.inner().data[1000..3100]);
        assert_eq!(cache.inner().reads(), 3);
        assert_eq!(cache.cached_blocks().await, 3);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = BlockCache::with_capacity(CountingReader::new(4096), 1024, 2);

        cache.read_exact_at(0, 8).await.unwrap();
        cache.read_exact_at(1024, 8).await.unwrap();
        cache.read_exact_at(2048, 8).await.unwrap(); // evicts block 0
        assert_eq!(cache.inner().reads(), 3);

        cache.read_exact_at(1030, 8).await.unwrap();
        assert_eq!(cache.inner().reads(), 3);

        cache.read_exact_at(0, 8).await.unwrap();
        assert_eq!(cache.inner().reads(), 4);
    }

    #[tokio::test]
    async fn test_short_final_block() {
        let cache = BlockCache::with_capacity(CountingReader::new(1100), 1024, 4);
        let bytes = cache.read_exact_at(1050, 50).await.unwrap();
        assert_eq!(&bytes[..], &cache.inner().data[1050..1100]);
    }

    #[tokio::test]
    async fn test_bounds_and_empty_reads() {
        let cache = BlockCache::with_capacity(CountingReader::new(10), 1024, 0);

        assert!(cache.read_exact_at(0, 0).await.unwrap().is_empty());
        assert_eq!(cache.inner().reads(), 0);

        assert!(matches!(
            cache.read_exact_at(8, 5).await,
            Err(IoError::RangeOutOfBounds { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_readers_share_fetch() {
        use tokio::time::{sleep, Duration};

        struct SlowReader {
            data: Bytes,
            reads: AtomicUsize,
        }

        #[async_trait]
        impl RangeReader for SlowReader {
            async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
                self.reads.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(50)).await;
                Ok(self.data.slice(offset as usize..offset as usize + len))
            }

            fn size(&self) -> u64 {
                self.data.len() as u64
            }

            fn identifier(&self) -> &str {
                "slow://test"
            }
        }

        let reader = SlowReader {
            data: Bytes::from(vec![7u8; 2048]),
            reads: AtomicUsize::new(0),
        };
        let cache = Arc::new(BlockCache::with_capacity(reader, 1024, 4));

        let mut handles = Vec::new();
        for i in 0..8u64 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.read_exact_at(i * 10, 10).await.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(&handle.await.unwrap()[..], &[7u8; 10]);
        }

        assert_eq!(cache.inner().reads.load(Ordering::SeqCst), 1);
    }
}
