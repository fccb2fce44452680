//! Asset registry: LRU cache of opened assets.
//!
//! Opening a COG costs several range reads (header, IFD chain, tile index
//! arrays). The registry keeps opened assets around and makes sure concurrent
//! requests for the same asset share a single open.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::debug;

use crate::error::FormatError;
use crate::io::{BlockCache, DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};

use super::{AssetSource, CogAsset, RasterAsset};

/// Default number of opened assets kept.
pub const DEFAULT_ASSET_CACHE_CAPACITY: usize = 100;

/// Opened asset type for a source.
pub type CachedAsset<S> = CogAsset<BlockCache<<S as AssetSource>::Reader>>;

/// Registry for managing asset lifecycle and caching.
///
/// - Caches opened assets with LRU eviction
/// - Wraps every reader in a [`BlockCache`]
/// - Uses singleflight to prevent duplicate opens for the same asset
pub struct AssetRegistry<S: AssetSource> {
    source: S,
    cache: RwLock<LruCache<String, Arc<CachedAsset<S>>>>,
    in_flight: Mutex<HashMap<String, Arc<InFlightState<CachedAsset<S>>>>>,
    block_size: usize,
    block_cache_capacity: usize,
}

/// State for an in-flight open.
struct InFlightState<A> {
    notify: Notify,
    result: Mutex<Option<Result<Arc<A>, FormatError>>>,
}

impl<S: AssetSource> AssetRegistry<S> {
    /// Registry with default cache sizes.
    pub fn new(source: S) -> Self {
        Self::with_capacity(
            source,
            DEFAULT_ASSET_CACHE_CAPACITY,
            DEFAULT_BLOCK_SIZE,
            DEFAULT_BLOCK_CACHE_CAPACITY,
        )
    }

    /// Registry with custom cache sizes.
    ///
    /// # Arguments
    /// * `asset_cache_capacity` - Maximum number of opened assets
    /// * `block_size` - Block size of each asset's block cache (bytes)
    /// * `block_cache_capacity` - Number of blocks cached per asset
    pub fn with_capacity(
        source: S,
        asset_cache_capacity: usize,
        block_size: usize,
        block_cache_capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(asset_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            cache: RwLock::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
            block_size,
            block_cache_capacity,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get an asset, opening it if not already cached.
    pub async fn get_asset(&self, asset_id: &str) -> Result<Arc<CachedAsset<S>>, FormatError> {
        // Fast path: check cache
        if let Some(asset) = self.cache.write().await.get(asset_id) {
            return Ok(asset.clone());
        }

        // Slow path: join an in-flight open or become the leader
        let state = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(asset_id) {
                Some(state) => state.clone(),
                None => {
                    let state = Arc::new(InFlightState {
                        notify: Notify::new(),
                        result: Mutex::new(None),
                    });
                    in_flight.insert(asset_id.to_string(), state.clone());
                    drop(in_flight);
                    return self.lead_open(asset_id, state).await;
                }
            }
        };

        loop {
            let notified = state.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a notify between the two is not lost
            notified.as_mut().enable();

            if let Some(result) = state.result.lock().await.as_ref() {
                return result.clone();
            }
            notified.await;
        }
    }

    /// Get an asset as a trait object for the renderer.
    pub async fn get_raster(&self, asset_id: &str) -> Result<Arc<dyn RasterAsset>, FormatError> {
        let asset: Arc<dyn RasterAsset> = self.get_asset(asset_id).await?;
        Ok(asset)
    }

    async fn lead_open(
        &self,
        asset_id: &str,
        state: Arc<InFlightState<CachedAsset<S>>>,
    ) -> Result<Arc<CachedAsset<S>>, FormatError> {
        let result = self.open_asset(asset_id).await;

        *state.result.lock().await = Some(result.clone());
        if let Ok(asset) = &result {
            self.cache
                .write()
                .await
                .put(asset_id.to_string(), asset.clone());
        }

        self.in_flight.lock().await.remove(asset_id);
        state.notify.notify_waiters();

        result
    }

    async fn open_asset(&self, asset_id: &str) -> Result<Arc<CachedAsset<S>>, FormatError> {
        debug!(asset_id, "Opening asset");
        let reader = self.source.create_reader(asset_id).await?;
        let cached_reader =
            BlockCache::with_capacity(reader, self.block_size, self.block_cache_capacity);
        Ok(Arc::new(CogAsset::open(cached_reader).await?))
    }

    /// Drop an asset from the cache so the next request reopens it.
    pub async fn invalidate(&self, asset_id: &str) {
        self.cache.write().await.pop(asset_id);
    }

    /// Drop every cached asset.
    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    /// Number of cached assets.
    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }
}
