//! Size-bounded cache of rendered NDVI rasters
//!
//! A raster for a given polygon and acquisition day does not change once the
//! scene is processed, so repeated requests (style toggles in other browser
//! tabs, re-adding a removed layer) are served from memory instead of costing
//! another token exchange and processing unit.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use moka::future::Cache;
use sha2::{Digest, Sha256};

use super::types::RasterImage;
use crate::config::ImageCacheConfig;
use crate::geo::{AreaOfInterest, DateSelection};

/// Key for raster cache entries: digest of the ring plus the day
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RasterKey {
    ring_digest: [u8; 32],
    date: DateSelection,
}

impl RasterKey {
    pub fn new(area: &AreaOfInterest, date: DateSelection) -> Self {
        let mut hasher = Sha256::new();
        for p in area.ring() {
            hasher.update(p.lng().to_le_bytes());
            hasher.update(p.lat().to_le_bytes());
        }
        Self {
            ring_digest: hasher.finalize().into(),
            date,
        }
    }
}

/// Thread-safe raster cache using moka with byte-weighted eviction
pub struct RasterCache {
    cache: Cache<RasterKey, RasterImage>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RasterCache {
    pub fn new(config: &ImageCacheConfig) -> Self {
        let cache = Cache::builder()
            .weigher(|_key: &RasterKey, value: &RasterImage| -> u32 {
                value.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(config.max_size_bytes)
            .time_to_live(config.ttl)
            .time_to_idle(config.tti)
            .build();

        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &RasterKey) -> Option<RasterImage> {
        let result = self.cache.get(key).await;

        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            counter!("fieldwatch_raster_cache_hits_total").increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!("fieldwatch_raster_cache_misses_total").increment(1);
        }
        gauge!("fieldwatch_raster_cache_hit_rate").set(self.hit_rate());

        result
    }

    pub async fn insert(&self, key: RasterKey, value: RasterImage) {
        counter!("fieldwatch_raster_cache_bytes_inserted_total").increment(value.len() as u64);
        self.cache.insert(key, value).await;
        gauge!("fieldwatch_raster_cache_entry_count").set(self.cache.entry_count() as f64);
    }

    /// Return the cached raster or compute, cache and return it
    ///
    /// Errors are not cached; the next call retries the computation.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: RasterKey,
        init: F,
    ) -> Result<RasterImage, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<RasterImage, E>>,
    {
        if let Some(cached) = self.get(&key).await {
            return Ok(cached);
        }

        let value = init().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    /// Hit rate in `0.0..=1.0`
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn area(offset: f64) -> AreaOfInterest {
        AreaOfInterest::from_coords(&[
            [offset, 0.0],
            [offset, 1.0],
            [offset + 1.0, 1.0],
            [offset, 0.0],
        ])
        .unwrap()
    }

    fn raster(len: usize) -> RasterImage {
        RasterImage {
            bytes: Bytes::from(vec![7u8; len]),
            content_type: "image/png".to_string(),
        }
    }

    #[test]
    fn test_key_depends_on_ring_and_date() {
        let d1 = DateSelection::parse("2023-06-01").unwrap();
        let d2 = DateSelection::parse("2023-06-02").unwrap();
        assert_eq!(RasterKey::new(&area(0.0), d1), RasterKey::new(&area(0.0), d1));
        assert_ne!(RasterKey::new(&area(0.0), d1), RasterKey::new(&area(0.0), d2));
        assert_ne!(RasterKey::new(&area(0.0), d1), RasterKey::new(&area(2.0), d1));
    }

    #[tokio::test]
    async fn test_get_or_try_insert_caches_success_only() {
        let cache = RasterCache::new(&ImageCacheConfig::default());
        let key = RasterKey::new(&area(0.0), DateSelection::parse("2023-06-01").unwrap());

        let failed: Result<RasterImage, &str> = cache
            .get_or_try_insert_with(key.clone(), || async { Err("boom") })
            .await;
        assert!(failed.is_err());
        assert!(cache.get(&key).await.is_none());

        let first: Result<RasterImage, &str> = cache
            .get_or_try_insert_with(key.clone(), || async { Ok(raster(16)) })
            .await;
        assert_eq!(first.unwrap().len(), 16);

        let second: Result<RasterImage, &str> = cache
            .get_or_try_insert_with(key.clone(), || async { Ok(raster(99)) })
            .await;
        assert_eq!(second.unwrap().len(), 16);
        // Three misses before the fill, one hit after it
        assert!((cache.hit_rate() - 0.25).abs() < 1e-9);
    }
}
