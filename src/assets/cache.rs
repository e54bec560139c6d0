//! Decoded audio cache with single-flight loading.
//!
//! At most one fetch+decode runs per asset reference. Callers that arrive while
//! a load is in flight await the same shared future. Successful loads are kept
//! for the process lifetime; failed loads leave no entry so the next request
//! retries.

use crate::assets::decode::{AudioBuffer, decode_audio};
use crate::assets::fetch::AssetFetcher;
use crate::error::AssetLoadError;
use futures_util::future::{BoxFuture, FutureExt, Shared, join_all};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Outcome of one asset load, shared by every awaiter.
pub type LoadResult = Result<Arc<AudioBuffer>, AssetLoadError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

enum CacheEntry {
    Ready(Arc<AudioBuffer>),
    Loading { load_id: u64, load: SharedLoad },
}

type Entries = Arc<Mutex<HashMap<String, CacheEntry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-wide asset cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AssetCache {
    fetcher: Arc<dyn AssetFetcher>,
    entries: Entries,
    next_load_id: Arc<AtomicU64>,
}

impl AssetCache {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            fetcher,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_load_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Return the decoded buffer for `asset`, loading it if necessary.
    ///
    /// Never starts a second load while one is pending for the same asset.
    pub async fn ensure_loaded(&self, asset: &str) -> LoadResult {
        let load = {
            let mut entries = lock(&self.entries);
            match entries.get(asset) {
                Some(CacheEntry::Ready(buffer)) => return Ok(Arc::clone(buffer)),
                Some(CacheEntry::Loading { load, .. }) => load.clone(),
                None => {
                    let load_id = self.next_load_id.fetch_add(1, Ordering::Relaxed);
                    let load = Self::load(
                        Arc::clone(&self.fetcher),
                        Arc::clone(&self.entries),
                        asset.to_string(),
                        load_id,
                    )
                    .boxed()
                    .shared();
                    entries.insert(
                        asset.to_string(),
                        CacheEntry::Loading {
                            load_id,
                            load: load.clone(),
                        },
                    );
                    load
                }
            }
        };

        load.await
    }

    /// Fetch, decode and settle the cache entry. Runs once per load id.
    async fn load(
        fetcher: Arc<dyn AssetFetcher>,
        entries: Entries,
        asset: String,
        load_id: u64,
    ) -> LoadResult {
        tracing::debug!(asset = %asset, fetcher = fetcher.name(), "loading asset");

        let result = Self::fetch_and_decode(fetcher.as_ref(), &asset).await;

        let mut map = lock(&entries);
        let still_ours = matches!(
            map.get(&asset),
            Some(CacheEntry::Loading { load_id: current, .. }) if *current == load_id
        );
        if still_ours {
            match &result {
                Ok(buffer) => {
                    map.insert(asset.clone(), CacheEntry::Ready(Arc::clone(buffer)));
                }
                Err(_) => {
                    map.remove(&asset);
                }
            }
        }
        drop(map);

        match &result {
            Ok(buffer) => tracing::debug!(
                asset = %asset,
                duration_ms = buffer.duration_ms(),
                "asset ready"
            ),
            Err(e) => tracing::warn!(asset = %asset, "{}", e),
        }
        result
    }

    async fn fetch_and_decode(fetcher: &dyn AssetFetcher, asset: &str) -> LoadResult {
        let bytes = fetcher
            .fetch(asset)
            .await
            .map_err(|message| AssetLoadError::Fetch {
                asset: asset.to_string(),
                message,
            })?;

        let name = asset.to_string();
        let decoded = tokio::task::spawn_blocking(move || decode_audio(&name, bytes))
            .await
            .map_err(|e| AssetLoadError::Decode {
                asset: asset.to_string(),
                message: format!("decode task panicked: {}", e),
            })?
            .map_err(|message| AssetLoadError::Decode {
                asset: asset.to_string(),
                message,
            })?;

        Ok(Arc::new(decoded))
    }

    /// Load every asset concurrently. Failures are logged, not cached.
    ///
    /// Returns the number of assets that loaded successfully.
    pub async fn preload(&self, assets: &[String]) -> usize {
        let results = join_all(assets.iter().map(|a| self.ensure_loaded(a))).await;
        results.iter().filter(|r| r.is_ok()).count()
    }

    /// The decoded buffer for `asset`, if already loaded.
    pub fn cached(&self, asset: &str) -> Option<Arc<AudioBuffer>> {
        match lock(&self.entries).get(asset) {
            Some(CacheEntry::Ready(buffer)) => Some(Arc::clone(buffer)),
            _ => None,
        }
    }

    /// Whether a load for `asset` is currently in flight.
    pub fn is_loading(&self, asset: &str) -> bool {
        matches!(
            lock(&self.entries).get(asset),
            Some(CacheEntry::Loading { .. })
        )
    }

    /// Number of fully loaded assets.
    pub fn ready_count(&self) -> usize {
        lock(&self.entries)
            .values()
            .filter(|e| matches!(e, CacheEntry::Ready(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::decode::tests::make_wav_data;
    use crate::assets::fetch::MockFetcher;
    use std::time::Duration;

    fn beep() -> Vec<u8> {
        make_wav_data(48000, 1, &[4000i16; 480])
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let fetcher = Arc::new(MockFetcher::new().with_asset("lion.wav", beep()));
        let cache = AssetCache::new(fetcher.clone());

        let first = cache.ensure_loaded("lion.wav").await.unwrap();
        let second = cache.ensure_loaded("lion.wav").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fetcher.fetch_count("lion.wav"), 1);
        assert_eq!(cache.ready_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_load() {
        let fetcher = Arc::new(
            MockFetcher::new()
                .with_asset("lion.wav", beep())
                .with_delay(Duration::from_millis(20)),
        );
        let cache = AssetCache::new(fetcher.clone());

        let (a, b) = tokio::join!(
            cache.ensure_loaded("lion.wav"),
            cache.ensure_loaded("lion.wav")
        );

        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(fetcher.fetch_count("lion.wav"), 1);
    }

    #[tokio::test]
    async fn test_pending_load_is_visible() {
        let fetcher = Arc::new(
            MockFetcher::new()
                .with_asset("lion.wav", beep())
                .with_delay(Duration::from_millis(50)),
        );
        let cache = AssetCache::new(fetcher);

        let background = cache.clone();
        let handle = tokio::spawn(async move { background.ensure_loaded("lion.wav").await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(cache.is_loading("lion.wav"));
        assert!(cache.cached("lion.wav").is_none());

        handle.await.unwrap().unwrap();
        assert!(!cache.is_loading("lion.wav"));
        assert!(cache.cached("lion.wav").is_some());
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_no_entry_and_retries() {
        let fetcher = Arc::new(MockFetcher::new().with_failure("broken.wav"));
        let cache = AssetCache::new(fetcher.clone());

        let err = cache.ensure_loaded("broken.wav").await.unwrap_err();
        assert!(matches!(err, AssetLoadError::Fetch { .. }));
        assert_eq!(err.asset(), "broken.wav");
        assert!(!cache.is_loading("broken.wav"));

        let _ = cache.ensure_loaded("broken.wav").await;
        assert_eq!(fetcher.fetch_count("broken.wav"), 2);
    }

    #[tokio::test]
    async fn test_undecodable_asset_is_decode_error() {
        let fetcher = Arc::new(MockFetcher::new().with_asset("noise.mp3", vec![7u8; 64]));
        let cache = AssetCache::new(fetcher);

        let err = cache.ensure_loaded("noise.mp3").await.unwrap_err();
        assert!(matches!(err, AssetLoadError::Decode { .. }));
        assert!(cache.cached("noise.mp3").is_none());
    }

    #[tokio::test]
    async fn test_preload_counts_successes() {
        let fetcher = Arc::new(
            MockFetcher::new()
                .with_asset("a.wav", beep())
                .with_asset("b.wav", beep())
                .with_failure("c.wav"),
        );
        let cache = AssetCache::new(fetcher);

        let loaded = cache
            .preload(&["a.wav".into(), "b.wav".into(), "c.wav".into()])
            .await;

        assert_eq!(loaded, 2);
        assert_eq!(cache.ready_count(), 2);
    }
}
