//! Raw byte retrieval for sound assets and mapping documents.
//!
//! Asset references are opaque locators (usually relative paths). A fetcher
//! resolves them against a base directory or base URL.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Byte source for sound assets.
///
/// Errors are plain messages; the cache wraps them into `AssetLoadError`
/// together with the asset reference.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, asset: &str) -> Result<Vec<u8>, String>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "fetcher"
    }
}

fn is_http(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

/// Read a whole locator (file path or http(s) URL) into memory.
pub async fn read_locator(locator: &str) -> Result<Vec<u8>, String> {
    if is_http(locator) {
        http_get(locator).await
    } else {
        tokio::fs::read(locator)
            .await
            .map_err(|e| format!("{}: {}", locator, e))
    }
}

#[cfg(feature = "http")]
async fn http_get(url: &str) -> Result<Vec<u8>, String> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| format!("request to {} failed: {}", url, e))?;

    if !response.status().is_success() {
        return Err(format!("{} returned status {}", url, response.status()));
    }

    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| format!("reading body of {} failed: {}", url, e))
}

#[cfg(not(feature = "http"))]
async fn http_get(url: &str) -> Result<Vec<u8>, String> {
    Err(format!("{}: built without http support", url))
}

/// Pick a fetcher for a base locator: http(s) URLs get [`HttpFetcher`],
/// anything else is treated as a directory.
pub fn fetcher_for_base(base: &str) -> Arc<dyn AssetFetcher> {
    if is_http(base) {
        Arc::new(HttpFetcher::new(base))
    } else {
        Arc::new(FileFetcher::new(base))
    }
}

/// Reads assets from a directory on disk.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    base: PathBuf,
}

impl FileFetcher {
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, asset: &str) -> PathBuf {
        let path = Path::new(asset);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        }
    }
}

#[async_trait]
impl AssetFetcher for FileFetcher {
    async fn fetch(&self, asset: &str) -> Result<Vec<u8>, String> {
        let path = self.resolve(asset);
        tokio::fs::read(&path)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Fetches assets relative to a base URL.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    base: String,
}

impl HttpFetcher {
    pub fn new(base: &str) -> Self {
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{}/", base)
        };
        Self { base }
    }

    fn resolve(&self, asset: &str) -> String {
        if is_http(asset) {
            asset.to_string()
        } else {
            format!("{}{}", self.base, asset.trim_start_matches("./"))
        }
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, asset: &str) -> Result<Vec<u8>, String> {
        http_get(&self.resolve(asset)).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// In-memory fetcher for testing.
///
/// Counts fetches per asset and can delay or fail specific assets.
#[derive(Debug, Default)]
pub struct MockFetcher {
    assets: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    asset_delays: HashMap<String, Duration>,
    fetches: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` for `asset`.
    pub fn with_asset(mut self, asset: &str, bytes: Vec<u8>) -> Self {
        self.assets.insert(asset.to_string(), bytes);
        self
    }

    /// Fail every fetch of `asset`.
    pub fn with_failure(mut self, asset: &str) -> Self {
        self.failing.insert(asset.to_string());
        self
    }

    /// Suspend each fetch for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Suspend fetches of `asset` only.
    pub fn with_asset_delay(mut self, asset: &str, delay: Duration) -> Self {
        self.asset_delays.insert(asset.to_string(), delay);
        self
    }

    /// Number of fetches issued for `asset`.
    pub fn fetch_count(&self, asset: &str) -> usize {
        self.fetches
            .lock()
            .map(|f| f.get(asset).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of fetches issued overall.
    pub fn total_fetches(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetFetcher for MockFetcher {
    async fn fetch(&self, asset: &str) -> Result<Vec<u8>, String> {
        self.total.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut fetches) = self.fetches.lock() {
            *fetches.entry(asset.to_string()).or_insert(0) += 1;
        }

        if let Some(delay) = self.asset_delays.get(asset).copied().or(self.delay) {
            tokio::time::sleep(delay).await;
        }

        if self.failing.contains(asset) {
            return Err("status 404 Not Found".to_string());
        }
        self.assets
            .get(asset)
            .cloned()
            .ok_or_else(|| format!("unknown asset {}", asset))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
