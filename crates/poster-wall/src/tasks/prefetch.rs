use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::item::Item;
use crate::relay::image_url;

#[async_trait]
pub trait ImageFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

pub struct HttpImageFetch {
    http: reqwest::Client,
}

impl HttpImageFetch {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build image client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ImageFetch for HttpImageFetch {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("image request to {url} failed"))?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes)
    }
}

/// Bounded in-memory image store; the oldest entry is evicted first.
pub struct ImageCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    order: VecDeque<String>,
    entries: HashMap<String, Bytes>,
}

impl ImageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn insert(&self, url: String, bytes: Bytes) {
        let mut inner = self.inner.lock();
        if inner.entries.insert(url.clone(), bytes).is_none() {
            inner.order.push_back(url);
        }
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
    }

    pub fn get(&self, url: &str) -> Option<Bytes> {
        self.inner.lock().entries.get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Warms the image cache ahead of display.
///
/// Every URL is requested at most once per wall run, even after the cache has
/// evicted it. Only a failed fetch frees its URL for a later retry.
#[derive(Clone)]
pub struct ImagePrefetcher {
    fetcher: Arc<dyn ImageFetch>,
    cache: Arc<ImageCache>,
    image_base: String,
    requested: Arc<Mutex<HashSet<String>>>,
}

impl ImagePrefetcher {
    pub fn new(
        fetcher: Arc<dyn ImageFetch>,
        cache: Arc<ImageCache>,
        image_base: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            cache,
            image_base: image_base.into(),
            requested: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Starts a fetch for every poster and background not requested before.
    pub fn warm(&self, items: &[Item]) -> Vec<JoinHandle<()>> {
        let urls: Vec<String> = items
            .iter()
            .flat_map(|item| [item.poster_ref(), item.background_ref()])
            .flatten()
            .map(|r| image_url(&self.image_base, r))
            .collect();

        let mut started = Vec::new();
        for url in urls {
            if !self.requested.lock().insert(url.clone()) {
                continue;
            }
            let fetcher = self.fetcher.clone();
            let cache = self.cache.clone();
            let requested = self.requested.clone();
            started.push(tokio::spawn(async move {
                match fetcher.fetch(&url).await {
                    Ok(bytes) => {
                        debug!(url = %url, bytes = bytes.len(), "image prefetched");
                        cache.insert(url, bytes);
                    }
                    Err(err) => {
                        debug!(url = %url, error = %err, "image prefetch failed");
                        requested.lock().remove(&url);
                    }
                }
            }));
        }
        started
    }
}
