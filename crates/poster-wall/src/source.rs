//! The probe/sample endpoint contract and the two ways the engine can reach it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SamplerOptions;
use crate::item::Item;
use crate::media::MediaServer;
use crate::tasks::probe::StreamProbe;
use crate::tasks::sampler::LibrarySampler;

/// Parameters of one wall request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WallRequest {
    /// Ask for a fresh idle batch alongside the stream probe.
    pub batch: bool,
    pub count: Option<usize>,
    pub seed: Option<u64>,
}

impl WallRequest {
    pub fn probe() -> Self {
        Self::default()
    }

    pub fn batch(count: usize, seed: Option<u64>) -> Self {
        Self {
            batch: true,
            count: Some(count),
            seed,
        }
    }
}

/// Endpoint response: non-empty `active_streams` means streaming mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WallSnapshot {
    pub active_streams: Vec<Item>,
    pub random_items: Vec<Item>,
    /// Unix seconds at which the snapshot was assembled.
    pub timestamp: i64,
}

#[async_trait]
pub trait WallSource: Send + Sync {
    async fn fetch(&self, request: WallRequest) -> Result<WallSnapshot>;
}

/// Server-side composition of the stream probe and library sampler.
#[derive(Clone)]
pub struct WallService {
    probe: StreamProbe,
    sampler: LibrarySampler,
    default_count: usize,
}

impl WallService {
    pub fn new(
        server: Arc<dyn MediaServer>,
        sampler: SamplerOptions,
        default_count: usize,
    ) -> Self {
        Self {
            probe: StreamProbe::new(server.clone()),
            sampler: LibrarySampler::new(server, sampler),
            default_count,
        }
    }

    /// Infallible: both collaborators degrade to empty sequences.
    pub async fn snapshot(&self, request: WallRequest) -> WallSnapshot {
        let active_streams = self.probe.active_streams().await;
        let random_items = if request.batch {
            let count = request.count.unwrap_or(self.default_count);
            self.sampler.sample(count, request.seed).await
        } else {
            Vec::new()
        };
        WallSnapshot {
            active_streams,
            random_items,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[async_trait]
impl WallSource for WallService {
    async fn fetch(&self, request: WallRequest) -> Result<WallSnapshot> {
        Ok(self.snapshot(request).await)
    }
}

/// Client for a remote `/api/wall` endpoint.
#[derive(Debug, Clone)]
pub struct HttpWallSource {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpWallSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build wall endpoint client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/api/wall", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl WallSource for HttpWallSource {
    async fn fetch(&self, request: WallRequest) -> Result<WallSnapshot> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if request.batch {
            query.push(("batch", "1".to_string()));
        }
        if let Some(count) = request.count {
            query.push(("count", count.to_string()));
        }
        if let Some(seed) = request.seed {
            query.push(("seed", seed.to_string()));
        }
        let snapshot = self
            .http
            .get(&self.endpoint)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("wall endpoint {} unreachable", self.endpoint))?
            .error_for_status()
            .context("wall endpoint returned an error status")?
            .json::<WallSnapshot>()
            .await
            .context("wall endpoint returned an invalid snapshot")?;
        Ok(snapshot)
    }
}
