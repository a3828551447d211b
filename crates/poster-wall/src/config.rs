use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct MediaServerConfig {
    /// Base URL of the media server, e.g. `http://plex.local:32400`.
    pub url: String,
    /// Access token sent with every upstream request.
    pub token: Option<String>,
    /// Upper bound for any single upstream request.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for MediaServerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8089,
        }
    }
}

/// Rotation engine pacing and variety controls.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct WallOptions {
    /// Base URL of the wall endpoint the engine polls.
    pub endpoint: String,
    /// Items requested per idle batch.
    pub batch_size: usize,
    #[serde(with = "humantime_serde")]
    pub rotation_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub probe_interval: Duration,
    /// Coarse periodic batch refresh; also the elapsed-time refresh threshold.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Displays within one batch before a fresh batch is requested.
    pub refresh_after_displays: u32,
    /// Upper bound of the recently-seen exclusion window.
    pub recent_window: usize,
    /// How many upcoming items are warmed after each display (1-3).
    pub prefetch_count: usize,
    /// Fixed seed for next-item selection; random when absent.
    pub selection_seed: Option<u64>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Prefetched images kept in memory.
    pub image_cache_capacity: usize,
}

impl Default for WallOptions {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8089".to_string(),
            batch_size: 15,
            rotation_interval: Duration::from_secs(8),
            probe_interval: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(10 * 60),
            refresh_after_displays: 20,
            recent_window: 5,
            prefetch_count: 3,
            selection_seed: None,
            request_timeout: Duration::from_secs(30),
            image_cache_capacity: 64,
        }
    }
}

impl WallOptions {
    fn validate(&self) -> Result<()> {
        ensure!(!self.endpoint.is_empty(), "wall.endpoint must not be empty");
        ensure!(self.batch_size > 0, "wall.batch-size must be greater than zero");
        ensure!(
            !self.rotation_interval.is_zero(),
            "wall.rotation-interval must be positive"
        );
        ensure!(
            !self.probe_interval.is_zero(),
            "wall.probe-interval must be positive"
        );
        ensure!(
            !self.refresh_interval.is_zero(),
            "wall.refresh-interval must be positive"
        );
        ensure!(
            self.refresh_after_displays > 0,
            "wall.refresh-after-displays must be greater than zero"
        );
        ensure!(self.recent_window > 0, "wall.recent-window must be >= 1");
        ensure!(
            (1..=3).contains(&self.prefetch_count),
            "wall.prefetch-count must be between 1 and 3"
        );
        ensure!(
            !self.request_timeout.is_zero(),
            "wall.request-timeout must be positive"
        );
        Ok(())
    }
}

/// Tile-flip crossfade geometry and timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct TransitionOptions {
    pub rows: u32,
    pub columns: u32,
    /// Window across which tile flips are spread.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Delay after the last scheduled flip before the transition completes.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    /// Total time of the background overlay ramp in and out.
    #[serde(with = "humantime_serde")]
    pub background_fade: Duration,
    pub background_steps: u32,
}

impl Default for TransitionOptions {
    fn default() -> Self {
        Self {
            rows: 12,
            columns: 8,
            duration: Duration::from_millis(2500),
            settle: Duration::from_millis(700),
            background_fade: Duration::from_millis(800),
            background_steps: 16,
        }
    }
}

impl TransitionOptions {
    pub fn tile_count(&self) -> usize {
        self.rows as usize * self.columns as usize
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.rows > 0 && self.columns > 0,
            "transition grid must be at least 1x1"
        );
        ensure!(
            !self.duration.is_zero(),
            "transition.duration must be positive"
        );
        ensure!(
            self.background_steps > 0,
            "transition.background-steps must be greater than zero"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SamplerOptions {
    /// Largest randomized page offset requested from a library.
    pub max_offset: u64,
    /// Cap on the per-library page size.
    pub max_page_size: u64,
    /// Per-library page size is `count * oversample-factor`, capped.
    pub oversample_factor: u64,
    pub shuffle_passes: u32,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            max_offset: 500,
            max_page_size: 100,
            oversample_factor: 3,
            shuffle_passes: 3,
        }
    }
}

impl SamplerOptions {
    pub fn page_size(&self, count: usize) -> u64 {
        (count as u64)
            .saturating_mul(self.oversample_factor)
            .min(self.max_page_size)
            .max(1)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.max_page_size > 0,
            "sampler.max-page-size must be greater than zero"
        );
        ensure!(
            self.oversample_factor > 0,
            "sampler.oversample-factor must be greater than zero"
        );
        ensure!(
            self.shuffle_passes >= 3,
            "sampler.shuffle-passes must be at least 3"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Upstream media server queried for sessions, libraries and images.
    pub media_server: MediaServerConfig,
    /// Listener for the wall and image relay endpoints.
    pub server: ServerConfig,
    /// Rotation engine behaviour.
    pub wall: WallOptions,
    /// Tile-flip transition between posters.
    pub transition: TransitionOptions,
    /// Idle-content sampling across libraries.
    pub sampler: SamplerOptions,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.media_server.url.is_empty() || self.media_server.url.starts_with("http"),
            "media-server.url must be an http(s) URL"
        );
        ensure!(
            !self.media_server.timeout.is_zero(),
            "media-server.timeout must be positive"
        );
        self.server
            .bind_address
            .parse::<IpAddr>()
            .with_context(|| format!("invalid server.bind-address {}", self.server.bind_address))?;
        self.wall
            .validate()
            .context("invalid wall configuration")?;
        self.transition
            .validate()
            .context("invalid transition configuration")?;
        self.sampler
            .validate()
            .context("invalid sampler configuration")?;
        Ok(self)
    }

    /// Server-side commands need an upstream to talk to.
    pub fn require_media_server(&self) -> Result<()> {
        ensure!(
            !self.media_server.url.is_empty(),
            "media-server.url is required for this command"
        );
        Ok(())
    }
}
