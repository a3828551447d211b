use std::sync::Arc;

use tracing::{debug, info};

use super::TilePlan;
use crate::item::Item;
use crate::tasks::prefetch::ImageCache;

/// Where the wall is painted.
///
/// Calls are fire-and-forget paint operations; pacing lives in the caller.
pub trait TileSurface: Send + Sync {
    /// Lay out the grid with every tile showing its slice of the front poster.
    fn prepare(&self, plan: &TilePlan);
    /// Flip one tile to its slice of the back poster.
    fn flip(&self, tile: usize);
    /// Replace the grid by the single back poster.
    fn finish(&self, item: &Item, poster_url: &str);
    /// Paint an item without any transition.
    fn show(&self, item: &Item, poster_url: Option<&str>);
    /// Refresh progress and metadata of the item already on screen.
    fn progress(&self, item: &Item);
    /// Opacity of the overlay background layer, `0.0..=1.0`.
    fn background_overlay(&self, url: Option<&str>, opacity: f32);
    fn background_base(&self, url: Option<&str>);
}

/// Headless surface that narrates paint operations through `tracing`.
pub struct LogSurface {
    cache: Arc<ImageCache>,
}

impl LogSurface {
    pub fn new(cache: Arc<ImageCache>) -> Self {
        Self { cache }
    }

    /// Size of a prefetched image, or zero when it has to be loaded on demand.
    fn cached_len(&self, url: &str) -> usize {
        self.cache.get(url).map_or(0, |bytes| bytes.len())
    }
}

impl TileSurface for LogSurface {
    fn prepare(&self, plan: &TilePlan) {
        debug!(
            tiles = plan.tiles.len(),
            front_bytes = self.cached_len(&plan.front_url),
            back_bytes = self.cached_len(&plan.back_url),
            cached = self.cache.len(),
            total = %humantime::format_duration(plan.completes_after),
            "tile grid prepared"
        );
    }

    fn flip(&self, tile: usize) {
        debug!(tile, "tile flipped");
    }

    fn finish(&self, item: &Item, poster_url: &str) {
        info!(item = %item.label(), poster = poster_url, "poster on wall");
    }

    fn show(&self, item: &Item, poster_url: Option<&str>) {
        info!(item = %item.label(), poster = poster_url, "poster shown");
    }

    fn progress(&self, item: &Item) {
        match item.progress() {
            Some(progress) => debug!(
                item = %item.label(),
                percent = (progress * 100.0).round() as u32,
                user = %item.user,
                "playback progress"
            ),
            None => debug!(item = %item.label(), "playback progress unknown"),
        }
    }

    fn background_overlay(&self, url: Option<&str>, opacity: f32) {
        debug!(background = url, opacity, "background overlay");
    }

    fn background_base(&self, url: Option<&str>) {
        debug!(background = url, "background swapped");
    }
}
