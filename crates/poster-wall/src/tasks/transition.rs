//! Tile-flip crossfade between two posters, with a concurrent background fade.

pub mod surface;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::debug;

use crate::config::TransitionOptions;
use crate::item::Item;
use crate::relay::image_url;
use surface::TileSurface;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{item} has no poster to transition {side}")]
    MissingPoster { item: String, side: &'static str },
    #[error("transition task ended abnormally: {0}")]
    Aborted(String),
}

/// Fractional source rectangle of one tile within a poster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// Row-major position in the grid.
    pub index: usize,
    pub row: u32,
    pub column: u32,
    pub crop: CropRect,
    /// Offset from the start of the transition at which this tile flips.
    pub delay: Duration,
}

/// One transition's schedule: tiles in flip order with spread delays.
#[derive(Debug, Clone)]
pub struct TilePlan {
    pub tiles: Vec<Tile>,
    pub front_url: String,
    pub back_url: String,
    pub completes_after: Duration,
}

impl TilePlan {
    pub fn build<R: Rng + ?Sized>(
        options: &TransitionOptions,
        front_url: String,
        back_url: String,
        rng: &mut R,
    ) -> Self {
        let (rows, columns) = (options.rows.max(1), options.columns.max(1));
        let width = 1.0 / columns as f32;
        let height = 1.0 / rows as f32;
        let mut tiles: Vec<Tile> = (0..rows)
            .flat_map(|row| (0..columns).map(move |column| (row, column)))
            .enumerate()
            .map(|(index, (row, column))| Tile {
                index,
                row,
                column,
                crop: CropRect {
                    x: column as f32 * width,
                    y: row as f32 * height,
                    width,
                    height,
                },
                delay: Duration::ZERO,
            })
            .collect();
        tiles.shuffle(rng);

        let count = tiles.len() as u32;
        for (rank, tile) in tiles.iter_mut().enumerate() {
            tile.delay = options.duration * rank as u32 / count;
        }
        let last = tiles.last().map_or(Duration::ZERO, |t| t.delay);
        Self {
            tiles,
            front_url,
            back_url,
            completes_after: last + options.settle,
        }
    }
}

/// Runs transitions against a [`TileSurface`].
#[derive(Clone)]
pub struct TransitionController {
    options: TransitionOptions,
    surface: Arc<dyn TileSurface>,
    image_base: String,
}

impl TransitionController {
    pub fn new(
        options: TransitionOptions,
        surface: Arc<dyn TileSurface>,
        image_base: impl Into<String>,
    ) -> Self {
        Self {
            options,
            surface,
            image_base: image_base.into(),
        }
    }

    pub fn poster_url(&self, item: &Item) -> Option<String> {
        item.poster_ref().map(|r| image_url(&self.image_base, r))
    }

    pub fn background_url(&self, item: &Item) -> Option<String> {
        item.background_ref().map(|r| image_url(&self.image_base, r))
    }

    /// Flips `from` into `to`. Fails before touching the surface if either poster is missing.
    pub async fn run(&self, from: &Item, to: &Item) -> Result<(), TransitionError> {
        let front_url = self.poster_url(from).ok_or_else(|| TransitionError::MissingPoster {
            item: from.label(),
            side: "from",
        })?;
        let back_url = self.poster_url(to).ok_or_else(|| TransitionError::MissingPoster {
            item: to.label(),
            side: "to",
        })?;
        let plan = TilePlan::build(&self.options, front_url, back_url, &mut rand::rng());

        self.surface.prepare(&plan);
        let started = Instant::now();
        let tiles = async {
            for tile in &plan.tiles {
                sleep_until(started + tile.delay).await;
                self.surface.flip(tile.index);
            }
            sleep_until(started + plan.completes_after).await;
        };
        tokio::join!(tiles, self.crossfade_background(self.background_url(to)));

        self.surface.finish(to, &plan.back_url);
        debug!(
            item = %to.label(),
            elapsed = %humantime::format_duration(started.elapsed()),
            "transition complete"
        );
        Ok(())
    }

    /// Paints an item directly, background included.
    pub fn show(&self, item: &Item) {
        self.surface
            .background_base(self.background_url(item).as_deref());
        self.surface.show(item, self.poster_url(item).as_deref());
    }

    pub fn progress(&self, item: &Item) {
        self.surface.progress(item);
    }

    /// Ramps the overlay in, swaps the base layer underneath, then ramps it out.
    async fn crossfade_background(&self, url: Option<String>) {
        let steps = self.options.background_steps.max(1);
        let step = self.options.background_fade / (steps * 2);
        let url = url.as_deref();
        for s in 1..=steps {
            self.surface.background_overlay(url, s as f32 / steps as f32);
            sleep(step).await;
        }
        self.surface.background_base(url);
        for s in (0..steps).rev() {
            self.surface.background_overlay(url, s as f32 / steps as f32);
            sleep(step).await;
        }
    }
}
