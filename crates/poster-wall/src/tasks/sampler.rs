use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, info, warn};

use crate::config::SamplerOptions;
use crate::item::Item;
use crate::media::{LibrarySection, MediaServer};

/// Builds idle-rotation batches from random slices of the eligible libraries.
///
/// Rules:
/// - Only movie/show sections are visited, in shuffled order.
/// - Each section is read at a randomized offset so the leading page is not favoured.
/// - Items are deduplicated by key, keeping the first occurrence.
/// - The pool is shuffled repeatedly, posters first, then sliced to `count`.
/// - A seed makes the whole pipeline reproducible for identical upstream data.
#[derive(Clone)]
pub struct LibrarySampler {
    server: Arc<dyn MediaServer>,
    options: SamplerOptions,
}

impl LibrarySampler {
    pub fn new(server: Arc<dyn MediaServer>, options: SamplerOptions) -> Self {
        Self { server, options }
    }

    /// Never fails; an unreachable upstream yields fewer items or none at all.
    pub async fn sample(&self, count: usize, seed: Option<u64>) -> Vec<Item> {
        if count == 0 {
            return Vec::new();
        }
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut sections: Vec<LibrarySection> = match self.server.libraries().await {
            Ok(sections) => sections.into_iter().filter(|s| s.is_eligible()).collect(),
            Err(err) => {
                warn!(error = %err, "library listing unavailable; sampling nothing");
                return Vec::new();
            }
        };
        if sections.is_empty() {
            debug!("no eligible libraries to sample");
            return Vec::new();
        }
        sections.shuffle(&mut rng);

        let page_size = self.options.page_size(count);
        let mut pool = Vec::new();
        for section in &sections {
            pool.extend(self.sample_section(section, page_size, &mut rng).await);
        }

        let gathered = pool.len();
        let unique = dedupe_by_key(pool);
        let batch = finalize_batch(unique, count, self.options.shuffle_passes, &mut rng);
        info!(
            libraries = sections.len(),
            gathered,
            requested = count,
            returned = batch.len(),
            seeded = seed.is_some(),
            "library sample assembled"
        );
        batch
    }

    async fn sample_section(
        &self,
        section: &LibrarySection,
        page_size: u64,
        rng: &mut StdRng,
    ) -> Vec<Item> {
        let offset = rng.random_range(0..=self.options.max_offset);
        let page = match self.server.library_page(section, offset, page_size).await {
            Ok(page) => page,
            Err(err) => {
                warn!(section = %section.title, error = %err, "library page failed; skipping");
                return Vec::new();
            }
        };
        if !page.items.is_empty() || offset == 0 || page.total_size == 0 {
            return page.items;
        }

        // Offset landed past the end of a small library; retry inside its reported size.
        let retry_offset = rng.random_range(0..=page.total_size.saturating_sub(page_size));
        debug!(
            section = %section.title,
            offset,
            retry_offset,
            total = page.total_size,
            "library offset past end; retrying"
        );
        match self
            .server
            .library_page(section, retry_offset, page_size)
            .await
        {
            Ok(page) => page.items,
            Err(err) => {
                warn!(section = %section.title, error = %err, "library retry failed; skipping");
                Vec::new()
            }
        }
    }
}

pub(crate) fn dedupe_by_key(items: Vec<Item>) -> Vec<Item> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.key()))
        .collect()
}

fn finalize_batch(mut pool: Vec<Item>, count: usize, passes: u32, rng: &mut StdRng) -> Vec<Item> {
    for _ in 0..passes.max(1) {
        pool.shuffle(rng);
    }
    let (mut batch, remainder): (Vec<Item>, Vec<Item>) = pool
        .into_iter()
        .partition(|item| item.poster_ref().is_some());
    batch.truncate(count);
    let missing = count.saturating_sub(batch.len());
    batch.extend(remainder.into_iter().take(missing));
    batch
}
