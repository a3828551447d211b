use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use poster_wall::config::{self, Configuration};
use poster_wall::events::WallEvent;
use poster_wall::media::{MediaServer, PlexClient};
use poster_wall::relay::ImageRelay;
use poster_wall::source::{HttpWallSource, WallService, WallSource};
use poster_wall::tasks::engine::{self, state::RotationEngine};
use poster_wall::tasks::prefetch::{HttpImageFetch, ImageCache, ImagePrefetcher};
use poster_wall::tasks::sampler::LibrarySampler;
use poster_wall::tasks::transition::TransitionController;
use poster_wall::tasks::transition::surface::LogSurface;
use poster_wall::web::{self, AppState};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "poster-wall",
    version,
    about = "poster wall for a Plex-compatible media server"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the wall snapshot and image relay endpoints
    Serve,
    /// Run the rotation engine against the wall endpoint
    Wall {
        /// Sample the media server in-process and serve the relay alongside the engine
        #[arg(long)]
        direct: bool,
    },
    /// Print one idle batch without starting anything
    Sample {
        #[arg(long, value_name = "COUNT")]
        count: Option<usize>,
        /// Deterministic RNG seed for sampling
        #[arg(long, value_name = "SEED")]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // init tracing (RUST_LOG controls level, default = info)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let Args { config, command } = Args::parse();
    let cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?
        .validated()
        .context("invalid configuration values")?;
    tracing::debug!("Loaded configuration from {}:\n{:#?}", config.display(), cfg);

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    match command {
        Command::Sample { count, seed } => {
            return run_sample(&cfg, count.unwrap_or(cfg.wall.batch_size), seed).await;
        }
        Command::Serve => {
            let state = app_state(&cfg)?;
            spawn_server(&mut tasks, &cfg, state, cancel.clone());
        }
        Command::Wall { direct: false } => {
            let source: Arc<dyn WallSource> = Arc::new(
                HttpWallSource::new(&cfg.wall.endpoint, cfg.wall.request_timeout)
                    .context("failed to build wall endpoint client")?,
            );
            spawn_engine(&mut tasks, &cfg, source, cfg.wall.endpoint.clone(), cancel.clone())?;
        }
        Command::Wall { direct: true } => {
            let state = app_state(&cfg)?;
            let source: Arc<dyn WallSource> = Arc::new(state.wall.clone());
            let local = format!("http://127.0.0.1:{}", cfg.server.port);
            spawn_server(&mut tasks, &cfg, state, cancel.clone());
            spawn_engine(&mut tasks, &cfg, source, local, cancel.clone())?;
        }
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    // Drain JoinSet; the first task to exit takes the others down with it
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
        cancel.cancel();
    }

    Ok(())
}

fn media_server(cfg: &Configuration) -> Result<Arc<dyn MediaServer>> {
    cfg.require_media_server()?;
    let client =
        PlexClient::new(&cfg.media_server).context("failed to build media server client")?;
    Ok(Arc::new(client))
}

fn app_state(cfg: &Configuration) -> Result<AppState> {
    let server = media_server(cfg)?;
    Ok(AppState {
        wall: WallService::new(server.clone(), cfg.sampler.clone(), cfg.wall.batch_size),
        relay: ImageRelay::new(server),
    })
}

fn spawn_server(
    tasks: &mut JoinSet<Result<()>>,
    cfg: &Configuration,
    state: AppState,
    cancel: CancellationToken,
) {
    let server_cfg: config::ServerConfig = cfg.server.clone();
    tasks.spawn(async move {
        web::serve(&server_cfg, state, cancel)
            .await
            .context("wall server failed")
    });
}

fn spawn_engine(
    tasks: &mut JoinSet<Result<()>>,
    cfg: &Configuration,
    source: Arc<dyn WallSource>,
    image_base: String,
    cancel: CancellationToken,
) -> Result<()> {
    let cache = Arc::new(ImageCache::new(cfg.wall.image_cache_capacity));
    let fetcher = Arc::new(HttpImageFetch::new(cfg.wall.request_timeout)?);
    let prefetcher = ImagePrefetcher::new(fetcher, cache.clone(), image_base.clone());
    let transitions = TransitionController::new(
        cfg.transition.clone(),
        Arc::new(LogSurface::new(cache)),
        image_base,
    );
    let engine = RotationEngine::new(cfg.wall.clone(), tokio::time::Instant::now());
    let (events_tx, mut events_rx) = mpsc::channel::<WallEvent>(64); // Engine -> log

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                WallEvent::Displayed { item, mode } => {
                    tracing::info!(item = %item.label(), ?mode, "now showing")
                }
                WallEvent::ModeChanged { from, to, streams } => {
                    tracing::info!(?from, ?to, streams, "wall mode changed")
                }
                WallEvent::BatchLoaded { items } => tracing::debug!(items, "batch loaded"),
                WallEvent::Progress(item) => tracing::debug!(item = %item.label(), "progress"),
            }
        }
    });

    tasks.spawn(async move {
        engine::run(engine, source, transitions, prefetcher, events_tx, cancel)
            .await
            .context("rotation engine failed")
    });
    Ok(())
}

async fn run_sample(cfg: &Configuration, count: usize, seed: Option<u64>) -> Result<()> {
    let sampler = LibrarySampler::new(media_server(cfg)?, cfg.sampler.clone());
    let batch = sampler.sample(count, seed).await;

    println!(
        "# library sample\n# requested: {}\n# returned: {}\n# seed: {}\n",
        count,
        batch.len(),
        seed.map_or_else(|| "(random)".to_string(), |s| s.to_string())
    );
    if batch.is_empty() {
        println!("(no items sampled)");
        return Ok(());
    }
    for (idx, item) in batch.iter().enumerate() {
        let poster = if item.poster_ref().is_some() { "" } else { "  [no poster]" };
        println!("  {:>4}: {}{}", idx + 1, item.label(), poster);
    }
    Ok(())
}
