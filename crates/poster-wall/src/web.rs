use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::relay::ImageRelay;
use crate::source::{WallRequest, WallService};

const MAX_BATCH_COUNT: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub wall: WallService,
    pub relay: ImageRelay,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/wall", get(wall_snapshot))
        .route("/api/image", get(relay_image))
        .route("/healthz", get(healthz))
        .with_state(state)
}

pub async fn serve(
    config: &ServerConfig,
    state: AppState,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = SocketAddr::new(
        config
            .bind_address
            .parse()
            .with_context(|| format!("invalid bind address {}", config.bind_address))?,
        config.port,
    );
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind wall listener on {addr}"))?;
    info!(?addr, "wall server listening");

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("wall server exited")?;
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WallQuery {
    batch: Option<String>,
    count: Option<usize>,
    seed: Option<u64>,
}

impl WallQuery {
    fn into_request(self) -> WallRequest {
        let batch = self
            .batch
            .as_deref()
            .is_some_and(|raw| matches!(raw, "1" | "true" | "yes"));
        WallRequest {
            batch,
            count: self.count.map(|c| c.clamp(1, MAX_BATCH_COUNT)),
            seed: self.seed,
        }
    }
}

async fn wall_snapshot(State(state): State<AppState>, Query(query): Query<WallQuery>) -> Response {
    let request = query.into_request();
    let snapshot = state.wall.snapshot(request).await;
    debug!(
        streams = snapshot.active_streams.len(),
        random = snapshot.random_items.len(),
        batch = request.batch,
        "wall snapshot served"
    );
    Json(snapshot).into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageQuery {
    #[serde(rename = "ref")]
    reference: Option<String>,
}

async fn relay_image(State(state): State<AppState>, Query(query): Query<ImageQuery>) -> Response {
    let image = state.relay.fetch(query.reference.as_deref()).await;
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, image.content_type),
            (header::CACHE_CONTROL, image.cache_control.to_string()),
        ],
        image.bytes,
    )
        .into_response()
}

async fn healthz() -> &'static str {
    "ok"
}
