//! Preview server for a tile cache.
//!
//! - `/` serves the map viewer page.
//! - `/cache/...` serves the cached tiles as static files.
//! - `/generate/{tier}/{lat1}/{lon1}/{lat2}/{lon2}` fetches a bounding box
//!   into the cache and streams the progress as newline-delimited JSON.
//! - `/status` answers `ready!`.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{debug, info};

use crate::bounding_box::BoundingBox;
use crate::cache::TileCache;
use crate::error::{Error, Result, ValidationError};
use crate::error_log::ErrorLog;
use crate::fetch::{FetchOptions, FetchPlan, Fetcher};
use crate::progress::FetchEvent;
use crate::source::TileSource;
use crate::tile::Tile;
use crate::url::UrlFormat;
use crate::zoom::ZoomTier;

const VIEWER_PAGE: &str = include_str!("../assets/index.html");
const NDJSON: &str = "application/x-ndjson";

/// Everything the request handlers share.
#[derive(Clone)]
pub struct ServerState {
    pub cache: TileCache,
    pub source: Arc<dyn TileSource>,
    pub url: Arc<UrlFormat>,
    /// Options of runs started through `/generate`.
    pub options: FetchOptions,
    pub error_log: Option<ErrorLog>,
    /// Stops the server and every run it started.
    pub shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(cache: TileCache, source: Arc<dyn TileSource>, url: Arc<UrlFormat>) -> Self {
        Self {
            cache,
            source,
            url,
            options: FetchOptions::default(),
            error_log: None,
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn router(state: ServerState) -> Router {
    let cache_dir = ServeDir::new(state.cache.root());

    Router::new()
        .route("/", get(viewer))
        .route("/status", get(|| async { "ready!" }))
        .route("/generate/:tier/:lat1/:lon1/:lat2/:lon2", get(generate))
        .nest_service("/cache", cache_dir)
        .with_state(state)
}

/// Serves until the state's shutdown token is cancelled.
pub async fn serve(listener: TcpListener, state: ServerState) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let addr = listener.local_addr()?;
    info!(
        %addr,
        root = %state.cache.root().display(),
        "preview server listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("preview server stopped");
    Ok(())
}

async fn viewer() -> Html<&'static str> {
    Html(VIEWER_PAGE)
}

#[derive(Debug, Default, Deserialize)]
struct GenerateQuery {
    #[serde(default)]
    fast: bool,
}

async fn generate(
    State(state): State<ServerState>,
    Path((tier, lat1, lon1, lat2, lon2)): Path<(String, f64, f64, f64, f64)>,
    Query(query): Query<GenerateQuery>,
) -> Response {
    debug!(%tier, lat1, lon1, lat2, lon2, "handle generate request");

    let tier = match tier.parse::<ZoomTier>() {
        Ok(tier) => tier,
        Err(err) => return rejection(StatusCode::NOT_FOUND, &err),
    };
    let plan = match BoundingBox::new_deg(lat1, lon1, lat2, lon2)
        .and_then(|bbox| FetchPlan::new(&bbox, &[tier]))
    {
        Ok(plan) => plan,
        Err(err) => return rejection(StatusCode::BAD_REQUEST, &err),
    };

    let options = if query.fast {
        state.options.fast()
    } else {
        state.options
    };
    let mut fetcher = Fetcher::new(state.source.clone(), state.url.clone(), state.cache.clone())
        .with_options(options)
        .with_cancellation(state.shutdown.child_token());
    if let Some(log) = &state.error_log {
        fetcher = fetcher.with_error_log(log.clone());
    }

    let lines = fetcher
        .run(plan)
        .map(|item| Ok::<_, Infallible>(ndjson_line(&item)));

    ([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(lines)).into_response()
}

#[derive(Serialize)]
struct ErrorLine<'a> {
    event: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tile: Option<&'a Tile>,
}

fn ndjson_line(item: &Result<FetchEvent, Error>) -> String {
    let json = match item {
        Ok(event) => serde_json::to_string(event),
        Err(err) => serde_json::to_string(&ErrorLine {
            event: "error",
            message: err.to_string(),
            tile: err.tile(),
        }),
    };

    let mut line = match json {
        Ok(line) => line,
        Err(e) => format!("{{\"event\":\"error\",\"message\":{:?}}}", e.to_string()),
    };
    line.push('\n');
    line
}

fn rejection(status: StatusCode, err: &ValidationError) -> Response {
    debug!(%status, "rejecting generate request: {}", err);

    let body = ErrorLine {
        event: "error",
        message: err.to_string(),
        tile: None,
    };
    (status, Json(body)).into_response()
}
