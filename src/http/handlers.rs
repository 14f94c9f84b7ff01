//! HTTP request handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode, Uri},
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use crate::mux;
use crate::path::resolve_stream_path;
use crate::relay;
use crate::state::AppState;

/// Interval between pushed list snapshots on the continuous list endpoint
const LIST_PUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Version endpoint
pub async fn version_check() -> &'static str {
    concat!("hdl-server v", env!("CARGO_PKG_VERSION"))
}

/// FLV playback endpoint
/// GET /hdl/{path}[.flv] and GET /{path}[.flv]
pub async fn play_stream(State(state): State<Arc<AppState>>, uri: Uri) -> Response {
    let Some(stream_path) = resolve_stream_path(uri.path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.registry.subscribe(stream_path) {
        Ok(subscriber) => {
            tracing::info!(stream = %stream_path, subscriber = %subscriber.id(), "playback connection");
            (
                [(header::CONTENT_TYPE, "video/x-flv")],
                mux::start(subscriber),
            )
                .into_response()
        }
        Err(e) => {
            // Unknown stream: explicit 404 with an empty body, decided over
            // the upstream behavior of truncating an already-started
            // response.
            tracing::debug!(stream = %stream_path, error = %e, "subscription refused");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Query parameters for the list endpoint
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Presence selects the one-shot JSON snapshot instead of the
    /// continuous push
    pub json: Option<String>,
}

/// Pulled stream listing
/// GET /api/hdl/list[?json]
pub async fn list_streams(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    if query.json.is_some() {
        return match serde_json::to_vec(&state.registry.list_pulled()) {
            Ok(body) => (
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize stream list");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        };
    }

    // Continuous mode: one snapshot per tick until the client disconnects,
    // which drops the stream and ends the loop.
    let ticks = IntervalStream::new(tokio::time::interval(LIST_PUSH_INTERVAL));
    let snapshots = ticks.map(move |_| Event::default().json_data(state.registry.list_pulled()));
    Sse::new(snapshots).into_response()
}

/// Query parameters for the pull endpoint
#[derive(Debug, Deserialize)]
pub struct PullQuery {
    /// Upstream source URL
    pub target: String,
    /// Local stream path to publish as
    #[serde(rename = "streamPath")]
    pub stream_path: String,
    /// `save=1` persists the mapping
    pub save: Option<String>,
}

/// Pull registration
/// GET /api/hdl/pull?target=...&streamPath=...[&save=1]
pub async fn pull_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PullQuery>,
) -> Response {
    match relay::start_pull(&state, &query.stream_path, &query.target).await {
        Ok(()) => {
            if query.save.as_deref() == Some("1") {
                // Persistence failure never fails the request: the relay
                // itself is already running.
                if let Err(e) = state.save_pull(&query.stream_path, &query.target).await {
                    tracing::error!(
                        stream = %query.stream_path,
                        error = %e,
                        "failed to persist pull mapping"
                    );
                }
            }
            StatusCode::OK.into_response()
        }
        Err(e) => {
            tracing::warn!(
                stream = %query.stream_path,
                target = %query.target,
                error = %e,
                "pull registration failed"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
