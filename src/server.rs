//! HTTP host pipeline.
//!
//! The dispatcher runs as middleware in front of a small router. Requests it
//! passes through reach the router unchanged:
//!
//! - `GET  /__dispatcher/health` - liveness
//! - `GET  /__dispatcher/stats`  - dispatch counters
//! - `GET  /__dispatcher/mode`   - current mode
//! - `PUT  /__dispatcher/mode`   - flip mode, body `{"mock": true}`
//!
//! Anything else falls through to a JSON 404.

use crate::dispatcher::{Dispatch, Dispatcher};
use crate::mode::Mode;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Build the application router around a dispatcher.
pub fn app(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/__dispatcher/health", get(handle_health))
        .route("/__dispatcher/stats", get(handle_stats))
        .route("/__dispatcher/mode", get(handle_get_mode).put(handle_set_mode))
        .fallback(handle_not_found)
        .layer(middleware::from_fn_with_state(dispatcher.clone(), dispatch_layer))
        .with_state(dispatcher)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, dispatcher: Arc<Dispatcher>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, "Dispatcher listening");
    }
    axum::serve(listener, app(dispatcher))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn dispatch_layer(State(dispatcher): State<Arc<Dispatcher>>, request: Request, next: Next) -> Response {
    match dispatcher.dispatch(request).await {
        Dispatch::Handled(response) => response,
        Dispatch::PassThrough(request) => next.run(request).await,
    }
}

#[derive(Debug, Deserialize)]
struct ModeUpdate {
    mock: bool,
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_stats(State(dispatcher): State<Arc<Dispatcher>>) -> impl IntoResponse {
    Json(dispatcher.stats())
}

async fn handle_get_mode(State(dispatcher): State<Arc<Dispatcher>>) -> impl IntoResponse {
    mode_body(&dispatcher)
}

async fn handle_set_mode(
    State(dispatcher): State<Arc<Dispatcher>>,
    Json(update): Json<ModeUpdate>,
) -> impl IntoResponse {
    dispatcher.mode().set_mock(update.mock);
    info!(mode = ?dispatcher.mode().mode(), "Mode changed");
    mode_body(&dispatcher)
}

fn mode_body(dispatcher: &Dispatcher) -> Json<serde_json::Value> {
    let mode = dispatcher.mode().mode();
    Json(serde_json::json!({
        "mode": mode,
        "mock": mode == Mode::Mock,
        "target": dispatcher.targets().active_tag(),
        "targets": dispatcher.targets().tags().collect::<Vec<_>>(),
    }))
}

async fn handle_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "not found"})))
}
