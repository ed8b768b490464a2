//! JSON API the dashboard UI talks to.

mod error;
mod handlers;


use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tracing::info;

pub use error::ApiError;

use crate::{engine::EngineHandle, geocoding::MapboxGeocoder};

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    /// `None` when no Mapbox token is configured.
    pub geocoder: Option<Arc<MapboxGeocoder>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/state", get(handlers::state))
        .route("/notices", get(handlers::notices))
        .route("/routes", get(handlers::routes).post(handlers::create_route))
        .route("/routes/{id}", delete(handlers::delete_route))
        .route("/stops", get(handlers::stops))
        .route("/stops/{id}", delete(handlers::delete_stop))
        .route("/selection", put(handlers::select_route))
        .route("/sequence/stops", post(handlers::add_stop))
        .route("/sequence/links/{key}", delete(handlers::remove_link))
        .route("/sequence/reorder", post(handlers::reorder))
        .route("/draft", delete(handlers::discard_draft))
        .route("/draft/click", post(handlers::map_clicked))
        .route("/draft/geocoded", post(handlers::geocoder_selected))
        .route("/draft/name", put(handlers::rename_draft))
        .route("/draft/commit", post(handlers::commit_draft))
        .route("/geocode", get(handlers::geocode))
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!("Serving the dashboard API on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .await
        .context("serving the dashboard API")
}
