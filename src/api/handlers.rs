use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, stream};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::{ApiError, AppState};
use crate::{
    engine::EngineView,
    geocoding::GeocodeResult,
    model::{LinkKey, RouteDb, RouteId, StopDb, StopId},
};

type ViewResult = Result<Json<EngineView>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct NewRouteBody {
    name: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectionBody {
    route_id: Option<RouteId>,
}

#[derive(Debug, Deserialize)]
pub struct AddStopBody {
    stop_id: StopId,
}

#[derive(Debug, Deserialize)]
pub struct ReorderBody {
    from: usize,
    to: usize,
}

#[derive(Debug, Deserialize)]
pub struct ClickBody {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct DraftNameBody {
    name: String,
}

#[derive(Debug, Deserialize)]
pub struct GeocodeQuery {
    q: String,
}

pub async fn health(State(state): State<AppState>) -> StatusCode {
    match state.engine.snapshot().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub async fn state(State(state): State<AppState>) -> ViewResult {
    Ok(Json(state.engine.snapshot().await?))
}

pub async fn routes(State(state): State<AppState>) -> Result<Json<Vec<RouteDb>>, ApiError> {
    Ok(Json(state.engine.snapshot().await?.routes))
}

#[tracing::instrument(skip(state))]
pub async fn create_route(
    State(state): State<AppState>,
    Json(body): Json<NewRouteBody>,
) -> ViewResult {
    Ok(Json(state.engine.create_route(body.name).await?))
}

#[tracing::instrument(skip(state))]
pub async fn delete_route(State(state): State<AppState>, Path(id): Path<RouteId>) -> ViewResult {
    Ok(Json(state.engine.delete_route(id).await?))
}

pub async fn stops(State(state): State<AppState>) -> Result<Json<Vec<StopDb>>, ApiError> {
    Ok(Json(state.engine.snapshot().await?.stops))
}

#[tracing::instrument(skip(state))]
pub async fn delete_stop(State(state): State<AppState>, Path(id): Path<StopId>) -> ViewResult {
    Ok(Json(state.engine.delete_stop(id).await?))
}

#[tracing::instrument(skip(state))]
pub async fn select_route(
    State(state): State<AppState>,
    Json(body): Json<SelectionBody>,
) -> ViewResult {
    Ok(Json(state.engine.select_route(body.route_id).await?))
}

#[tracing::instrument(skip(state))]
pub async fn add_stop(State(state): State<AppState>, Json(body): Json<AddStopBody>) -> ViewResult {
    Ok(Json(state.engine.add_stop(body.stop_id).await?))
}

#[tracing::instrument(skip(state))]
pub async fn remove_link(State(state): State<AppState>, Path(key): Path<String>) -> ViewResult {
    let link = key.parse::<LinkKey>()?;
    Ok(Json(state.engine.remove_link(link).await?))
}

#[tracing::instrument(skip(state))]
pub async fn reorder(State(state): State<AppState>, Json(body): Json<ReorderBody>) -> ViewResult {
    Ok(Json(state.engine.reorder(body.from, body.to).await?))
}

pub async fn map_clicked(State(state): State<AppState>, Json(body): Json<ClickBody>) -> ViewResult {
    Ok(Json(state.engine.map_clicked(body.lat, body.lng).await?))
}

pub async fn geocoder_selected(
    State(state): State<AppState>,
    Json(result): Json<GeocodeResult>,
) -> ViewResult {
    Ok(Json(state.engine.geocoder_selected(result).await?))
}

pub async fn rename_draft(
    State(state): State<AppState>,
    Json(body): Json<DraftNameBody>,
) -> ViewResult {
    Ok(Json(state.engine.rename_draft(body.name).await?))
}

pub async fn discard_draft(State(state): State<AppState>) -> ViewResult {
    Ok(Json(state.engine.discard_draft().await?))
}

#[tracing::instrument(skip(state))]
pub async fn commit_draft(State(state): State<AppState>) -> ViewResult {
    Ok(Json(state.engine.commit_draft().await?))
}

#[tracing::instrument(skip(state))]
pub async fn geocode(
    State(state): State<AppState>,
    Query(query): Query<GeocodeQuery>,
) -> Result<Json<Vec<GeocodeResult>>, ApiError> {
    let geocoder = state.geocoder.as_ref().ok_or(ApiError::GeocoderDisabled)?;
    Ok(Json(geocoder.search(&query.q).await?))
}

/// Operator notices as server-sent events.
pub async fn notices(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.engine.subscribe_notices();

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(notice) => match Event::default().event("notice").json_data(&notice) {
                    Ok(event) => return Some((Ok(event), receiver)),
                    Err(e) => warn!("Could not encode notice: {e}"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notice stream fell behind"),
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
