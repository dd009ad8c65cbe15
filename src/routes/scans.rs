use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use futures::Stream;
use serde_json::json;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use uuid::Uuid;

use crate::{
    error::{validation::validate_scan_request, AppError, AppResult, OptionExt},
    state::AppState,
    types::ScanRequest,
};

pub async fn create_scan(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> AppResult<impl IntoResponse> {
    validate_scan_request(&req)?;
    let job = state.runner.submit(req).await.map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn list_scans(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.runner.list().await)
}

pub async fn get_scan(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<impl IntoResponse> {
    let job = state.runner.get(id).await.ok_or_not_found("scan")?;
    Ok(Json(job))
}

pub async fn cancel_scan(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<impl IntoResponse> {
    let job = state.runner.cancel_job(id).await.ok_or_not_found("scan")?;
    Ok(Json(job))
}

// Stops whatever is running; idempotent
pub async fn stop_scan(State(state): State<AppState>) -> impl IntoResponse {
    state.runner.cancel().await;
    StatusCode::NO_CONTENT
}

pub async fn scan_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.runner.subscribe();
    let closing = state.runner.shutdown_token();

    // lagged receivers just skip the events they missed
    let events = BroadcastStream::new(rx).filter_map(|res| res.ok()).map(|ev| {
        let data = serde_json::to_string(&ev).unwrap_or_else(|_| {
            json!({"event": "done_ko", "data": {"reason": "error", "message": "serialization error"}}).to_string()
        });
        Ok::<Event, std::convert::Infallible>(Event::default().event(ev.name()).data(data))
    });

    // open streams would otherwise hold graceful shutdown forever
    let stream = futures::StreamExt::take_until(events, closing.cancelled_owned());

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(10)).text("keep-alive"))
}
