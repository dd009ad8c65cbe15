//! Read-only views of the catalog.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use crate::{
    error::{AppResult, OptionExt},
    state::AppState,
};

pub async fn list_platforms(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(state.catalog.list_platforms().await?))
}

pub async fn get_platform(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<impl IntoResponse> {
    let platform = state.catalog.get_platform(id).await?.ok_or_not_found("platform")?;
    Ok(Json(platform))
}

pub async fn list_platform_roms(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<impl IntoResponse> {
    let platform = state.catalog.get_platform(id).await?.ok_or_not_found("platform")?;
    Ok(Json(state.catalog.list_roms(platform.id).await?))
}

pub async fn list_platform_firmware(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let platform = state.catalog.get_platform(id).await?.ok_or_not_found("platform")?;
    Ok(Json(state.catalog.list_firmware(platform.id).await?))
}

pub async fn get_rom(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<impl IntoResponse> {
    let rom = state.catalog.get_rom(id).await?.ok_or_not_found("rom")?;
    Ok(Json(rom))
}
