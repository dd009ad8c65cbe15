//! HTTP route handlers.
//!
//! - `health`: liveness, readiness, metrics and version
//! - `scans`: scan submission, job management and the progress stream
//! - `library`: read-only catalog views

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub mod health;
pub mod library;
pub mod scans;

/// All routes, without middleware layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route("/version", get(health::version))
        .route("/api/scans", post(scans::create_scan).get(scans::list_scans))
        .route("/api/scans/stop", post(scans::stop_scan))
        .route("/api/scans/events", get(scans::scan_events))
        .route("/api/scans/{id}", get(scans::get_scan).delete(scans::cancel_scan))
        .route("/api/platforms", get(library::list_platforms))
        .route("/api/platforms/{id}", get(library::get_platform))
        .route("/api/platforms/{id}/roms", get(library::list_platform_roms))
        .route("/api/platforms/{id}/firmware", get(library::list_platform_firmware))
        .route("/api/roms/{id}", get(library::get_rom))
        .with_state(state)
}
