/**
 * API DE CONTRÔLE - Serveur HTTP du simulateur
 *
 * RÔLE :
 * Expose le Fleet Controller : inspection de la flotte, pause/reprise de la
 * simulation, actions manuelles par device, compteurs.
 *
 * SÉCURITÉ :
 * - Si FLEETSIM_API_KEY est défini, header x-api-key requis sauf sur /health
 * - Sinon API ouverte (usage banc de test local)
 */

use crate::controller::FleetController;
use crate::metrics::{FleetMetrics, MetricsSnapshot};
use crate::models::DeviceView;
use crate::streaming::ChannelState;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<FleetController>,
    pub metrics: Arc<FleetMetrics>,
    /// `None` leaves the API open.
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationView {
    enabled: bool,
    devices: usize,
    /// Absent when streaming is disabled.
    streaming: Option<ChannelState>,
}

async fn require_api_key(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    // Health check toujours accessible
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let ok = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);

    if !ok {
        warn!("[control] rejected request to {} (bad api key)", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/devices", get(list_devices))
        .route("/devices/{id}", get(get_device))
        .route("/devices/{id}/disconnect", post(disconnect_device))
        .route("/devices/{id}/reconnect", post(reconnect_device))
        .route("/devices/{id}/anomaly", post(inject_anomaly))
        .route("/simulation", get(get_simulation))
        .route("/simulation/start", post(start_simulation))
        .route("/simulation/stop", post(stop_simulation))
        .route("/metrics", get(get_metrics))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /devices
async fn list_devices(State(app): State<AppState>) -> Json<Vec<DeviceView>> {
    Json(app.controller.devices())
}

// GET /devices/{id}
async fn get_device(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<DeviceView>, StatusCode> {
    app.controller.device(id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn disconnect_device(State(app): State<AppState>, Path(id): Path<u64>) -> StatusCode {
    found_or_404(app.controller.disconnect_device(id))
}

async fn reconnect_device(State(app): State<AppState>, Path(id): Path<u64>) -> StatusCode {
    found_or_404(app.controller.reconnect_device(id))
}

// POST /devices/{id}/anomaly : no-op silencieux si le device est déconnecté
async fn inject_anomaly(State(app): State<AppState>, Path(id): Path<u64>) -> StatusCode {
    if app.controller.device(id).is_none() {
        return StatusCode::NOT_FOUND;
    }
    app.controller.inject_anomaly_to_device(id).await;
    StatusCode::NO_CONTENT
}

fn found_or_404(found: bool) -> StatusCode {
    if found {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn get_simulation(State(app): State<AppState>) -> Json<SimulationView> {
    Json(SimulationView {
        enabled: app.controller.is_simulation_enabled(),
        devices: app.controller.fleet().len(),
        streaming: app.controller.streaming_channel().map(|s| s.state()),
    })
}

async fn start_simulation(State(app): State<AppState>) -> StatusCode {
    app.controller.start_simulation();
    StatusCode::NO_CONTENT
}

async fn stop_simulation(State(app): State<AppState>) -> StatusCode {
    app.controller.stop_simulation();
    StatusCode::NO_CONTENT
}

async fn get_metrics(State(app): State<AppState>) -> Json<MetricsSnapshot> {
    Json(app.metrics.snapshot())
}
