//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::sim::Scenario;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(state.config.client_origin.as_deref()))
        .with_state(state)
}

/// CORS for the given comma-separated origins, or any origin when unset
fn cors_layer(client_origin: Option<&str>) -> CorsLayer {
    let Some(origins) = client_origin else {
        return CorsLayer::permissive();
    };

    let allowed_origins: Vec<HeaderValue> = origins
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    connected_clients: usize,
    scene: Scenario,
    telemetry_connected: bool,
    tick: u64,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.snapshot();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        connected_clients: state.registry.len(),
        scene: snapshot.scene,
        telemetry_connected: state.telemetry_connected(),
        tick: snapshot.tick,
    })
}
