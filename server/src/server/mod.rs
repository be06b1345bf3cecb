//! HTTP and WebSocket surface
//!
//! `AppState` owns every long-lived component; `api_router` mounts each
//! module's routes under `/api` and the scene feed at `/ws/scene`.

mod health;
mod state;
mod websocket;

pub use health::{HealthResponse, health, mark_started, uptime_seconds};
pub use state::{AppState, ConnectionRegistry, ScenePeer};
pub use websocket::{SceneMessage, SceneRequest, WsConfig, scene_ws_handler};

use axum::{Router, routing::get};

use crate::farm::farm_routes;
use crate::imagery::imagery_routes;
use crate::map::map_routes;
use crate::weather::weather_routes;

/// Application routes without ops endpoints or middleware
pub fn api_router(state: AppState) -> Router {
    let api = imagery_routes(state.imagery_state())
        .merge(map_routes(state.map_state()))
        .merge(farm_routes(state.farm_state()))
        .merge(weather_routes(state.weather_state()));

    Router::new()
        .route("/ws/scene", get(scene_ws_handler))
        .with_state(state)
        .nest("/api", api)
}
