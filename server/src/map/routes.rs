//! HTTP route handlers for the map session API

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};

use super::registry::LayerSummary;
use super::session::{AddLayer, MapSession};
use super::surface::Scene;
use super::types::{ImageLoadError, MapError, MapStyle, StyleState};
use crate::config::MapConfig;
use crate::geo::{AreaOfInterest, DateSelection, GeoError};
use crate::imagery::{ImageryError, ImageryErrorResponse};

/// Application state for map routes
#[derive(Clone)]
pub struct MapAppState {
    pub session: Arc<MapSession>,
    pub config: MapConfig,
}

/// Error response for map API
#[derive(Debug, Serialize)]
pub struct MapErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl From<MapError> for MapErrorResponse {
    fn from(e: MapError) -> Self {
        // Upstream failures keep the status mapping of the imagery API
        if let MapError::Imagery(inner) = e {
            return ImageryErrorResponse::from(inner).into();
        }
        let (code, status) = match &e {
            MapError::LayerNotFound(_) => ("not_found", StatusCode::NOT_FOUND),
            MapError::InvalidOpacity(_) | MapError::InvalidLayerId(_) => {
                ("invalid_input", StatusCode::BAD_REQUEST)
            }
            MapError::TooManyLayers(_) => ("too_many_layers", StatusCode::CONFLICT),
            MapError::MissingAccessToken => {
                ("configuration_error", StatusCode::INTERNAL_SERVER_ERROR)
            }
            MapError::ImageLoad(ImageLoadError::Timeout(_)) => {
                ("image_load_timeout", StatusCode::GATEWAY_TIMEOUT)
            }
            MapError::ImageLoad(_) => ("image_load_error", StatusCode::BAD_GATEWAY),
            MapError::Imagery(_) => ("upstream_error", StatusCode::BAD_GATEWAY),
        };
        Self {
            error: e.to_string(),
            code: code.to_string(),
            status,
        }
    }
}

impl From<ImageryErrorResponse> for MapErrorResponse {
    fn from(e: ImageryErrorResponse) -> Self {
        let status = e.status();
        Self {
            error: e.error,
            code: e.code,
            status,
        }
    }
}

impl From<GeoError> for MapErrorResponse {
    fn from(e: GeoError) -> Self {
        ImageryErrorResponse::from(ImageryError::from(e)).into()
    }
}

impl IntoResponse for MapErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Response for GET /api/map/config
#[derive(Debug, Serialize, Deserialize)]
pub struct MapConfigResponse {
    pub access_token: String,
    pub satellite_style: String,
    pub dark_style: String,
    pub overlay_opacity: f32,
    pub fit_padding: u32,
}

/// Body for POST /api/map/layers
#[derive(Debug, Deserialize)]
pub struct AddLayerRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub polygon: Vec<[f64; 2]>,
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct OpacityRequest {
    pub opacity: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VisibilityBody {
    pub visible: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct StyleResponse {
    pub style: MapStyle,
    pub state: StyleState,
}

/// GET /api/map/config - Client map settings
pub async fn get_map_config(
    State(state): State<MapAppState>,
) -> Result<Json<MapConfigResponse>, MapErrorResponse> {
    let Some(token) = state.config.access_token.clone() else {
        tracing::error!("Map config requested but no access token is configured");
        return Err(MapError::MissingAccessToken.into());
    };

    Ok(Json(MapConfigResponse {
        access_token: token,
        satellite_style: state.config.satellite_style.clone(),
        dark_style: state.config.dark_style.clone(),
        overlay_opacity: state.config.overlay_opacity,
        fit_padding: state.config.fit_padding,
    }))
}

/// GET /api/map/scene - Current scene snapshot
pub async fn get_scene(State(state): State<MapAppState>) -> Json<Scene> {
    Json(state.session.scene().await)
}

/// GET /api/map/layers - Registered layers in insertion order
pub async fn list_layers(State(state): State<MapAppState>) -> Json<Vec<LayerSummary>> {
    Json(state.session.list().await)
}

/// POST /api/map/layers - Fetch, decode and attach an NDVI layer
pub async fn add_layer(
    State(state): State<MapAppState>,
    Json(body): Json<AddLayerRequest>,
) -> Result<(StatusCode, Json<LayerSummary>), MapErrorResponse> {
    let area = AreaOfInterest::from_coords(&body.polygon)?;
    let date = DateSelection::parse(&body.date)?;

    let summary = state
        .session
        .add_layer(AddLayer {
            id: body.id,
            area,
            date,
        })
        .await
        .map_err(|e| {
            tracing::error!("Failed to add NDVI layer for {}: {}", date, e);
            MapErrorResponse::from(e)
        })?;

    Ok((StatusCode::CREATED, Json(summary)))
}

/// DELETE /api/map/layers - Remove every layer
pub async fn clear_layers(State(state): State<MapAppState>) -> Json<ClearResponse> {
    Json(ClearResponse {
        removed: state.session.clear().await,
    })
}

/// DELETE /api/map/layers/:id
pub async fn remove_layer(
    State(state): State<MapAppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, MapErrorResponse> {
    state.session.remove_layer(&id).await.map_err(|e| {
        tracing::debug!("Remove failed for {}: {}", id, e);
        MapErrorResponse::from(e)
    })?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/map/layers/:id/image - Encoded overlay image
pub async fn get_layer_image(
    State(state): State<MapAppState>,
    Path(id): Path<String>,
) -> Result<Response, MapErrorResponse> {
    let (bytes, content_type) = state.session.layer_image(&id).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "private, max-age=86400".to_string()),
        ],
        bytes,
    )
        .into_response())
}

/// PUT /api/map/layers/:id/opacity
pub async fn set_layer_opacity(
    State(state): State<MapAppState>,
    Path(id): Path<String>,
    Json(body): Json<OpacityRequest>,
) -> Result<StatusCode, MapErrorResponse> {
    state.session.set_layer_opacity(&id, body.opacity).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/map/visibility - Show or hide all NDVI overlays
pub async fn set_visibility(
    State(state): State<MapAppState>,
    Json(body): Json<VisibilityBody>,
) -> Json<VisibilityBody> {
    state.session.set_visible(body.visible).await;
    Json(VisibilityBody {
        visible: state.session.is_visible().await,
    })
}

/// POST /api/map/style/toggle - Switch between satellite and dark basemaps
pub async fn toggle_style(State(state): State<MapAppState>) -> Json<StyleResponse> {
    let style = state.session.toggle_style().await;
    Json(StyleResponse {
        style,
        state: state.session.style().await,
    })
}

/// Build map API routes
pub fn map_routes(state: MapAppState) -> Router {
    Router::new()
        .route("/map/config", get(get_map_config))
        .route("/map/scene", get(get_scene))
        .route(
            "/map/layers",
            get(list_layers).post(add_layer).delete(clear_layers),
        )
        .route("/map/layers/:id", delete(remove_layer))
        .route("/map/layers/:id/image", get(get_layer_image))
        .route("/map/layers/:id/opacity", put(set_layer_opacity))
        .route("/map/visibility", post(set_visibility))
        .route("/map/style/toggle", post(toggle_style))
        .with_state(state)
}
