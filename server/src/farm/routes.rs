//! HTTP route handlers for farm records

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};

use super::feed::{Alert, LiveFeed, SitePoint};
use super::sensors::{SensorReading, SensorSample};
use super::store::{FarmStore, PolygonReport, StoreError};
use crate::geo::DateRange;
use crate::imagery::{ImageryErrorResponse, StatInterval, StatsSource};

/// Application state for farm routes
#[derive(Clone)]
pub struct FarmAppState {
    pub store: Arc<dyn FarmStore>,
    pub feed: Arc<LiveFeed>,
    pub stats: Arc<dyn StatsSource>,
}

/// Error response for farm API
#[derive(Debug, Serialize)]
pub struct FarmErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    #[serde(skip)]
    pub status: StatusCode,
}

impl From<StoreError> for FarmErrorResponse {
    fn from(e: StoreError) -> Self {
        let (code, status) = match &e {
            StoreError::NotConfigured(_) => ("configuration_error", StatusCode::INTERNAL_SERVER_ERROR),
            StoreError::NotFound(_) => ("not_found", StatusCode::NOT_FOUND),
            StoreError::InvalidKey(_) => ("invalid_id", StatusCode::BAD_REQUEST),
            StoreError::Timeout(_) => ("store_timeout", StatusCode::GATEWAY_TIMEOUT),
            StoreError::Http { .. } | StoreError::Transport(_) | StoreError::Decode(_) => {
                ("store_unavailable", StatusCode::BAD_GATEWAY)
            }
        };
        Self {
            error: e.to_string(),
            code: code.to_string(),
            details: Vec::new(),
            status,
        }
    }
}

impl From<ImageryErrorResponse> for FarmErrorResponse {
    fn from(e: ImageryErrorResponse) -> Self {
        let status = e.status();
        Self {
            error: e.error,
            code: e.code,
            details: Vec::new(),
            status,
        }
    }
}

impl IntoResponse for FarmErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Response for GET /api/farm/sites
#[derive(Debug, Serialize)]
pub struct SitesResponse {
    pub ground_stations: Vec<SitePoint>,
    pub trees: Vec<SitePoint>,
}

/// Response for GET /api/farm/stations/:id/readings
#[derive(Debug, Serialize)]
pub struct ReadingsResponse {
    pub station: String,
    pub current: SensorReading,
    /// Per-minute readings collected by the poller, oldest first
    pub history: Vec<SensorSample>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// GET /api/farm/polygons - Ids of the user's monitored fields
///
/// Falls back to the ids from the last successful poll when the store is down.
pub async fn list_polygons(
    State(state): State<FarmAppState>,
) -> Result<Json<Vec<String>>, FarmErrorResponse> {
    match state.store.polygon_ids().await {
        Ok(ids) => Ok(Json(ids)),
        Err(e) => {
            let known = state.feed.polygons();
            if known.is_empty() {
                tracing::error!("Failed to list polygons: {}", e);
                return Err(e.into());
            }
            tracing::warn!("Store unavailable ({}), serving {} polled ids", e, known.len());
            Ok(Json(known))
        }
    }
}

/// GET /api/farm/polygons/:id - Record plus the problems found reading it
pub async fn get_polygon(
    State(state): State<FarmAppState>,
    Path(id): Path<String>,
) -> Result<Json<PolygonReport>, FarmErrorResponse> {
    let report = state.store.polygon(&id).await.map_err(|e| {
        tracing::warn!("Failed to read polygon {}: {}", id, e);
        FarmErrorResponse::from(e)
    })?;
    Ok(Json(report))
}

/// GET /api/farm/polygons/:id/stats - NDVI series over the stored polygon
///
/// `from`/`to` default to the window stored with the record.
pub async fn get_polygon_stats(
    State(state): State<FarmAppState>,
    Path(id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Vec<StatInterval>>, FarmErrorResponse> {
    let report = state.store.polygon(&id).await?;

    let area = match report.record.area() {
        Some(Ok(area)) => area,
        Some(Err(e)) => return Err(ImageryErrorResponse::from(e).into()),
        None => {
            return Err(FarmErrorResponse {
                error: format!("Polygon {} has no usable bounding box", id),
                code: "invalid_record".to_string(),
                details: report.errors,
                status: StatusCode::UNPROCESSABLE_ENTITY,
            });
        }
    };

    let from = query.from.or_else(|| report.record.from.map(|d| d.to_string()));
    let to = query.to.or_else(|| report.record.to.map(|d| d.to_string()));
    let (Some(from), Some(to)) = (from, to) else {
        return Err(ImageryErrorResponse::bad_request("from and to are required").into());
    };
    let range = DateRange::parse(&from, &to).map_err(ImageryErrorResponse::from)?;

    let series = state
        .stats
        .fetch_stats(&area, range)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch statistics for polygon {}: {}", id, e);
            ImageryErrorResponse::from(e)
        })?;
    Ok(Json(series))
}

/// GET /api/farm/alerts - Latest alerts from the live feed
pub async fn get_alerts(State(state): State<FarmAppState>) -> Json<Vec<Alert>> {
    Json(state.feed.alerts())
}

/// GET /api/farm/sites - Latest ground station and tree positions
pub async fn get_sites(State(state): State<FarmAppState>) -> Json<SitesResponse> {
    Json(SitesResponse {
        ground_stations: state.feed.stations(),
        trees: state.feed.trees(),
    })
}

/// GET /api/farm/stations/:id/readings - Live sensor snapshot plus recent history
pub async fn get_station_readings(
    State(state): State<FarmAppState>,
    Path(id): Path<String>,
) -> Result<Json<ReadingsResponse>, FarmErrorResponse> {
    let current = state.store.sensor_reading(&id).await.map_err(|e| {
        tracing::warn!("Failed to read sensors of {}: {}", id, e);
        FarmErrorResponse::from(e)
    })?;
    let history = state
        .feed
        .sensor_series(&id)
        .map(|series| series.samples().to_vec())
        .unwrap_or_default();

    Ok(Json(ReadingsResponse {
        station: id,
        current,
        history,
    }))
}

/// Build farm API routes
pub fn farm_routes(state: FarmAppState) -> Router {
    Router::new()
        .route("/farm/polygons", get(list_polygons))
        .route("/farm/polygons/:id", get(get_polygon))
        .route("/farm/polygons/:id/stats", get(get_polygon_stats))
        .route("/farm/alerts", get(get_alerts))
        .route("/farm/sites", get(get_sites))
        .route("/farm/stations/:id/readings", get(get_station_readings))
        .with_state(state)
}
