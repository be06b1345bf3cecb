//! HTTP route handlers for NDVI imagery and statistics

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::evalscript::{LegendEntry, legend};
use super::process::ImagerySource;
use super::stats::StatsSource;
use super::types::{ImageryError, StatInterval};
use crate::geo::{AreaOfInterest, DateRange, DateSelection, GeoError};

/// Application state for imagery routes
#[derive(Clone)]
pub struct ImageryAppState {
    pub images: Arc<dyn ImagerySource>,
    pub stats: Arc<dyn StatsSource>,
}

/// Error response for imagery API
#[derive(Debug, Serialize)]
pub struct ImageryErrorResponse {
    pub error: String,
    pub code: String,
    /// Upstream 4xx passed through to the caller
    #[serde(skip)]
    pub upstream_status: Option<u16>,
}

impl ImageryErrorResponse {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: "invalid_input".to_string(),
            upstream_status: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.code.as_str() {
            "invalid_input" => StatusCode::BAD_REQUEST,
            "upstream_auth" => StatusCode::UNAUTHORIZED,
            "upstream_request" => self
                .upstream_status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            "upstream_timeout" => StatusCode::GATEWAY_TIMEOUT,
            "upstream_server" | "upstream_unavailable" | "invalid_upstream_response" => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ImageryError> for ImageryErrorResponse {
    fn from(e: ImageryError) -> Self {
        let (code, upstream_status) = match &e {
            ImageryError::Configuration(_) => ("configuration_error", None),
            ImageryError::InvalidInput(_) | ImageryError::TooManyIntervals { .. } => {
                ("invalid_input", None)
            }
            ImageryError::UpstreamAuth { .. } => ("upstream_auth", None),
            ImageryError::UpstreamRequest { status, .. } => ("upstream_request", Some(*status)),
            ImageryError::UpstreamServer { .. } => ("upstream_server", None),
            ImageryError::UpstreamTimeout(_) => ("upstream_timeout", None),
            ImageryError::Transport(_) => ("upstream_unavailable", None),
            ImageryError::InvalidResponse(_) => ("invalid_upstream_response", None),
        };
        Self {
            error: e.to_string(),
            code: code.to_string(),
            upstream_status,
        }
    }
}

impl From<GeoError> for ImageryErrorResponse {
    fn from(e: GeoError) -> Self {
        ImageryError::from(e).into()
    }
}

impl IntoResponse for ImageryErrorResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

/// Body for POST /api/sentinelhub-01
#[derive(Debug, Deserialize)]
pub struct NdviImageRequest {
    pub polygon: Option<Vec<[f64; 2]>>,
    pub date: Option<String>,
}

impl NdviImageRequest {
    pub fn validate(&self) -> Result<(AreaOfInterest, DateSelection), ImageryErrorResponse> {
        let (Some(polygon), Some(date)) = (&self.polygon, &self.date) else {
            return Err(ImageryErrorResponse::bad_request(
                "Polygon and date are required.",
            ));
        };
        Ok((
            AreaOfInterest::from_coords(polygon)?,
            DateSelection::parse(date)?,
        ))
    }
}

/// Body for POST /api/ndvi-stats
#[derive(Debug, Deserialize)]
pub struct NdviStatsRequest {
    pub polygon: Option<Vec<[f64; 2]>>,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// POST /api/sentinelhub-01 - Render an NDVI PNG for one polygon and day
pub async fn fetch_ndvi_image(
    State(state): State<ImageryAppState>,
    Json(body): Json<NdviImageRequest>,
) -> Result<Response, ImageryErrorResponse> {
    let (area, date) = body.validate()?;

    let raster = state
        .images
        .fetch_ndvi_image(&area, date)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch NDVI image for {}: {}", date, e);
            ImageryErrorResponse::from(e)
        })?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, raster.content_type.clone()),
            (header::CACHE_CONTROL, "private, max-age=3600".to_string()),
        ],
        raster.bytes,
    )
        .into_response())
}

/// POST /api/ndvi-stats - Mean NDVI per interval for a polygon and date range
pub async fn fetch_ndvi_stats(
    State(state): State<ImageryAppState>,
    Json(body): Json<NdviStatsRequest>,
) -> Result<Json<Vec<StatInterval>>, ImageryErrorResponse> {
    let (Some(polygon), Some(from), Some(to)) = (&body.polygon, &body.from, &body.to) else {
        return Err(ImageryErrorResponse::bad_request(
            "Polygon, from and to are required.",
        ));
    };
    let area = AreaOfInterest::from_coords(polygon)?;
    let range = DateRange::parse(from, to)?;

    let series = state.stats.fetch_stats(&area, range).await.map_err(|e| {
        tracing::error!("Failed to fetch NDVI statistics {}..{}: {}", from, to, e);
        ImageryErrorResponse::from(e)
    })?;

    Ok(Json(series))
}

/// GET /api/ndvi/legend - Colour key for the NDVI palette
pub async fn get_legend() -> Json<Vec<LegendEntry>> {
    Json(legend())
}

/// Build imagery API routes
pub fn imagery_routes(state: ImageryAppState) -> Router {
    Router::new()
        .route("/sentinelhub-01", post(fetch_ndvi_image))
        .route("/ndvi-stats", post(fetch_ndvi_stats))
        .route("/ndvi/legend", get(get_legend))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let status = |e: ImageryError| ImageryErrorResponse::from(e).into_response().status();

        assert_eq!(
            status(ImageryError::Configuration("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(ImageryError::InvalidInput(GeoError::NotClosed)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(ImageryError::TooManyIntervals { max: 48 }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(ImageryError::UpstreamAuth {
                status: 401,
                body: String::new()
            }),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(ImageryError::UpstreamRequest {
                status: 422,
                body: String::new()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(ImageryError::UpstreamServer {
                status: 503,
                body: String::new()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(ImageryError::UpstreamTimeout(std::time::Duration::from_secs(30))),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_request_requires_polygon_and_date() {
        let req = NdviImageRequest {
            polygon: None,
            date: Some("2023-06-01".into()),
        };
        let err = req.validate().unwrap_err();
        assert_eq!(err.code, "invalid_input");

        let req = NdviImageRequest {
            polygon: Some(vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]]),
            date: Some("2023-06-01".into()),
        };
        assert!(req.validate().is_ok());
    }
}
