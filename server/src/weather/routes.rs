//! HTTP route handler for weather passthrough

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::client::{WeatherError, WeatherSource};

#[derive(Clone)]
pub struct WeatherAppState {
    pub weather: Arc<dyn WeatherSource>,
}

#[derive(Debug, Serialize)]
pub struct WeatherErrorResponse {
    pub error: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl From<WeatherError> for WeatherErrorResponse {
    fn from(e: WeatherError) -> Self {
        let status = match &e {
            WeatherError::MissingLocation => StatusCode::BAD_REQUEST,
            WeatherError::MissingApiKey | WeatherError::Transport(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            WeatherError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            WeatherError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };
        Self {
            error: e.to_string(),
            status,
        }
    }
}

impl IntoResponse for WeatherErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct WeatherQuery {
    pub location: Option<String>,
}

/// GET /api/weather?location=<name> - Current weather, metric units
pub async fn get_weather(
    State(state): State<WeatherAppState>,
    Query(query): Query<WeatherQuery>,
) -> Result<Json<Value>, WeatherErrorResponse> {
    let location = query.location.unwrap_or_default();
    let data = state.weather.current(&location).await.map_err(|e| {
        tracing::error!("Error fetching weather data: {}", e);
        WeatherErrorResponse::from(e)
    })?;
    Ok(Json(data))
}

pub fn weather_routes(state: WeatherAppState) -> Router {
    Router::new()
        .route("/weather", get(get_weather))
        .with_state(state)
}
