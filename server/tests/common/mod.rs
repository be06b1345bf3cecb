//! Common Test Utilities for Integration Tests
//!
//! An in-process stand-in for Sentinel Hub, OpenWeatherMap and the realtime
//! database, plus helpers to build the application against it.

#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use fieldwatch_server::config::Config;
use fieldwatch_server::server::{AppState, api_router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

pub const TEST_TOKEN: &str = "test-token";
pub const TEST_WEATHER_KEY: &str = "test-key";
pub const TEST_USER: &str = "user-1";

/// Request counters per mocked endpoint
#[derive(Default)]
pub struct Hits {
    pub token: AtomicUsize,
    pub process: AtomicUsize,
    pub statistics: AtomicUsize,
    pub weather: AtomicUsize,
    pub database_reads: AtomicUsize,
    pub database_writes: AtomicUsize,
}

impl Hits {
    pub fn token(&self) -> usize {
        self.token.load(Ordering::SeqCst)
    }

    pub fn process(&self) -> usize {
        self.process.load(Ordering::SeqCst)
    }

    pub fn statistics(&self) -> usize {
        self.statistics.load(Ordering::SeqCst)
    }

    pub fn weather(&self) -> usize {
        self.weather.load(Ordering::SeqCst)
    }

    pub fn database_reads(&self) -> usize {
        self.database_reads.load(Ordering::SeqCst)
    }

    pub fn database_writes(&self) -> usize {
        self.database_writes.load(Ordering::SeqCst)
    }
}

/// How the mocked upstream behaves
#[derive(Clone)]
pub struct MockBehavior {
    /// Status returned by the token endpoint
    pub token_status: StatusCode,
    /// Status returned by the processing endpoint
    pub process_status: StatusCode,
    /// Mean reported for every statistics bucket; `None` reports "NaN"
    pub stats_mean: Option<f64>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            token_status: StatusCode::OK,
            process_status: StatusCode::OK,
            stats_mean: Some(0.61),
        }
    }
}

#[derive(Clone)]
struct MockState {
    behavior: MockBehavior,
    hits: Arc<Hits>,
    png: Bytes,
    database: Arc<RwLock<HashMap<String, Value>>>,
}

/// Running mock upstream bound to an ephemeral local port
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub hits: Arc<Hits>,
    database: Arc<RwLock<HashMap<String, Value>>>,
}

impl MockUpstream {
    pub async fn start(behavior: MockBehavior) -> Self {
        let hits = Arc::new(Hits::default());
        let database = Arc::new(RwLock::new(HashMap::new()));
        let state = MockState {
            behavior,
            hits: hits.clone(),
            png: png_bytes(8, 8),
            database: database.clone(),
        };

        let app = Router::new()
            .route("/oauth/token", post(mock_token))
            .route("/api/v1/process", post(mock_process))
            .route("/api/v1/statistics", post(mock_statistics))
            .route("/data/2.5/weather", get(mock_weather))
            .route("/db/users/:uid/:file", get(mock_db_get))
            .route(
                "/db/users/:uid/polygons/:file",
                get(mock_db_get_polygon).patch(mock_db_patch_polygon),
            )
            .route("/db/users/:uid/gsLocal/:file", get(mock_db_get_station))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock upstream");
        let addr = listener.local_addr().expect("mock upstream address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            addr,
            hits,
            database,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Configuration pointing every upstream at this mock
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.sentinel.client_id = Some("client".to_string());
        config.sentinel.client_secret = Some("secret".to_string());
        config.sentinel.token_url = self.url("/oauth/token");
        config.sentinel.process_url = self.url("/api/v1/process");
        config.sentinel.statistics_url = self.url("/api/v1/statistics");
        config.weather.api_key = Some(TEST_WEATHER_KEY.to_string());
        config.weather.base_url = self.url("/data/2.5/weather");
        config.map.access_token = Some("pk.test".to_string());
        config.farm.database_url = Some(self.url("/db"));
        config.farm.user_id = Some(TEST_USER.to_string());
        config
    }

    /// Seed a node under `users/<uid>/`
    pub async fn seed(&self, path: &str, value: Value) {
        self.database.write().await.insert(path.to_string(), value);
    }

    pub async fn node(&self, path: &str) -> Option<Value> {
        self.database.read().await.get(path).cloned()
    }
}

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", TEST_TOKEN))
}

async fn mock_token(State(state): State<MockState>) -> Response {
    state.hits.token.fetch_add(1, Ordering::SeqCst);
    if state.behavior.token_status != StatusCode::OK {
        return (
            state.behavior.token_status,
            Json(json!({"error": "invalid_client"})),
        )
            .into_response();
    }
    Json(json!({"access_token": TEST_TOKEN, "expires_in": 3600})).into_response()
}

async fn mock_process(State(state): State<MockState>, headers: HeaderMap) -> Response {
    state.hits.process.fetch_add(1, Ordering::SeqCst);
    if !bearer_ok(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if state.behavior.process_status != StatusCode::OK {
        return (
            state.behavior.process_status,
            Json(json!({"error": {"message": "mock failure"}})),
        )
            .into_response();
    }
    ([(header::CONTENT_TYPE, "image/png")], state.png.clone()).into_response()
}

async fn mock_statistics(State(state): State<MockState>, headers: HeaderMap) -> Response {
    state.hits.statistics.fetch_add(1, Ordering::SeqCst);
    if !bearer_ok(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mean = match state.behavior.stats_mean {
        Some(m) => json!(m),
        None => json!("NaN"),
    };
    Json(json!({
        "data": [{
            "outputs": {"ndvi": {"bands": {"B0": {"stats": {"mean": mean}}}}}
        }]
    }))
    .into_response()
}

async fn mock_weather(
    State(state): State<MockState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.hits.weather.fetch_add(1, Ordering::SeqCst);
    if params.get("appid").map(String::as_str) != Some(TEST_WEATHER_KEY) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"cod": 401, "message": "Invalid API key."})),
        )
            .into_response();
    }
    let location = params.get("q").cloned().unwrap_or_default();
    if location == "Nowhere" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"cod": "404", "message": "city not found"})),
        )
            .into_response();
    }
    Json(json!({
        "name": location,
        "units": params.get("units"),
        "main": {"temp": 21.5, "humidity": 40}
    }))
    .into_response()
}

async fn mock_db_get(
    State(state): State<MockState>,
    Path((_uid, file)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    state.hits.database_reads.fetch_add(1, Ordering::SeqCst);
    let key = file.trim_end_matches(".json").to_string();
    let db = state.database.read().await;
    if key == "polygons" && params.get("shallow").is_some() {
        let ids: serde_json::Map<String, Value> = db
            .keys()
            .filter_map(|k| k.strip_prefix("polygons/"))
            .map(|id| (id.to_string(), Value::Bool(true)))
            .collect();
        return Json(Value::Object(ids));
    }
    Json(db.get(&key).cloned().unwrap_or(Value::Null))
}

async fn mock_db_get_polygon(
    State(state): State<MockState>,
    Path((_uid, file)): Path<(String, String)>,
) -> Json<Value> {
    read_child(&state, "polygons", &file).await
}

async fn mock_db_get_station(
    State(state): State<MockState>,
    Path((_uid, file)): Path<(String, String)>,
) -> Json<Value> {
    read_child(&state, "gsLocal", &file).await
}

/// Child `<collection>/<file>` of a seeded node, or `null`
async fn read_child(state: &MockState, collection: &str, file: &str) -> Json<Value> {
    state.hits.database_reads.fetch_add(1, Ordering::SeqCst);
    let key = format!("{}/{}", collection, file.trim_end_matches(".json"));
    Json(
        state
            .database
            .read()
            .await
            .get(&key)
            .cloned()
            .unwrap_or(Value::Null),
    )
}

async fn mock_db_patch_polygon(
    State(state): State<MockState>,
    Path((_uid, file)): Path<(String, String)>,
    Json(patch): Json<Value>,
) -> Json<Value> {
    state.hits.database_writes.fetch_add(1, Ordering::SeqCst);
    let key = format!("polygons/{}", file.trim_end_matches(".json"));
    let mut db = state.database.write().await;
    let entry = db.entry(key).or_insert_with(|| json!({}));
    if let (Value::Object(target), Value::Object(fields)) = (entry, &patch) {
        for (k, v) in fields {
            target.insert(k.clone(), v.clone());
        }
    }
    Json(patch)
}

/// Encode a small PNG
pub fn png_bytes(width: u32, height: u32) -> Bytes {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([20, 180, 40, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    Bytes::from(out.into_inner())
}

/// Application state wired to `upstream`
pub fn create_test_state(upstream: &MockUpstream) -> AppState {
    AppState::from_config(upstream.config(), reqwest::Client::new())
}

/// Create a test application router with all API routes configured
pub fn create_test_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api_router(state).layer(cors)
}

/// Initialize test logging for detailed output
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldwatch_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
