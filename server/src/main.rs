use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use fieldwatch_server::config::Config;
use fieldwatch_server::farm::{spawn_marker_sync, spawn_store_poller};
use fieldwatch_server::server::{AppState, api_router, health, mark_started, uptime_seconds};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Prometheus metrics handle for exposing metrics in Prometheus format
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

/// Endpoint to expose metrics in Prometheus format
async fn prometheus_metrics() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Prometheus recorder not installed".to_string(),
        ),
    }
}

/// Update gauge metrics (called periodically)
async fn update_gauge_metrics(state: &AppState) {
    metrics::gauge!("fieldwatch_ws_connections_active").set(state.connection_count().await as f64);
    metrics::gauge!("fieldwatch_feed_subscribers").set(state.feed.subscriber_count() as f64);
    if let Some(poll) = state.feed.last_poll() {
        metrics::gauge!("fieldwatch_store_healthy").set(if poll.is_healthy() { 1.0 } else { 0.0 });
    }
    metrics::gauge!("fieldwatch_uptime_seconds").set(uptime_seconds() as f64);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mark_started();

    // Must be installed before any metric is recorded
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    PROMETHEUS_HANDLE.set(prometheus_handle).ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldwatch_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Loaded configuration: host={}, port={}",
        config.host, config.port
    );
    if config.map.access_token.is_none() {
        warn!("MAPBOX_ACCESS_TOKEN not set - /api/map/config will report a configuration error");
    }
    if config.weather.api_key.is_none() {
        warn!("OPENWEATHER_API_KEY not set - /api/weather will report a configuration error");
    }

    let client = reqwest::Client::builder()
        .user_agent(concat!("fieldwatch/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let poll_interval = config.farm.poll_interval;
    let app_state = AppState::from_config(config.clone(), client);

    // Live data: store -> feed -> map markers
    spawn_store_poller(app_state.store.clone(), app_state.feed.clone(), poll_interval);
    spawn_marker_sync(app_state.feed.clone(), app_state.session.clone());

    // Periodic update of gauge metrics (every 5 seconds)
    let metrics_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            update_gauge_metrics(&metrics_state).await;
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .with_state(app_state.clone())
        .merge(api_router(app_state))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("FieldWatch server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
