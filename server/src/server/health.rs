//! Health reporting
//!
//! The farm store is judged by the poller's last outcome, so a health check
//! never reaches the database itself.

use std::sync::OnceLock;
use std::time::Instant;

use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::AppState;

/// Application start time for uptime calculation
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Record the process start; later calls are ignored
pub fn mark_started() {
    START_TIME.set(Instant::now()).ok();
}

pub fn uptime_seconds() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub imagery: &'static str,
    /// `pending` until the first poll, then `ready` or `unavailable`
    pub farm_store: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_topics: Vec<&'static str>,
    pub websocket: &'static str,
    pub uptime_seconds: u64,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let imagery_ready =
        state.config.sentinel.client_id.is_some() && state.config.sentinel.client_secret.is_some();

    let last_poll = state.feed.last_poll();
    let farm_store = match &last_poll {
        None => "pending",
        Some(poll) if poll.is_healthy() => "ready",
        Some(_) => "unavailable",
    };

    let healthy = imagery_ready && farm_store != "unavailable";
    let http_status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            imagery: if imagery_ready { "ready" } else { "unconfigured" },
            farm_store,
            last_poll: last_poll.as_ref().map(|p| p.at),
            failed_topics: last_poll.map(|p| p.failed).unwrap_or_default(),
            websocket: "ready",
            uptime_seconds: uptime_seconds(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::farm::feed::poll_once;
    use crate::test_utils::{FixedImages, FixedStats, UnreachableStore, png_fixture};
    use std::sync::Arc;

    fn state(store: Arc<UnreachableStore>) -> AppState {
        let mut config = Config::default();
        config.sentinel.client_id = Some("client".to_string());
        config.sentinel.client_secret = Some("secret".to_string());
        AppState::new(
            config,
            Arc::new(FixedImages::new(png_fixture(2, 2))),
            Arc::new(FixedStats { mean: None }),
        )
        .with_store(store)
    }

    #[tokio::test]
    async fn test_health_reads_last_poll_without_store_calls() {
        let store = Arc::new(UnreachableStore::new());
        let state = state(store.clone());

        let (status, Json(body)) = health(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.farm_store, "pending");
        assert_eq!(store.calls(), 0);

        poll_once(store.as_ref(), &state.feed).await;
        let polled = store.calls();

        let (status, Json(body)) = health(State(state.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "degraded");
        assert_eq!(body.farm_store, "unavailable");
        assert!(body.failed_topics.contains(&"polygons"));
        assert!(body.last_poll.is_some());

        health(State(state)).await;
        assert_eq!(store.calls(), polled);
    }

    #[tokio::test]
    async fn test_health_ready_after_successful_poll() {
        let state = state(Arc::new(UnreachableStore::new()));
        state.feed.record_poll(crate::farm::PollStatus {
            at: Utc::now(),
            failed: Vec::new(),
        });

        let (status, Json(body)) = health(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "healthy");
        assert_eq!(body.farm_store, "ready");
        assert!(body.failed_topics.is_empty());
    }
}
