//! Test Utilities Module
//!
//! Fixtures, mock upstream sources and a router harness for unit tests.
//! This module is only compiled when running tests.

#![cfg(test)]

use crate::config::Config;
use crate::farm::{Alert, FarmStore, PolygonReport, SensorReading, SitePoint, StoreError};
use crate::geo::{AreaOfInterest, DateRange, DateSelection};
use crate::imagery::{
    ImageryError, ImagerySource, RasterImage, StatInterval, StatsSource, stats::interval_label,
};
use crate::server::{AppState, api_router};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tower::util::ServiceExt;

// ============================================================================
// Fixtures
// ============================================================================

/// Encode a `width`x`height` PNG with a green-to-red gradient
pub fn png_fixture(width: u32, height: u32) -> Bytes {
    let img = image::RgbaImage::from_fn(width, height, |x, _y| {
        let t = if width > 1 { x * 255 / (width - 1) } else { 0 };
        image::Rgba([t as u8, 255 - t as u8, 0, 255])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png fixture");
    Bytes::from(out.into_inner())
}

/// The closed unit square `[[0,0],[0,1],[1,1],[1,0],[0,0]]`
pub fn unit_square() -> AreaOfInterest {
    AreaOfInterest::from_coords(&[[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]])
        .expect("unit square is a valid area")
}

// ============================================================================
// Mock Upstream Sources
// ============================================================================

/// Imagery source answering every request with the same PNG
pub struct FixedImages {
    pub body: Bytes,
    pub calls: AtomicUsize,
}

impl FixedImages {
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImagerySource for FixedImages {
    async fn fetch_ndvi_image(
        &self,
        _area: &AreaOfInterest,
        _date: DateSelection,
    ) -> Result<RasterImage, ImageryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RasterImage {
            bytes: self.body.clone(),
            content_type: "image/png".to_string(),
        })
    }
}

/// Statistics source returning one interval per call with a fixed mean
pub struct FixedStats {
    pub mean: Option<f64>,
}

#[async_trait]
impl StatsSource for FixedStats {
    async fn fetch_stats(
        &self,
        _area: &AreaOfInterest,
        range: DateRange,
    ) -> Result<Vec<StatInterval>, ImageryError> {
        Ok(vec![StatInterval {
            interval: interval_label(range.from, range.to),
            mean: self.mean,
        }])
    }
}

/// Farm store whose every read fails as if the database were down
#[derive(Default)]
pub struct UnreachableStore {
    pub calls: AtomicUsize,
}

impl UnreachableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Transport("connection refused".to_string()))
    }
}

#[async_trait]
impl FarmStore for UnreachableStore {
    async fn polygon_ids(&self) -> Result<Vec<String>, StoreError> {
        self.fail()
    }

    async fn polygon(&self, _id: &str) -> Result<PolygonReport, StoreError> {
        self.fail()
    }

    async fn ground_stations(&self) -> Result<Vec<SitePoint>, StoreError> {
        self.fail()
    }

    async fn trees(&self) -> Result<Vec<SitePoint>, StoreError> {
        self.fail()
    }

    async fn alerts(&self) -> Result<Vec<Alert>, StoreError> {
        self.fail()
    }

    async fn sensor_reading(&self, _station: &str) -> Result<SensorReading, StoreError> {
        self.fail()
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// Router plus the state behind it
pub struct TestContext {
    pub app_state: AppState,
    pub images: Arc<FixedImages>,
    pub router: Router,
}

impl TestContext {
    pub fn new() -> Self {
        let images = Arc::new(FixedImages::new(png_fixture(4, 4)));
        let stats = Arc::new(FixedStats { mean: Some(0.42) });
        let app_state = AppState::new(Config::default(), images.clone(), stats);
        Self::with_state(app_state, images)
    }

    pub fn with_state(app_state: AppState, images: Arc<FixedImages>) -> Self {
        let router = api_router(app_state.clone());
        Self {
            app_state,
            images,
            router,
        }
    }

    /// Send a request and return the status and raw body
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, body)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, uri: &str) -> (StatusCode, T) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).expect("JSON body"))
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        uri: &str,
        payload: serde_json::Value,
    ) -> (StatusCode, T) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).expect("JSON body"))
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Initialize test logging with detailed output
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldwatch_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// ============================================================================
// Tests for Test Utilities
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_fixture_decodes() {
        let img = image::load_from_memory(&png_fixture(3, 2)).unwrap();
        assert_eq!((img.width(), img.height()), (3, 2));
    }

    #[test]
    fn test_unit_square_bounds() {
        let bbox = unit_square().bounding_box();
        assert_eq!(bbox.min_lng, 0.0);
        assert_eq!(bbox.max_lat, 1.0);
    }

    #[tokio::test]
    async fn test_context_routes_layers() {
        init_test_logging();
        let ctx = TestContext::new();
        let (status, body) = ctx
            .post_json::<serde_json::Value>(
                "/api/map/layers",
                serde_json::json!({
                    "polygon": [[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]],
                    "date": "2023-06-01"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(
            body["bounds"],
            serde_json::json!([[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]])
        );
        assert_eq!(ctx.images.calls(), 1);

        let (status, layers) = ctx.get_json::<Vec<serde_json::Value>>("/api/map/layers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(layers.len(), 1);
    }
}
