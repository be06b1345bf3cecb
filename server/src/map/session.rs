//! Map session: fetch, decode and attach NDVI layers for connected clients

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use metrics::histogram;
use tokio::sync::{RwLock, watch};
use tracing::{info, warn};

use super::registry::{LayerSummary, is_valid_layer_id};
use super::renderer::{OverlayRenderer, PreparedLayer, decode_raster};
use super::surface::{Scene, SceneSurface};
use super::types::{MapError, MapStyle, Marker, StyleState};
use crate::config::MapConfig;
use crate::geo::{AreaOfInterest, DateSelection};
use crate::imagery::ImagerySource;

/// Request to add (or replace) one NDVI layer
#[derive(Debug, Clone)]
pub struct AddLayer {
    pub id: Option<String>,
    pub area: AreaOfInterest,
    pub date: DateSelection,
}

/// Shared map state behind one lock
///
/// Upstream fetches and decoding run without the lock; only the final attach
/// takes it. Two adds racing on the same id resolve to whichever attaches last.
pub struct MapSession {
    renderer: RwLock<OverlayRenderer<SceneSurface>>,
    images: Arc<dyn ImagerySource>,
    decode_timeout: Duration,
    max_layers: usize,
    revisions: watch::Receiver<u64>,
}

impl MapSession {
    pub fn new(images: Arc<dyn ImagerySource>, config: &MapConfig) -> Self {
        let surface = SceneSurface::new(config.satellite_style.clone());
        let revisions = surface.subscribe();
        Self {
            renderer: RwLock::new(OverlayRenderer::new(surface, config.clone())),
            images,
            decode_timeout: config.image_decode_timeout,
            max_layers: config.max_layers,
            revisions,
        }
    }

    /// Fetch, decode and attach a layer
    ///
    /// The layer limit is checked before the upstream fetch and again under
    /// the write lock, since other adds may have landed in between.
    pub async fn add_layer(&self, request: AddLayer) -> Result<LayerSummary, MapError> {
        let start = Instant::now();

        if let Some(id) = &request.id
            && !is_valid_layer_id(id)
        {
            return Err(MapError::InvalidLayerId(id.clone()));
        }
        self.ensure_room(&*self.renderer.read().await, request.id.as_deref())?;

        let raster = self
            .images
            .fetch_ndvi_image(&request.area, request.date)
            .await?;
        let decoded = decode_raster(raster, self.decode_timeout)
            .await
            .inspect_err(|e| warn!("Discarding raster for {}: {}", request.date, e))?;

        let mut renderer = self.renderer.write().await;
        self.ensure_room(&*renderer, request.id.as_deref())?;
        let id = renderer.attach(PreparedLayer {
            id: request.id,
            raster: decoded,
            area: request.area,
            date: request.date,
        });
        let summary = renderer
            .registry()
            .get(&id)
            .map(LayerSummary::from)
            .ok_or_else(|| MapError::LayerNotFound(id.clone()))?;

        histogram!("fieldwatch_layer_add_duration_seconds").record(start.elapsed());
        Ok(summary)
    }

    fn ensure_room(
        &self,
        renderer: &OverlayRenderer<SceneSurface>,
        id: Option<&str>,
    ) -> Result<(), MapError> {
        if renderer.has_room_for(id) {
            Ok(())
        } else {
            warn!("Rejecting layer: limit of {} reached", self.max_layers);
            Err(MapError::TooManyLayers(self.max_layers))
        }
    }

    pub async fn remove_layer(&self, id: &str) -> Result<(), MapError> {
        if self.renderer.write().await.remove(id) {
            Ok(())
        } else {
            Err(MapError::LayerNotFound(id.to_string()))
        }
    }

    pub async fn clear(&self) -> usize {
        self.renderer.write().await.clear()
    }

    pub async fn list(&self) -> Vec<LayerSummary> {
        self.renderer.read().await.list()
    }

    /// Encoded image bytes and content type of a layer
    pub async fn layer_image(&self, id: &str) -> Result<(Bytes, String), MapError> {
        let renderer = self.renderer.read().await;
        let layer = renderer
            .registry()
            .get(id)
            .ok_or_else(|| MapError::LayerNotFound(id.to_string()))?;
        let raster = layer.image.raster();
        Ok((raster.encoded.clone(), raster.content_type.clone()))
    }

    pub async fn set_visible(&self, visible: bool) {
        self.renderer.write().await.set_visible(visible);
    }

    pub async fn is_visible(&self) -> bool {
        self.renderer.read().await.registry().is_visible()
    }

    pub async fn set_layer_opacity(&self, id: &str, opacity: f32) -> Result<(), MapError> {
        self.renderer.write().await.set_layer_opacity(id, opacity)
    }

    /// Switch basemap style and restore overlays once it has loaded
    ///
    /// The scene surface has no asynchronous asset loading, so the load
    /// completes right after the switch. The lock is released in between:
    /// layers attached in that window are deferred and restored with the rest.
    pub async fn toggle_style(&self) -> MapStyle {
        let target = self.renderer.write().await.toggle_style();
        tokio::task::yield_now().await;
        let restored = self.renderer.write().await.on_style_loaded();
        info!("Style {:?} loaded, {} overlays restored", target, restored);
        target
    }

    pub async fn style(&self) -> StyleState {
        self.renderer.read().await.style()
    }

    pub async fn set_markers(&self, markers: Vec<Marker>) {
        self.renderer.write().await.set_markers(markers);
    }

    pub async fn scene(&self) -> Scene {
        self.renderer.read().await.surface().scene().clone()
    }

    pub async fn live_images(&self) -> usize {
        self.renderer.read().await.store().live_count()
    }

    /// Receiver notified on every scene revision
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revisions.clone()
    }
}
