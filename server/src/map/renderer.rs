//! Overlay renderer: keeps registered NDVI layers in sync with a map surface

use std::collections::HashMap;
use std::time::Duration;

use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use super::registry::{DecodedRaster, ImageStore, LayerRegistry, LayerSummary, NewLayer};
use super::surface::{MapSurface, OverlaySource};
use super::types::{ImageLoadError, MapError, MapStyle, Marker, StyleState};
use crate::config::MapConfig;
use crate::geo::{AreaOfInterest, DateSelection};
use crate::imagery::RasterImage;

/// Decode a fetched raster on a blocking thread, bounded by `timeout`
pub async fn decode_raster(
    raster: RasterImage,
    timeout: Duration,
) -> Result<DecodedRaster, ImageLoadError> {
    if raster.is_empty() {
        return Err(ImageLoadError::Empty);
    }

    let start = std::time::Instant::now();
    let bytes = raster.bytes.clone();
    let task = tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes).map(|img| img.to_rgba8())
    });

    let pixels = match tokio::time::timeout(timeout, task).await {
        Err(_) => {
            counter!("fieldwatch_decode_failures_total", "reason" => "timeout").increment(1);
            return Err(ImageLoadError::Timeout(timeout));
        }
        Ok(Err(join)) => return Err(ImageLoadError::Decode(join.to_string())),
        Ok(Ok(Err(e))) => {
            counter!("fieldwatch_decode_failures_total", "reason" => "decode").increment(1);
            return Err(ImageLoadError::Decode(e.to_string()));
        }
        Ok(Ok(Ok(pixels))) => pixels,
    };

    histogram!("fieldwatch_decode_duration_seconds").record(start.elapsed());
    Ok(DecodedRaster::new(pixels, raster.bytes, raster.content_type))
}

/// A decoded raster ready to be registered and attached
pub struct PreparedLayer {
    pub id: Option<String>,
    pub raster: DecodedRaster,
    pub area: AreaOfInterest,
    pub date: DateSelection,
}

/// Owns the layer registry and mirrors it onto a `MapSurface`
pub struct OverlayRenderer<S: MapSurface> {
    surface: S,
    registry: LayerRegistry,
    store: ImageStore,
    style: StyleState,
    config: MapConfig,
    layer_opacity: HashMap<String, f32>,
    markers: Vec<Marker>,
    /// Layer attached while a style was loading; the viewport is fitted to it on load
    pending_fit: Option<String>,
}

impl<S: MapSurface> OverlayRenderer<S> {
    pub fn new(surface: S, config: MapConfig) -> Self {
        Self {
            surface,
            registry: LayerRegistry::new(),
            store: ImageStore::new(),
            style: StyleState::Ready(MapStyle::Satellite),
            config,
            layer_opacity: HashMap::new(),
            markers: Vec::new(),
            pending_fit: None,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn registry(&self) -> &LayerRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    pub fn style(&self) -> StyleState {
        self.style
    }

    /// Whether a layer with `id` can be attached without exceeding `max_layers`
    ///
    /// Replacing an existing id never adds a layer.
    pub fn has_room_for(&self, id: Option<&str>) -> bool {
        id.is_some_and(|id| self.registry.contains(id))
            || self.registry.len() < self.config.max_layers
    }

    fn opacity_for(&self, id: &str) -> f32 {
        if !self.registry.is_visible() {
            return 0.0;
        }
        self.layer_opacity
            .get(id)
            .copied()
            .unwrap_or(self.config.overlay_opacity)
    }

    /// Attach a registered layer to the surface; no-op for unknown ids
    fn show(&mut self, id: &str) -> bool {
        let Some(layer) = self.registry.get(id) else {
            return false;
        };
        let source = OverlaySource {
            url: layer.image_url(),
            corners: layer.bounds,
        };
        let opacity = self.opacity_for(id);
        self.surface.add_image_overlay(id, &source, opacity);
        true
    }

    /// Register a decoded layer and attach it to the surface
    ///
    /// While a style is loading the layer is only registered; `on_style_loaded`
    /// attaches it and fits the viewport to the most recent one.
    pub fn attach(&mut self, prepared: PreparedLayer) -> String {
        let id = prepared
            .id
            .unwrap_or_else(super::registry::generate_layer_id);

        // Detach before the registry drops the previous image
        if self.surface.remove_overlay(&id) {
            debug!("Detached previous overlay {}", id);
        }

        let bbox = prepared.area.bounding_box();
        let handle = self.store.adopt(prepared.raster);
        self.registry.add(NewLayer {
            id: Some(id.clone()),
            image: handle,
            area: prepared.area,
            date: prepared.date,
        });
        counter!("fieldwatch_layers_attached_total").increment(1);

        if self.style.is_ready() {
            self.show(&id);
            self.surface.fit_bounds(bbox, self.config.fit_padding);
        } else {
            debug!("Style loading, deferring overlay {}", id);
            self.pending_fit = Some(id.clone());
        }

        info!("Layer {} attached for {}", id, self.date_of(&id));
        id
    }

    fn date_of(&self, id: &str) -> String {
        self.registry
            .get(id)
            .map(|l| l.date.to_string())
            .unwrap_or_default()
    }

    /// Detach and release one layer
    pub fn remove(&mut self, id: &str) -> bool {
        self.surface.remove_overlay(id);
        self.layer_opacity.remove(id);
        let removed = self.registry.remove(id).is_some();
        if removed {
            info!("Layer {} removed", id);
        }
        removed
    }

    /// Detach and release every layer
    pub fn clear(&mut self) -> usize {
        for id in self.registry.ids() {
            self.surface.remove_overlay(&id);
        }
        self.layer_opacity.clear();
        let count = self.registry.clear();
        info!("Cleared {} layers", count);
        count
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.registry.set_visible(visible);
        for id in self.registry.ids() {
            let opacity = self.opacity_for(&id);
            self.surface.set_overlay_opacity(&id, opacity);
        }
        debug!("NDVI visibility set to {}", visible);
    }

    pub fn set_layer_opacity(&mut self, id: &str, opacity: f32) -> Result<(), MapError> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(MapError::InvalidOpacity(opacity));
        }
        if !self.registry.contains(id) {
            return Err(MapError::LayerNotFound(id.to_string()));
        }
        self.layer_opacity.insert(id.to_string(), opacity);
        let effective = self.opacity_for(id);
        self.surface.set_overlay_opacity(id, effective);
        Ok(())
    }

    /// Switch between satellite and dark; the surface starts loading
    pub fn toggle_style(&mut self) -> MapStyle {
        let target = self.style.style().toggled();
        self.surface.set_style(target.url(&self.config));
        self.style = StyleState::Loading(target);
        counter!("fieldwatch_style_switches_total").increment(1);
        info!("Switching map style to {:?}", target);
        target
    }

    /// Re-attach whatever the surface lost while the style loaded
    ///
    /// Idempotent: overlays still present on the surface are left alone.
    pub fn on_style_loaded(&mut self) -> usize {
        let style = self.style.style();
        self.style = StyleState::Ready(style);

        let mut restored = 0;
        for id in self.registry.ids() {
            if !self.surface.has_overlay(&id) && self.show(&id) {
                restored += 1;
            }
        }

        // Removed before the load finished: nothing to fit
        if let Some(id) = self.pending_fit.take()
            && let Some(layer) = self.registry.get(&id)
        {
            let bbox = layer.bounding_box();
            self.surface.fit_bounds(bbox, self.config.fit_padding);
        }

        if style == MapStyle::Satellite {
            self.redraw_markers();
        } else {
            self.surface.clear_markers();
        }

        if restored > 0 {
            debug!("Restored {} overlays after style load", restored);
        }
        restored
    }

    /// Replace ground-station and tree markers; drawn only on the satellite style
    pub fn set_markers(&mut self, markers: Vec<Marker>) {
        self.markers = markers;
        if self.style == StyleState::Ready(MapStyle::Satellite) {
            self.redraw_markers();
        }
    }

    fn redraw_markers(&mut self) {
        self.surface.clear_markers();
        for marker in &self.markers {
            self.surface.add_marker(marker.clone());
        }
    }

    pub fn list(&self) -> Vec<LayerSummary> {
        self.registry.list()
    }
}

impl<S: MapSurface> Drop for OverlayRenderer<S> {
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            warn!(
                "Renderer dropped with {} layers still registered",
                self.registry.len()
            );
            self.clear();
        }
    }
}
