//! Layer registry and decoded image ownership
//!
//! The registry is the single owner of every NDVI layer. Each layer holds an
//! `ImageHandle`; dropping the handle releases the decoded raster. The
//! `ImageStore` tracks which handle generations are still alive so leaks and
//! release ordering show up in tests and metrics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashSet;
use image::RgbaImage;
use indexmap::IndexMap;
use metrics::gauge;
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::geo::{AreaOfInterest, BoundingBox, Corners, DateSelection};

const LAYER_ID_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MAX_LAYER_ID_LEN: usize = 64;

/// Ids must be usable as a single URL path segment
pub fn is_valid_layer_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_LAYER_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// `ndvi-<unix millis>-<9 random base36 chars>`
pub fn generate_layer_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let mut rng = rand::rng();
    let suffix: String = (0..LAYER_ID_SUFFIX_LEN)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    format!("ndvi-{}-{}", millis, suffix)
}

/// Decoded raster plus the encoded bytes it came from
pub struct DecodedRaster {
    pub pixels: RgbaImage,
    pub encoded: Bytes,
    pub content_type: String,
}

impl DecodedRaster {
    pub fn new(pixels: RgbaImage, encoded: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            pixels,
            encoded,
            content_type: content_type.into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Issues image handles and tracks the live ones by generation
#[derive(Clone, Default)]
pub struct ImageStore {
    live: Arc<DashSet<u64>>,
    generation: Arc<AtomicU64>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a decoded raster
    pub fn adopt(&self, raster: DecodedRaster) -> ImageHandle {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.live.insert(generation);
        gauge!("fieldwatch_live_images").set(self.live.len() as f64);
        ImageHandle {
            raster: Arc::new(raster),
            generation,
            live: Arc::clone(&self.live),
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Whether the handle with `generation` has not been released yet
    pub fn is_live(&self, generation: u64) -> bool {
        self.live.contains(&generation)
    }
}

/// Move-only owner of one decoded raster; dropping it releases the image
pub struct ImageHandle {
    raster: Arc<DecodedRaster>,
    generation: u64,
    live: Arc<DashSet<u64>>,
}

impl ImageHandle {
    pub fn raster(&self) -> &DecodedRaster {
        &self.raster
    }

    /// Monotonic per-store number; changes whenever a layer's image is replaced
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        self.live.remove(&self.generation);
        gauge!("fieldwatch_live_images").set(self.live.len() as f64);
    }
}

/// A georeferenced NDVI raster registered on the map
pub struct NdviLayer {
    pub id: String,
    pub image: ImageHandle,
    pub bounds: Corners,
    pub date: DateSelection,
    pub area: AreaOfInterest,
}

impl NdviLayer {
    pub fn bounding_box(&self) -> BoundingBox {
        self.area.bounding_box()
    }

    /// Path clients load the overlay image from
    pub fn image_url(&self) -> String {
        format!(
            "/api/map/layers/{}/image?v={}",
            self.id,
            self.image.generation()
        )
    }
}

/// Input to `LayerRegistry::add`
pub struct NewLayer {
    /// Reuse an id to replace that layer; `None` generates a fresh one
    pub id: Option<String>,
    pub image: ImageHandle,
    pub area: AreaOfInterest,
    pub date: DateSelection,
}

/// Layer listing entry
#[derive(Debug, Clone, Serialize)]
pub struct LayerSummary {
    pub id: String,
    pub date: DateSelection,
    pub bounds: Corners,
    pub width: u32,
    pub height: u32,
    pub image_url: String,
}

impl From<&NdviLayer> for LayerSummary {
    fn from(layer: &NdviLayer) -> Self {
        Self {
            id: layer.id.clone(),
            date: layer.date,
            bounds: layer.bounds,
            width: layer.image.raster().width(),
            height: layer.image.raster().height(),
            image_url: layer.image_url(),
        }
    }
}

/// Insertion-ordered set of layers with one global visibility flag
pub struct LayerRegistry {
    layers: IndexMap<String, NdviLayer>,
    visible: bool,
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self {
            layers: IndexMap::new(),
            visible: true,
        }
    }

    /// Register a layer and return its id
    ///
    /// An existing layer with the same id is dropped, releasing its image,
    /// before the new one is stored. The replacement moves to the end.
    pub fn add(&mut self, new: NewLayer) -> String {
        let id = new.id.unwrap_or_else(generate_layer_id);

        if let Some(previous) = self.layers.shift_remove(&id) {
            debug!("Replacing layer {}", id);
            drop(previous);
        }

        let layer = NdviLayer {
            id: id.clone(),
            bounds: new.area.bounding_box().corners(),
            image: new.image,
            date: new.date,
            area: new.area,
        };
        self.layers.insert(id.clone(), layer);
        gauge!("fieldwatch_layers").set(self.layers.len() as f64);
        id
    }

    pub fn remove(&mut self, id: &str) -> Option<NdviLayer> {
        let removed = self.layers.shift_remove(id);
        gauge!("fieldwatch_layers").set(self.layers.len() as f64);
        removed
    }

    pub fn get(&self, id: &str) -> Option<&NdviLayer> {
        self.layers.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.layers.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.layers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NdviLayer> {
        self.layers.values()
    }

    pub fn list(&self) -> Vec<LayerSummary> {
        self.layers.values().map(LayerSummary::from).collect()
    }

    /// Drop every layer; all images are released before this returns
    pub fn clear(&mut self) -> usize {
        let count = self.layers.len();
        self.layers.clear();
        gauge!("fieldwatch_layers").set(0.0);
        count
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}
