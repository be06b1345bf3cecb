//! Map surface abstraction and the headless scene implementation

use serde::Serialize;
use tokio::sync::watch;

use super::types::Marker;
use crate::geo::{BoundingBox, Corners};

/// Image source of an overlay: where to load it and where to pin it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlaySource {
    pub url: String,
    pub corners: Corners,
}

/// Operations the overlay renderer needs from a map
///
/// Implementations follow the behaviour of browser map libraries: switching
/// style discards every overlay and marker that was added at runtime.
pub trait MapSurface: Send + Sync {
    fn add_image_overlay(&mut self, id: &str, source: &OverlaySource, opacity: f32);

    /// Remove the overlay and its image source; `false` if none was attached
    fn remove_overlay(&mut self, id: &str) -> bool;

    fn has_overlay(&self, id: &str) -> bool;

    fn set_overlay_opacity(&mut self, id: &str, opacity: f32) -> bool;

    fn fit_bounds(&mut self, bounds: BoundingBox, padding: u32);

    /// Start loading a new basemap style
    fn set_style(&mut self, url: &str);

    fn add_marker(&mut self, marker: Marker);

    fn clear_markers(&mut self);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneOverlay {
    pub id: String,
    pub source: OverlaySource,
    pub opacity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    pub bounds: BoundingBox,
    pub padding: u32,
}

/// Everything a client needs to redraw the map
#[derive(Debug, Clone, Default, Serialize)]
pub struct Scene {
    pub revision: u64,
    pub style: String,
    pub overlays: Vec<SceneOverlay>,
    pub markers: Vec<Marker>,
    pub viewport: Option<Viewport>,
}

impl Scene {
    pub fn overlay(&self, id: &str) -> Option<&SceneOverlay> {
        self.overlays.iter().find(|o| o.id == id)
    }
}

/// Server-side map surface; clients mirror its scene
pub struct SceneSurface {
    scene: Scene,
    revisions: watch::Sender<u64>,
}

impl SceneSurface {
    pub fn new(style: impl Into<String>) -> Self {
        let (revisions, _) = watch::channel(0);
        Self {
            scene: Scene {
                style: style.into(),
                ..Scene::default()
            },
            revisions,
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Receiver that observes every revision bump
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revisions.subscribe()
    }

    fn bump(&mut self) {
        self.scene.revision += 1;
        self.revisions.send_replace(self.scene.revision);
    }
}

impl MapSurface for SceneSurface {
    fn add_image_overlay(&mut self, id: &str, source: &OverlaySource, opacity: f32) {
        let overlay = SceneOverlay {
            id: id.to_string(),
            source: source.clone(),
            opacity,
        };
        match self.scene.overlays.iter_mut().find(|o| o.id == id) {
            Some(existing) => *existing = overlay,
            None => self.scene.overlays.push(overlay),
        }
        self.bump();
    }

    fn remove_overlay(&mut self, id: &str) -> bool {
        let before = self.scene.overlays.len();
        self.scene.overlays.retain(|o| o.id != id);
        let removed = self.scene.overlays.len() != before;
        if removed {
            self.bump();
        }
        removed
    }

    fn has_overlay(&self, id: &str) -> bool {
        self.scene.overlay(id).is_some()
    }

    fn set_overlay_opacity(&mut self, id: &str, opacity: f32) -> bool {
        let Some(overlay) = self.scene.overlays.iter_mut().find(|o| o.id == id) else {
            return false;
        };
        overlay.opacity = opacity;
        self.bump();
        true
    }

    fn fit_bounds(&mut self, bounds: BoundingBox, padding: u32) {
        self.scene.viewport = Some(Viewport { bounds, padding });
        self.bump();
    }

    fn set_style(&mut self, url: &str) {
        self.scene.style = url.to_string();
        self.scene.overlays.clear();
        self.scene.markers.clear();
        self.bump();
    }

    fn add_marker(&mut self, marker: Marker) {
        self.scene.markers.push(marker);
        self.bump();
    }

    fn clear_markers(&mut self) {
        if !self.scene.markers.is_empty() {
            self.scene.markers.clear();
            self.bump();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::LngLat;
    use crate::map::types::MarkerKind;

    fn source() -> OverlaySource {
        OverlaySource {
            url: "/img".to_string(),
            corners: Corners([
                LngLat(0.0, 1.0),
                LngLat(1.0, 1.0),
                LngLat(1.0, 0.0),
                LngLat(0.0, 0.0),
            ]),
        }
    }

    #[test]
    fn test_overlay_lifecycle_bumps_revision() {
        let mut surface = SceneSurface::new("satellite");
        let rx = surface.subscribe();

        surface.add_image_overlay("a", &source(), 0.8);
        assert!(surface.has_overlay("a"));
        assert!(surface.set_overlay_opacity("a", 0.0));
        assert_eq!(surface.scene().overlay("a").unwrap().opacity, 0.0);
        assert!(surface.remove_overlay("a"));
        assert!(!surface.remove_overlay("a"));

        assert_eq!(surface.scene().revision, 3);
        assert_eq!(*rx.borrow(), 3);
    }

    #[test]
    fn test_same_id_is_not_duplicated() {
        let mut surface = SceneSurface::new("satellite");
        surface.add_image_overlay("a", &source(), 0.8);
        surface.add_image_overlay("a", &source(), 0.5);
        assert_eq!(surface.scene().overlays.len(), 1);
    }

    #[test]
    fn test_style_change_drops_runtime_content() {
        let mut surface = SceneSurface::new("satellite");
        surface.add_image_overlay("a", &source(), 0.8);
        surface.add_marker(Marker {
            id: "gs-1".to_string(),
            kind: MarkerKind::GroundStation,
            lng: 0.5,
            lat: 0.5,
            score: Some(7.0),
            warning: false,
        });

        surface.set_style("dark");
        assert_eq!(surface.scene().style, "dark");
        assert!(surface.scene().overlays.is_empty());
        assert!(surface.scene().markers.is_empty());
    }
}
