//! Map overlay module
//!
//! This module provides:
//! - `LayerRegistry` owning NDVI layers and their decoded images
//! - `OverlayRenderer` keeping layers attached across basemap style switches
//! - `SceneSurface`, the server-side map that clients mirror
//! - `MapSession` orchestrating fetch, decode and attach
//! - HTTP routes for layers, visibility and style

pub mod registry;
pub mod renderer;
pub mod routes;
mod session;
pub mod surface;
mod types;

pub use registry::{ImageHandle, ImageStore, LayerRegistry, LayerSummary, NdviLayer};
pub use renderer::{OverlayRenderer, PreparedLayer, decode_raster};
pub use routes::{MapAppState, map_routes};
pub use session::{AddLayer, MapSession};
pub use surface::{MapSurface, Scene, SceneSurface};
pub use types::{ImageLoadError, MapError, MapStyle, Marker, MarkerKind, StyleState};
