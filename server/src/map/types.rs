//! Map-related types and error definitions

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MapConfig;
use crate::imagery::ImageryError;

/// Errors raised while decoding a fetched raster
#[derive(Debug, Error)]
pub enum ImageLoadError {
    #[error("Raster body is empty")]
    Empty,

    #[error("Failed to decode raster: {0}")]
    Decode(String),

    #[error("Raster decode did not finish within {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by the map session
#[derive(Debug, Error)]
pub enum MapError {
    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    #[error("Invalid layer id {0:?}: use 1-64 ASCII letters, digits, '_' or '-'")]
    InvalidLayerId(String),

    #[error("Layer limit reached: the session already holds {0} layers")]
    TooManyLayers(usize),

    #[error("Opacity must be within 0.0..=1.0, got {0}")]
    InvalidOpacity(f32),

    #[error("Map access token not configured")]
    MissingAccessToken,

    #[error(transparent)]
    Imagery(#[from] ImageryError),

    #[error(transparent)]
    ImageLoad(#[from] ImageLoadError),
}

/// Basemap styles the dashboard switches between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapStyle {
    Satellite,
    Dark,
}

impl MapStyle {
    pub fn toggled(self) -> Self {
        match self {
            Self::Satellite => Self::Dark,
            Self::Dark => Self::Satellite,
        }
    }

    pub fn url(self, config: &MapConfig) -> &str {
        match self {
            Self::Satellite => &config.satellite_style,
            Self::Dark => &config.dark_style,
        }
    }
}

/// Style lifecycle as seen by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "style", rename_all = "lowercase")]
pub enum StyleState {
    Ready(MapStyle),
    /// A style switch was requested and the surface has not finished loading it
    Loading(MapStyle),
}

impl StyleState {
    /// The style currently shown, or the one being loaded
    pub fn style(self) -> MapStyle {
        match self {
            Self::Ready(s) | Self::Loading(s) => s,
        }
    }

    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    GroundStation,
    Tree,
}

/// A point marker drawn on the satellite basemap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: String,
    pub kind: MarkerKind,
    pub lng: f64,
    pub lat: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Shown with a warning badge
    #[serde(default)]
    pub warning: bool,
}
