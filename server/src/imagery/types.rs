//! Imagery types and error definitions

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::auth::AuthError;
use crate::geo::GeoError;

/// Errors that can occur when requesting imagery or statistics upstream
#[derive(Debug, Error)]
pub enum ImageryError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    InvalidInput(#[from] GeoError),

    #[error("Invalid request: date range spans more than {max} intervals")]
    TooManyIntervals { max: usize },

    #[error("Upstream rejected credentials (status {status}): {body}")]
    UpstreamAuth { status: u16, body: String },

    #[error("Upstream rejected request (status {status}): {body}")]
    UpstreamRequest { status: u16, body: String },

    #[error("Upstream server error (status {status}): {body}")]
    UpstreamServer { status: u16, body: String },

    #[error("No upstream response within {0:?}")]
    UpstreamTimeout(Duration),

    #[error("Upstream transport error: {0}")]
    Transport(String),

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl ImageryError {
    /// Classify a non-success upstream status
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::UpstreamAuth { status, body },
            400..=499 => Self::UpstreamRequest { status, body },
            _ => Self::UpstreamServer { status, body },
        }
    }

    /// Map a reqwest failure, separating timeouts from other transport errors
    pub fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            Self::UpstreamTimeout(timeout)
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<AuthError> for ImageryError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingCredentials => Self::Configuration(
                "Sentinel Hub credentials not configured".to_string(),
            ),
            AuthError::Rejected { status, body } => Self::UpstreamAuth { status, body },
            AuthError::Timeout(t) => Self::UpstreamTimeout(t),
            AuthError::Transport(msg) => Self::Transport(msg),
            AuthError::MalformedResponse(msg) => Self::InvalidResponse(msg),
        }
    }
}

/// A rendered raster as returned by the processing API
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub bytes: Bytes,
    pub content_type: String,
}

impl RasterImage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Mean NDVI over one time bucket; `mean` is `None` when no pixel was valid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatInterval {
    pub interval: String,
    #[serde(rename = "ndvi_mean")]
    pub mean: Option<f64>,
}
