//! Satellite imagery module
//!
//! This module provides:
//! - `TokenProvider` for OAuth client-credentials tokens
//! - `ImageGateway` for rendered NDVI rasters (Process API)
//! - `StatsAggregator` for NDVI time series (Statistical API)
//! - `RasterCache` for caching rendered rasters
//! - HTTP routes for images, statistics and the legend

pub mod auth;
mod cache;
pub mod evalscript;
pub mod process;
pub mod routes;
pub mod stats;
mod types;

pub use auth::{AccessToken, AuthError, ClientCredentialsProvider, TokenProvider};
pub use cache::{RasterCache, RasterKey};
pub use process::{ImageGateway, ImagerySource, ProcessRequest};
pub use routes::{ImageryAppState, ImageryErrorResponse, imagery_routes};
pub use stats::{BucketSize, StatsAggregator, StatsSource};
pub use types::{ImageryError, RasterImage, StatInterval};
