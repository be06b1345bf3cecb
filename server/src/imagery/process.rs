//! NDVI image fetch through the Sentinel Hub Process API

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::header;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::auth::TokenProvider;
use super::cache::{RasterCache, RasterKey};
use super::evalscript::ndvi_visualization_script;
use super::types::{ImageryError, RasterImage};
use crate::config::SentinelConfig;
use crate::geo::{AreaOfInterest, DateSelection, LngLat};

/// CRS identifier for WGS84 longitude/latitude
pub const WGS84_CRS: &str = "http://www.opengis.net/def/crs/EPSG/0/4326";

/// Sentinel-2 L2A collection identifier
pub const S2_L2A: &str = "S2L2A";

/// Request body for the processing API
#[derive(Debug, Clone, Serialize)]
pub struct ProcessRequest {
    pub input: ProcessInput,
    pub output: ProcessOutput,
    pub evalscript: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessInput {
    pub bounds: Bounds,
    pub data: Vec<DataSource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bounds {
    pub geometry: PolygonGeometry,
    pub properties: CrsProperties,
}

impl Bounds {
    pub fn wgs84(area: &AreaOfInterest) -> Self {
        Self {
            geometry: PolygonGeometry::new(area),
            properties: CrsProperties {
                crs: WGS84_CRS.to_string(),
            },
        }
    }
}

/// GeoJSON polygon with a single outer ring
#[derive(Debug, Clone, Serialize)]
pub struct PolygonGeometry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub coordinates: Vec<Vec<LngLat>>,
}

impl PolygonGeometry {
    pub fn new(area: &AreaOfInterest) -> Self {
        Self {
            kind: "Polygon",
            coordinates: vec![area.ring().to_vec()],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CrsProperties {
    pub crs: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataSource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "dataFilter")]
    pub data_filter: DataFilter,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mosaicking_order: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeRange {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutput {
    pub width: u32,
    pub height: u32,
    pub responses: Vec<OutputResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputResponse {
    pub identifier: String,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ProcessRequest {
    /// Build the NDVI render request for one polygon and one acquisition day
    pub fn ndvi(area: &AreaOfInterest, date: DateSelection, size: u32) -> Self {
        let (from, to) = date.time_window();
        Self {
            input: ProcessInput {
                bounds: Bounds::wgs84(area),
                data: vec![DataSource {
                    kind: S2_L2A.to_string(),
                    data_filter: DataFilter {
                        time_range: Some(TimeRange { from, to }),
                        mosaicking_order: None,
                    },
                }],
            },
            output: ProcessOutput {
                width: size,
                height: size,
                responses: vec![OutputResponse {
                    identifier: "default".to_string(),
                    format: OutputFormat {
                        kind: "image/png".to_string(),
                    },
                }],
            },
            evalscript: ndvi_visualization_script(),
        }
    }
}

/// Source of rendered NDVI rasters
#[async_trait]
pub trait ImagerySource: Send + Sync {
    async fn fetch_ndvi_image(
        &self,
        area: &AreaOfInterest,
        date: DateSelection,
    ) -> Result<RasterImage, ImageryError>;
}

/// Fetches rendered NDVI rasters from the processing API
pub struct ImageGateway {
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    process_url: String,
    timeout: Duration,
    image_size: u32,
    cache: Option<RasterCache>,
}

impl ImageGateway {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<dyn TokenProvider>,
        config: &SentinelConfig,
    ) -> Self {
        Self {
            client,
            tokens,
            process_url: config.process_url.clone(),
            timeout: config.request_timeout,
            image_size: config.image_size,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: RasterCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// One token exchange followed by one processing request
    #[instrument(skip(self, area), fields(date = %date))]
    async fn fetch_uncached(
        &self,
        area: &AreaOfInterest,
        date: DateSelection,
    ) -> Result<RasterImage, ImageryError> {
        let start = Instant::now();
        counter!("fieldwatch_imagery_requests_total").increment(1);

        let token = self.tokens.fetch_token().await.map_err(|e| {
            warn!("Token exchange failed, skipping image request: {}", e);
            ImageryError::from(e)
        })?;

        let body = ProcessRequest::ndvi(area, date, self.image_size);
        debug!("Requesting NDVI raster for {} points", area.ring().len());

        let response = self
            .client
            .post(&self.process_url)
            .bearer_auth(token.secret())
            .header(header::ACCEPT, "image/png")
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ImageryError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            counter!("fieldwatch_imagery_failures_total", "status" => status.as_u16().to_string())
                .increment(1);
            warn!("Processing API returned {}: {}", status, text);
            return Err(ImageryError::from_status(status.as_u16(), text));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImageryError::from_reqwest(e, self.timeout))?;

        if bytes.is_empty() {
            return Err(ImageryError::InvalidResponse("empty image body".to_string()));
        }
        if !content_type.starts_with("image/") {
            let preview = String::from_utf8_lossy(&bytes[..bytes.len().min(200)]).into_owned();
            return Err(ImageryError::InvalidResponse(format!(
                "expected image content, got '{}': {}",
                content_type, preview
            )));
        }

        histogram!("fieldwatch_imagery_request_duration_seconds").record(start.elapsed());
        info!(
            "Fetched NDVI raster for {} ({} bytes, {})",
            date,
            bytes.len(),
            content_type
        );

        Ok(RasterImage {
            bytes,
            content_type,
        })
    }
}

#[async_trait]
impl ImagerySource for ImageGateway {
    async fn fetch_ndvi_image(
        &self,
        area: &AreaOfInterest,
        date: DateSelection,
    ) -> Result<RasterImage, ImageryError> {
        match &self.cache {
            Some(cache) => {
                cache
                    .get_or_try_insert_with(RasterKey::new(area, date), || {
                        self.fetch_uncached(area, date)
                    })
                    .await
            }
            None => self.fetch_uncached(area, date).await,
        }
    }
}
