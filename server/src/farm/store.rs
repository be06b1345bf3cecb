//! Farm record store: in-memory and Firebase Realtime Database backends

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::feed::{Alert, SitePoint, alerts_from_value, sites_from_value};
use super::records::{PolygonRecord, migrate_polygon};
use super::sensors::SensorReading;
use crate::config::FarmConfig;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Farm store not configured: {0} is missing")]
    NotConfigured(&'static str),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid record key: {0:?}")]
    InvalidKey(String),

    #[error("Store returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Store did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Store request failed: {0}")]
    Transport(String),

    #[error("Malformed store response: {0}")]
    Decode(String),
}

/// A polygon record with the problems found while reading it
#[derive(Debug, Clone, Serialize)]
pub struct PolygonReport {
    pub id: String,
    pub record: PolygonRecord,
    pub errors: Vec<String>,
    pub migrated: bool,
}

/// Read access to one user's farm records
#[async_trait]
pub trait FarmStore: Send + Sync {
    /// Polygon ids in key order
    async fn polygon_ids(&self) -> Result<Vec<String>, StoreError>;

    async fn polygon(&self, id: &str) -> Result<PolygonReport, StoreError>;

    async fn ground_stations(&self) -> Result<Vec<SitePoint>, StoreError>;

    async fn trees(&self) -> Result<Vec<SitePoint>, StoreError>;

    async fn alerts(&self) -> Result<Vec<Alert>, StoreError>;

    /// Latest sensor snapshot of one ground station
    async fn sensor_reading(&self, station: &str) -> Result<SensorReading, StoreError>;
}

/// Longest accepted record key
pub const MAX_KEY_LEN: usize = 128;

/// Reject keys that could address anything but a direct child node
///
/// Only ASCII letters, digits, `_` and `-` are accepted.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

fn report(id: &str, raw: &Value) -> PolygonReport {
    let migration = migrate_polygon(raw);
    if !migration.errors.is_empty() {
        warn!(
            "Polygon {} read with {} problems",
            id,
            migration.errors.len()
        );
    }
    PolygonReport {
        id: id.to_string(),
        record: migration.record,
        errors: migration.errors.iter().map(ToString::to_string).collect(),
        migrated: migration.migrated,
    }
}

/// In-memory store holding raw stored values, used when no database is configured
#[derive(Default)]
pub struct MemoryStore {
    polygons: RwLock<BTreeMap<String, Value>>,
    ground_stations: RwLock<Value>,
    trees: RwLock<Value>,
    alerts: RwLock<Value>,
    sensors: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_polygon(&self, id: impl Into<String>, raw: Value) {
        self.polygons.write().await.insert(id.into(), raw);
    }

    pub async fn set_ground_stations(&self, raw: Value) {
        *self.ground_stations.write().await = raw;
    }

    pub async fn set_trees(&self, raw: Value) {
        *self.trees.write().await = raw;
    }

    pub async fn set_alerts(&self, raw: Value) {
        *self.alerts.write().await = raw;
    }

    pub async fn set_sensor(&self, station: impl Into<String>, raw: Value) {
        self.sensors.write().await.insert(station.into(), raw);
    }
}

#[async_trait]
impl FarmStore for MemoryStore {
    async fn polygon_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.polygons.read().await.keys().cloned().collect())
    }

    async fn polygon(&self, id: &str) -> Result<PolygonReport, StoreError> {
        validate_key(id)?;
        let polygons = self.polygons.read().await;
        let raw = polygons
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(report(id, raw))
    }

    async fn ground_stations(&self) -> Result<Vec<SitePoint>, StoreError> {
        Ok(sites_from_value(&*self.ground_stations.read().await))
    }

    async fn trees(&self) -> Result<Vec<SitePoint>, StoreError> {
        Ok(sites_from_value(&*self.trees.read().await))
    }

    async fn alerts(&self) -> Result<Vec<Alert>, StoreError> {
        Ok(alerts_from_value(&*self.alerts.read().await))
    }

    async fn sensor_reading(&self, station: &str) -> Result<SensorReading, StoreError> {
        validate_key(station)?;
        self.sensors
            .read()
            .await
            .get(station)
            .and_then(SensorReading::from_value)
            .ok_or_else(|| StoreError::NotFound(format!("gsLocal/{}", station)))
    }
}

/// Firebase Realtime Database over its REST API (`<base>/<path>.json`)
pub struct RealtimeDbStore {
    client: reqwest::Client,
    base_url: String,
    user_id: String,
    auth: Option<String>,
    timeout: Duration,
    write_back: bool,
}

impl RealtimeDbStore {
    pub fn new(client: reqwest::Client, config: &FarmConfig) -> Result<Self, StoreError> {
        let base_url = config
            .database_url
            .clone()
            .ok_or(StoreError::NotConfigured("FARM_DATABASE_URL"))?;
        let user_id = config
            .user_id
            .clone()
            .ok_or(StoreError::NotConfigured("FARM_USER_ID"))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id,
            auth: config.database_auth.clone(),
            timeout: Duration::from_secs(10),
            write_back: config.write_back_migrations,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/users/{}/{}.json", self.base_url, self.user_id, path)
    }

    /// Path of a keyed child under `collection`
    fn child(collection: &str, key: &str) -> Result<String, StoreError> {
        validate_key(key)?;
        Ok(format!("{}/{}", collection, key))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, self.url(path))
            .timeout(self.timeout);
        if let Some(auth) = &self.auth {
            builder = builder.query(&[("auth", auth.as_str())]);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value, StoreError> {
        counter!("fieldwatch_store_requests_total").increment(1);
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout(self.timeout)
            } else {
                StoreError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            counter!("fieldwatch_store_failures_total").increment(1);
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn get(&self, path: &str) -> Result<Value, StoreError> {
        self.send(self.request(reqwest::Method::GET, path)).await
    }

    /// Add the current-schema fields next to the legacy ones
    async fn write_back(&self, id: &str, record: &PolygonRecord) -> Result<(), StoreError> {
        let builder = self
            .request(reqwest::Method::PATCH, &Self::child("polygons", id)?)
            .json(record);
        self.send(builder).await?;
        info!("Migrated polygon {} written back", id);
        Ok(())
    }
}

#[async_trait]
impl FarmStore for RealtimeDbStore {
    async fn polygon_ids(&self) -> Result<Vec<String>, StoreError> {
        let builder = self
            .request(reqwest::Method::GET, "polygons")
            .query(&[("shallow", "true")]);
        match self.send(builder).await? {
            Value::Object(map) => Ok(map.keys().cloned().collect()),
            Value::Array(items) => Ok(items
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_null())
                .map(|(i, _)| i.to_string())
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn polygon(&self, id: &str) -> Result<PolygonReport, StoreError> {
        let raw = self.get(&Self::child("polygons", id)?).await?;
        if raw.is_null() {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let report = report(id, &raw);
        if report.migrated && report.errors.is_empty() && self.write_back {
            // The read already succeeded; a failed write only delays migration
            if let Err(e) = self.write_back(id, &report.record).await {
                warn!("Failed to write back polygon {}: {}", id, e);
            }
        } else if report.migrated {
            debug!("Polygon {} served from legacy schema", id);
        }
        Ok(report)
    }

    async fn ground_stations(&self) -> Result<Vec<SitePoint>, StoreError> {
        Ok(sites_from_value(&self.get("gsLocal").await?))
    }

    async fn trees(&self) -> Result<Vec<SitePoint>, StoreError> {
        Ok(sites_from_value(&self.get("treeLocal").await?))
    }

    async fn alerts(&self) -> Result<Vec<Alert>, StoreError> {
        Ok(alerts_from_value(&self.get("alert").await?))
    }

    async fn sensor_reading(&self, station: &str) -> Result<SensorReading, StoreError> {
        let path = Self::child("gsLocal", station)?;
        let raw = self.get(&path).await?;
        SensorReading::from_value(&raw).ok_or(StoreError::NotFound(path))
    }
}
