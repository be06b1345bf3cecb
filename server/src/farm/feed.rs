//! Live farm data feed
//!
//! Ground stations, trees, alerts and polygon ids are published through
//! `watch` channels. Consumers hold a `Subscription`, which deregisters when
//! dropped. A poller task fills the feed from the store and a marker task
//! forwards site positions to the map renderer. Each poll also appends the
//! stations' sensor readings to a short per-minute history and records its
//! own outcome for health reporting.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::sensors::{SensorReading, SensorSeries};
use super::store::{FarmStore, StoreError};
use crate::map::{MapSession, Marker, MarkerKind};

/// Scores below this get a warning badge
pub const WARNING_SCORE: f64 = 5.0;

/// A ground station or tree position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitePoint {
    pub id: String,
    pub lat: f64,
    pub long: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl SitePoint {
    pub fn needs_attention(&self) -> bool {
        self.score.is_some_and(|s| s < WARNING_SCORE)
    }

    pub fn marker(&self, kind: MarkerKind) -> Marker {
        Marker {
            id: self.id.clone(),
            kind,
            lng: self.long,
            lat: self.lat,
            score: self.score,
            warning: self.needs_attention(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub message: String,
}

fn number(v: Option<&Value>) -> Option<f64> {
    let parsed = match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// Keyed site map to points; entries without a usable position are skipped
pub fn sites_from_value(raw: &Value) -> Vec<SitePoint> {
    let entries: Vec<(String, &Value)> = match raw {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => return Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|(id, v)| {
            Some(SitePoint {
                lat: number(v.get("lat"))?,
                long: number(v.get("long"))?,
                score: number(v.get("score")),
                id,
            })
        })
        .collect()
}

/// Keyed alert messages in key order
pub fn alerts_from_value(raw: &Value) -> Vec<Alert> {
    let Value::Object(map) = raw else {
        return Vec::new();
    };
    let mut alerts: Vec<Alert> = map
        .iter()
        .map(|(k, v)| Alert {
            id: k.clone(),
            message: match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        })
        .collect();
    alerts.sort_by(|a, b| a.id.cmp(&b.id));
    alerts
}

/// Receiving end of one feed topic; deregisters on drop
pub struct Subscription<T> {
    rx: watch::Receiver<T>,
    topic: &'static str,
    subscribers: Arc<AtomicUsize>,
}

impl<T: Clone> Subscription<T> {
    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait for the next published value; `None` once the feed is gone
    pub async fn changed(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let remaining = self.subscribers.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!("fieldwatch_feed_subscribers").set(remaining as f64);
        debug!("Unsubscribed from {} ({} remaining)", self.topic, remaining);
    }
}

/// Outcome of one store poll
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollStatus {
    pub at: DateTime<Utc>,
    /// Topics whose refresh failed; they keep their previous value
    pub failed: Vec<&'static str>,
}

impl PollStatus {
    pub fn is_healthy(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Push-based farm data
pub struct LiveFeed {
    stations: watch::Sender<Vec<SitePoint>>,
    trees: watch::Sender<Vec<SitePoint>>,
    alerts: watch::Sender<Vec<Alert>>,
    polygons: watch::Sender<Vec<String>>,
    sensors: watch::Sender<BTreeMap<String, SensorSeries>>,
    last_poll: watch::Sender<Option<PollStatus>>,
    subscribers: Arc<AtomicUsize>,
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::new()
    }
}

fn publish<T: PartialEq>(tx: &watch::Sender<T>, value: T) -> bool {
    tx.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    })
}

impl LiveFeed {
    pub fn new() -> Self {
        Self {
            stations: watch::channel(Vec::new()).0,
            trees: watch::channel(Vec::new()).0,
            alerts: watch::channel(Vec::new()).0,
            polygons: watch::channel(Vec::new()).0,
            sensors: watch::channel(BTreeMap::new()).0,
            last_poll: watch::channel(None).0,
            subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn subscription<T>(&self, tx: &watch::Sender<T>, topic: &'static str) -> Subscription<T> {
        let count = self.subscribers.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!("fieldwatch_feed_subscribers").set(count as f64);
        debug!("Subscribed to {}", topic);
        Subscription {
            rx: tx.subscribe(),
            topic,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Returns `true` when the value changed
    pub fn publish_stations(&self, stations: Vec<SitePoint>) -> bool {
        publish(&self.stations, stations)
    }

    pub fn publish_trees(&self, trees: Vec<SitePoint>) -> bool {
        publish(&self.trees, trees)
    }

    pub fn publish_alerts(&self, alerts: Vec<Alert>) -> bool {
        publish(&self.alerts, alerts)
    }

    pub fn publish_polygons(&self, ids: Vec<String>) -> bool {
        publish(&self.polygons, ids)
    }

    pub fn subscribe_stations(&self) -> Subscription<Vec<SitePoint>> {
        self.subscription(&self.stations, "ground_stations")
    }

    pub fn subscribe_trees(&self) -> Subscription<Vec<SitePoint>> {
        self.subscription(&self.trees, "trees")
    }

    pub fn subscribe_alerts(&self) -> Subscription<Vec<Alert>> {
        self.subscription(&self.alerts, "alerts")
    }

    pub fn stations(&self) -> Vec<SitePoint> {
        self.stations.borrow().clone()
    }

    pub fn trees(&self) -> Vec<SitePoint> {
        self.trees.borrow().clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.borrow().clone()
    }

    /// Last polygon ids the store reported
    pub fn polygons(&self) -> Vec<String> {
        self.polygons.borrow().clone()
    }

    /// Add `reading` to `station`'s history; `true` when the history changed
    pub fn record_reading(
        &self,
        station: &str,
        at: DateTime<Utc>,
        reading: SensorReading,
    ) -> bool {
        self.sensors.send_if_modified(|all| {
            all.entry(station.to_string())
                .or_default()
                .record(at, reading)
        })
    }

    pub fn sensor_series(&self, station: &str) -> Option<SensorSeries> {
        self.sensors.borrow().get(station).cloned()
    }

    pub fn record_poll(&self, status: PollStatus) {
        self.last_poll.send_replace(Some(status));
    }

    /// `None` until the first poll completes
    pub fn last_poll(&self) -> Option<PollStatus> {
        self.last_poll.borrow().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }
}

/// Refresh every topic from the store; a failing topic keeps its last value
pub async fn poll_once(store: &dyn FarmStore, feed: &LiveFeed) -> PollStatus {
    let mut failed = Vec::new();

    match store.ground_stations().await {
        Ok(stations) => {
            if !poll_sensors(store, feed, &stations).await {
                failed.push("sensors");
            }
            feed.publish_stations(stations);
        }
        Err(e) => {
            warn!("Failed to poll ground stations: {}", e);
            failed.push("ground_stations");
        }
    }
    match store.trees().await {
        Ok(v) => {
            feed.publish_trees(v);
        }
        Err(e) => {
            warn!("Failed to poll trees: {}", e);
            failed.push("trees");
        }
    }
    match store.alerts().await {
        Ok(v) => {
            feed.publish_alerts(v);
        }
        Err(e) => {
            warn!("Failed to poll alerts: {}", e);
            failed.push("alerts");
        }
    }
    match store.polygon_ids().await {
        Ok(v) => {
            feed.publish_polygons(v);
        }
        Err(e) => {
            warn!("Failed to poll polygon ids: {}", e);
            failed.push("polygons");
        }
    }

    if !failed.is_empty() {
        counter!("fieldwatch_store_poll_failures_total").increment(1);
    }
    let status = PollStatus {
        at: Utc::now(),
        failed,
    };
    feed.record_poll(status.clone());
    status
}

/// Record the current reading of every station that reports one
///
/// Returns `false` when the store failed for any station.
async fn poll_sensors(store: &dyn FarmStore, feed: &LiveFeed, stations: &[SitePoint]) -> bool {
    let mut healthy = true;
    for station in stations {
        match store.sensor_reading(&station.id).await {
            Ok(reading) => {
                feed.record_reading(&station.id, Utc::now(), reading);
            }
            Err(StoreError::NotFound(_) | StoreError::InvalidKey(_)) => {
                debug!("Station {} has no sensor reading", station.id);
            }
            Err(e) => {
                warn!("Failed to poll sensors of {}: {}", station.id, e);
                healthy = false;
            }
        }
    }
    healthy
}

/// Poll the store on a fixed interval
pub fn spawn_store_poller(
    store: Arc<dyn FarmStore>,
    feed: Arc<LiveFeed>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            poll_once(store.as_ref(), &feed).await;
        }
    })
}

/// Ground stations and trees as map markers
pub fn markers_from_sites(stations: &[SitePoint], trees: &[SitePoint]) -> Vec<Marker> {
    stations
        .iter()
        .map(|s| s.marker(MarkerKind::GroundStation))
        .chain(trees.iter().map(|t| t.marker(MarkerKind::Tree)))
        .collect()
}

/// Forward site updates to the map renderer until the feed goes away
pub fn spawn_marker_sync(feed: Arc<LiveFeed>, session: Arc<MapSession>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stations = feed.subscribe_stations();
        let mut trees = feed.subscribe_trees();
        drop(feed);

        let mut current_stations = stations.current();
        let mut current_trees = trees.current();
        session
            .set_markers(markers_from_sites(&current_stations, &current_trees))
            .await;

        loop {
            tokio::select! {
                next = stations.changed() => match next {
                    Some(v) => current_stations = v,
                    None => break,
                },
                next = trees.changed() => match next {
                    Some(v) => current_trees = v,
                    None => break,
                },
            }
            session
                .set_markers(markers_from_sites(&current_stations, &current_trees))
                .await;
        }
        debug!("Marker sync stopped");
    })
}
