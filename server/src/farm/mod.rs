//! Farm records module
//!
//! This module provides:
//! - `FarmStore` trait with in-memory and realtime database backends
//! - Legacy polygon record migration to the current schema
//! - `LiveFeed` pushing ground stations, trees, alerts and polygon ids
//! - Ground-station sensor readings with a short per-minute history
//! - HTTP routes for records, alerts, sites and sensor readings

pub mod feed;
pub mod records;
pub mod routes;
pub mod sensors;
pub mod store;

pub use feed::{
    Alert, LiveFeed, PollStatus, SitePoint, Subscription, spawn_marker_sync, spawn_store_poller,
};
pub use records::{Migration, ParseError, PolygonRecord, migrate_polygon};
pub use routes::{FarmAppState, farm_routes};
pub use sensors::{SensorReading, SensorSample, SensorSeries};
pub use store::{FarmStore, MemoryStore, PolygonReport, RealtimeDbStore, StoreError};
