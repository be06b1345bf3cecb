//! FieldWatch Server Library
//!
//! This module exports the server components for use in integration tests
//! and external tooling.

pub mod config;
pub mod farm;
pub mod geo;
pub mod imagery;
pub mod map;
pub mod server;
pub mod weather;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use config::Config;
pub use farm::{FarmStore, LiveFeed};
pub use imagery::{ImageGateway, ImagerySource, StatsAggregator, StatsSource};
pub use map::MapSession;
pub use server::{AppState, api_router};
