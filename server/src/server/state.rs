use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::farm::{FarmAppState, FarmStore, LiveFeed, MemoryStore, RealtimeDbStore};
use crate::imagery::{
    ClientCredentialsProvider, ImageGateway, ImageryAppState, ImagerySource, RasterCache,
    StatsAggregator, StatsSource, TokenProvider,
};
use crate::map::{MapAppState, MapSession};
use crate::weather::{WeatherAppState, WeatherClient, WeatherSource};

/// A client watching the scene feed
pub struct ScenePeer {
    pub id: Uuid,
    pub connected_at: Instant,
    pub last_seen: Instant,
    pub last_revision: u64,
}

/// Connected scene-feed clients
pub type ConnectionRegistry = Arc<RwLock<HashMap<Uuid, ScenePeer>>>;

/// Shared application state
///
/// Every component is built once at startup and handed to the route modules
/// as their own narrower state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub images: Arc<dyn ImagerySource>,
    pub stats: Arc<dyn StatsSource>,
    pub session: Arc<MapSession>,
    pub store: Arc<dyn FarmStore>,
    pub feed: Arc<LiveFeed>,
    pub weather: Arc<dyn WeatherSource>,
    pub connections: ConnectionRegistry,
}

impl AppState {
    /// State around the given imagery sources, with an empty in-memory store
    /// and the configured weather client
    pub fn new(
        config: Config,
        images: Arc<dyn ImagerySource>,
        stats: Arc<dyn StatsSource>,
    ) -> Self {
        let session = Arc::new(MapSession::new(images.clone(), &config.map));
        let weather = Arc::new(WeatherClient::new(reqwest::Client::new(), &config.weather));
        Self {
            config,
            images,
            stats,
            session,
            store: Arc::new(MemoryStore::new()),
            feed: Arc::new(LiveFeed::new()),
            weather,
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Production wiring: Sentinel Hub gateway, statistics aggregator,
    /// realtime database store (when configured) and OpenWeatherMap
    pub fn from_config(config: Config, client: reqwest::Client) -> Self {
        let credentials = ClientCredentialsProvider::new(client.clone(), &config.sentinel);
        if !credentials.has_credentials() {
            warn!(
                "SENTINEL_HUB_CLIENT_ID/SENTINEL_HUB_CLIENT_SECRET not set - imagery routes will fail"
            );
        }
        let tokens: Arc<dyn TokenProvider> = Arc::new(credentials);

        let mut gateway = ImageGateway::new(client.clone(), tokens.clone(), &config.sentinel);
        if config.image_cache.enabled {
            info!(
                "Raster cache enabled: max {} MB",
                config.image_cache.max_size_bytes / (1024 * 1024)
            );
            gateway = gateway.with_cache(RasterCache::new(&config.image_cache));
        }
        let stats = StatsAggregator::new(client.clone(), tokens, &config.sentinel, &config.stats);

        let store: Arc<dyn FarmStore> = match RealtimeDbStore::new(client.clone(), &config.farm) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!("Farm database unavailable ({}), using in-memory store", e);
                Arc::new(MemoryStore::new())
            }
        };
        let weather = Arc::new(WeatherClient::new(client, &config.weather));

        Self::new(config, Arc::new(gateway), Arc::new(stats))
            .with_store(store)
            .with_weather(weather)
    }

    pub fn with_store(mut self, store: Arc<dyn FarmStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_feed(mut self, feed: Arc<LiveFeed>) -> Self {
        self.feed = feed;
        self
    }

    pub fn with_weather(mut self, weather: Arc<dyn WeatherSource>) -> Self {
        self.weather = weather;
        self
    }

    pub fn imagery_state(&self) -> ImageryAppState {
        ImageryAppState {
            images: self.images.clone(),
            stats: self.stats.clone(),
        }
    }

    pub fn map_state(&self) -> MapAppState {
        MapAppState {
            session: self.session.clone(),
            config: self.config.map.clone(),
        }
    }

    pub fn farm_state(&self) -> FarmAppState {
        FarmAppState {
            store: self.store.clone(),
            feed: self.feed.clone(),
            stats: self.stats.clone(),
        }
    }

    pub fn weather_state(&self) -> WeatherAppState {
        WeatherAppState {
            weather: self.weather.clone(),
        }
    }

    /// Number of connected scene-feed clients
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
