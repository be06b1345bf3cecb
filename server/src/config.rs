//! Server configuration
//!
//! Configuration is loaded from environment variables. Credentials are kept
//! optional here: a missing value disables the matching feature with a
//! configuration error at request time instead of failing startup.

use std::env;
use std::time::Duration;

use crate::imagery::BucketSize;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,

    /// Sentinel Hub imagery configuration
    pub sentinel: SentinelConfig,

    /// OpenWeatherMap configuration
    pub weather: WeatherConfig,

    /// Map surface configuration
    pub map: MapConfig,

    /// Rendered raster cache configuration
    pub image_cache: ImageCacheConfig,

    /// Farm record store configuration
    pub farm: FarmConfig,

    /// NDVI time-series configuration
    pub stats: StatsConfig,
}

/// Sentinel Hub credentials and endpoints
#[derive(Clone)]
pub struct SentinelConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_url: String,
    pub process_url: String,
    pub statistics_url: String,
    /// Upper bound on any single upstream request
    pub request_timeout: Duration,
    /// Output raster size in pixels (square)
    pub image_size: u32,
}

/// OpenWeatherMap settings
#[derive(Clone)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub units: String,
    pub request_timeout: Duration,
}

/// Map surface settings handed to clients and used by the overlay renderer
#[derive(Debug, Clone)]
pub struct MapConfig {
    /// Access token for the client-side map library
    pub access_token: Option<String>,
    pub satellite_style: String,
    pub dark_style: String,
    /// Opacity applied to overlays while NDVI is visible
    pub overlay_opacity: f32,
    /// Padding in pixels when fitting the viewport to a new overlay
    pub fit_padding: u32,
    /// Bounded wait for decoding a fetched raster
    pub image_decode_timeout: Duration,
    /// Most layers the shared session holds at once
    pub max_layers: usize,
}

/// Rendered raster cache settings
#[derive(Debug, Clone)]
pub struct ImageCacheConfig {
    pub enabled: bool,
    pub max_size_bytes: u64,
    pub ttl: Duration,
    pub tti: Duration,
}

/// Farm record store settings
#[derive(Clone)]
pub struct FarmConfig {
    /// User whose records are served
    pub user_id: Option<String>,
    /// Realtime database base URL; `None` serves an empty in-memory store
    pub database_url: Option<String>,
    /// Optional database auth token appended as `?auth=`
    pub database_auth: Option<String>,
    /// How often the live feed polls the store
    pub poll_interval: Duration,
    /// Persist migrated legacy polygon records back to the store
    pub write_back_migrations: bool,
}

/// NDVI time-series settings
#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub bucket: BucketSize,
    /// Statistical API resolution in metres
    pub resolution_m: f64,
    /// Longest series one request may ask for
    pub max_buckets: usize,
}

impl std::fmt::Debug for SentinelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentinelConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("token_url", &self.token_url)
            .field("process_url", &self.process_url)
            .field("statistics_url", &self.statistics_url)
            .field("request_timeout", &self.request_timeout)
            .field("image_size", &self.image_size)
            .finish()
    }
}

impl std::fmt::Debug for WeatherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("units", &self.units)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl std::fmt::Debug for FarmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FarmConfig")
            .field("user_id", &self.user_id)
            .field("database_url", &self.database_url)
            .field("database_auth", &self.database_auth.as_ref().map(|_| "<redacted>"))
            .field("poll_interval", &self.poll_interval)
            .field("write_back_migrations", &self.write_back_migrations)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            sentinel: SentinelConfig::default(),
            weather: WeatherConfig::default(),
            map: MapConfig::default(),
            image_cache: ImageCacheConfig::default(),
            farm: FarmConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            token_url: "https://services.sentinel-hub.com/oauth/token".to_string(),
            process_url: "https://services.sentinel-hub.com/api/v1/process".to_string(),
            statistics_url: "https://services.sentinel-hub.com/api/v1/statistics".to_string(),
            request_timeout: Duration::from_secs(30),
            image_size: 512,
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openweathermap.org/data/2.5/weather".to_string(),
            units: "metric".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            satellite_style: "mapbox://styles/mapbox/satellite-v9".to_string(),
            dark_style: "mapbox://styles/mapbox/dark-v11".to_string(),
            overlay_opacity: 0.8,
            fit_padding: 100,
            image_decode_timeout: Duration::from_secs(10),
            max_layers: 32,
        }
    }
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: 64 * 1024 * 1024, // 64 MB
            ttl: Duration::from_secs(24 * 60 * 60),
            tti: Duration::from_secs(60 * 60),
        }
    }
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            database_url: None,
            database_auth: None,
            poll_interval: Duration::from_secs(15),
            write_back_migrations: false,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            bucket: BucketSize::SemiMonthly,
            resolution_m: 10.0,
            max_buckets: 48, // two years, semi-monthly
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn flag(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Server config
        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        // Sentinel Hub
        config.sentinel.client_id = non_empty("SENTINEL_HUB_CLIENT_ID");
        config.sentinel.client_secret = non_empty("SENTINEL_HUB_CLIENT_SECRET");
        if let Some(url) = non_empty("SENTINEL_HUB_TOKEN_URL") {
            config.sentinel.token_url = url;
        }
        if let Some(url) = non_empty("SENTINEL_HUB_PROCESS_URL") {
            config.sentinel.process_url = url;
        }
        if let Some(url) = non_empty("SENTINEL_HUB_STATISTICS_URL") {
            config.sentinel.statistics_url = url;
        }
        if let Ok(val) = env::var("SENTINEL_HUB_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.sentinel.request_timeout = Duration::from_secs(secs);
        }

        // Weather
        config.weather.api_key = non_empty("OPENWEATHER_API_KEY");
        if let Some(url) = non_empty("OPENWEATHER_BASE_URL") {
            config.weather.base_url = url;
        }

        // Map
        config.map.access_token = non_empty("MAPBOX_ACCESS_TOKEN");
        if let Ok(val) = env::var("IMAGE_DECODE_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.map.image_decode_timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("MAP_MAX_LAYERS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.map.max_layers = n.max(1);
        }

        // Raster cache
        if let Ok(val) = env::var("IMAGE_CACHE_MAX_MB")
            && let Ok(mb) = val.parse::<u64>()
        {
            config.image_cache.enabled = mb > 0;
            config.image_cache.max_size_bytes = mb * 1024 * 1024;
        }

        // Farm store
        config.farm.user_id = non_empty("FARM_USER_ID");
        config.farm.database_url = non_empty("FARM_DATABASE_URL");
        config.farm.database_auth = non_empty("FARM_DATABASE_AUTH");
        if let Ok(val) = env::var("FARM_POLL_INTERVAL_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.farm.poll_interval = Duration::from_secs(secs.max(1));
        }
        if let Ok(val) = env::var("FARM_WRITE_BACK_MIGRATIONS") {
            config.farm.write_back_migrations = flag(&val);
        }

        // Stats
        if let Ok(val) = env::var("STATS_BUCKET_DAYS")
            && let Ok(days) = val.parse::<u32>()
            && days > 0
        {
            config.stats.bucket = BucketSize::FixedDays(days);
        }
        if let Ok(val) = env::var("STATS_MAX_BUCKETS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.stats.max_buckets = n.max(1);
        }

        config
    }
}
